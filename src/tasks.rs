use once_cell::sync::Lazy;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

/// The process-wide task tracker paired with its shutdown token.
#[derive(Debug, Clone)]
struct Shutdown {
    tracker: TaskTracker,
    token: CancellationToken,
}

static SHUTDOWN: Lazy<Shutdown> = Lazy::new(|| Shutdown {
    tracker: TaskTracker::new(),
    token: CancellationToken::new(),
});

/// A clone of the global cancellation token, used as the exit signal.
pub fn new_tokio_cancellation_token() -> CancellationToken {
    SHUTDOWN.token.clone()
}

/// A clone of the global tracker to spawn long-running tasks on.
pub fn new_tokio_task_tracker() -> TaskTracker {
    SHUTDOWN.tracker.clone()
}

/// Cancel all tracked tasks and wait for their completion.
pub async fn cancel_tasks_and_wait_for_completion() {
    SHUTDOWN.token.cancel();
    SHUTDOWN.tracker.close();
    SHUTDOWN.tracker.wait().await;
}
