use ractor::{async_trait as rasync_trait, Actor, ActorProcessingErr, ActorRef, SupervisionEvent};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info};

/// Supervises the node's two subsystems, the chain watcher and the
/// gossip router.
///
/// There is no per-child restart policy: the router is useless without
/// the watcher and vice versa, and the watch set and channel graph live
/// in the failed actor's state, so a blind respawn would resume with an
/// empty view of the chain. A failed subsystem cancels the shared token
/// and takes the node down; restarting is left to whatever supervises
/// the process.
pub struct NodeSupervisor;

#[derive(Debug)]
pub enum SupervisorMessage {
    /// Stop every linked subsystem, with a reason for the logs.
    Shutdown(String),
}

impl NodeSupervisor {
    pub async fn start(
        tracker: TaskTracker,
        token: CancellationToken,
    ) -> ActorRef<SupervisorMessage> {
        Actor::spawn(
            Some("node supervisor".to_string()),
            NodeSupervisor {},
            (tracker, token),
        )
        .await
        .expect("start node supervisor")
        .0
    }
}

#[rasync_trait]
impl Actor for NodeSupervisor {
    type Msg = SupervisorMessage;
    type State = CancellationToken;
    type Arguments = (TaskTracker, CancellationToken);

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        (tracker, token): Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        // Shutdown requested from outside (ctrl-c) arrives through the
        // cancellation token.
        let exit_token = token.clone();
        tracker.spawn(async move {
            exit_token.cancelled().await;
            let _ = myself.send_message(SupervisorMessage::Shutdown(
                "cancellation token received".to_string(),
            ));
        });
        Ok(token)
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        _token: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisorMessage::Shutdown(reason) => {
                info!("Stopping the chain watcher and the gossip router: {}", reason);
                myself.stop(Some(reason));
            }
        }
        Ok(())
    }

    async fn handle_supervisor_evt(
        &self,
        myself: ActorRef<Self::Msg>,
        message: SupervisionEvent,
        token: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisionEvent::ActorTerminated(who, _, reason) => {
                debug!("Actor {:?} terminated: {:?}", who, reason);
            }
            SupervisionEvent::ActorFailed(who, err) => {
                error!(
                    "Actor {:?} panicked, shutting the node down: {:?}",
                    who, err
                );
                token.cancel();
                myself.stop(Some("subsystem failure".to_string()));
            }
            _ => {}
        }
        Ok(())
    }
}
