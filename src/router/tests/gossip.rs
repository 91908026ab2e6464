use std::collections::HashSet;

use ractor::concurrency::Duration;

use crate::chain::ChainMessage;
use crate::chain::tests::test_utils::spending_tx;
use crate::events::NodeEvent;
use crate::now_timestamp_as_secs_u64;
use crate::router::graph::RouteError;
use crate::router::tests::test_utils::{
    create_invalid_ecdsa_signature, random_peer_id, settle, ChannelTestContext,
    RouterTestContext,
};
use crate::router::types::{GossipMessage, UpdateFlags};
use crate::router::{RouterMessage, RouterOutbound};

#[tokio::test]
async fn test_channel_announcement_is_admitted_after_validation() {
    let context = RouterTestContext::new().await;
    let channel = ChannelTestContext::gen(100, 0);
    context.confirm_funding(&channel);
    context.ingest(
        GossipMessage::ChannelAnnouncement(channel.announcement.clone()),
        random_peer_id(),
    );
    settle().await;
    assert_eq!(
        context.node_events.read().await.as_slice(),
        &[NodeEvent::ChannelAnnounced(channel.short_channel_id())]
    );
}

#[tokio::test]
async fn test_duplicate_announcement_from_two_peers_is_admitted_once() {
    let context = RouterTestContext::new().await;
    let channel = ChannelTestContext::gen(100, 0);
    context.confirm_funding(&channel);
    for _ in 0..2 {
        context.ingest(
            GossipMessage::ChannelAnnouncement(channel.announcement.clone()),
            random_peer_id(),
        );
    }
    settle().await;
    assert_eq!(context.node_events.read().await.len(), 1);

    // Ingesting again after admission is a no-op too.
    context.ingest(
        GossipMessage::ChannelAnnouncement(channel.announcement.clone()),
        random_peer_id(),
    );
    settle().await;
    assert_eq!(context.node_events.read().await.len(), 1);
}

#[tokio::test]
async fn test_announcement_with_bad_signature_gets_error_reply() {
    let context = RouterTestContext::new().await;
    let channel = ChannelTestContext::gen(100, 0);
    context.confirm_funding(&channel);
    let mut announcement = channel.announcement.clone();
    announcement.node_signature_1 = Some(create_invalid_ecdsa_signature());
    let peer_id = random_peer_id();
    context.ingest(GossipMessage::ChannelAnnouncement(announcement), peer_id);
    settle().await;

    assert!(context.node_events.read().await.is_empty());
    let outbound = context.outbound.read().await;
    assert!(matches!(
        outbound.as_slice(),
        [RouterOutbound::PeerError { peer_id: p, .. }] if *p == peer_id
    ));
}

#[tokio::test]
async fn test_announcement_without_funding_tx_is_dropped_without_blacklist() {
    let context = RouterTestContext::new().await;
    let channel = ChannelTestContext::gen(100, 0);
    // Not confirming the funding tx: the chain lookup yields nothing.
    context.ingest(
        GossipMessage::ChannelAnnouncement(channel.announcement.clone()),
        random_peer_id(),
    );
    settle().await;
    assert!(context.node_events.read().await.is_empty());
    assert!(context.outbound.read().await.is_empty());

    // Not blacklisted: once the transaction shows up, a rebroadcast of
    // the same announcement is admitted.
    context.confirm_funding(&channel);
    context.ingest(
        GossipMessage::ChannelAnnouncement(channel.announcement.clone()),
        random_peer_id(),
    );
    settle().await;
    assert_eq!(
        context.node_events.read().await.as_slice(),
        &[NodeEvent::ChannelAnnounced(channel.short_channel_id())]
    );
}

#[tokio::test]
async fn test_announcement_with_wrong_funding_script_is_discarded() {
    let context = RouterTestContext::new().await;
    let channel = ChannelTestContext::gen(100, 0);
    let other = ChannelTestContext::gen(100, 0);
    // A live transaction sits at the announced coordinates, but its
    // output pays to someone else's funding keys.
    context.confirm_funding(&other);
    context.ingest(
        GossipMessage::ChannelAnnouncement(channel.announcement.clone()),
        random_peer_id(),
    );
    settle().await;
    assert!(context.node_events.read().await.is_empty());
}

#[tokio::test]
async fn test_channel_updates_flow_into_routes() {
    let context = RouterTestContext::new().await;
    let channel = ChannelTestContext::gen(100, 0);
    context.confirm_funding(&channel);
    context.ingest(
        GossipMessage::ChannelAnnouncement(channel.announcement.clone()),
        random_peer_id(),
    );
    settle().await;

    let now = now_timestamp_as_secs_u64();
    let update = channel.update_from(&channel.node1_key, now, UpdateFlags::empty());
    context.ingest(GossipMessage::ChannelUpdate(update.clone()), random_peer_id());
    settle().await;

    let route = context
        .find_route(channel.announcement.node_id_1, channel.announcement.node_id_2)
        .await
        .expect("route over updated channel");
    assert_eq!(route.len(), 1);
    assert_eq!(route[0].update.timestamp, now);

    // No update in the opposite direction yet.
    let result = context
        .find_route(channel.announcement.node_id_2, channel.announcement.node_id_1)
        .await;
    assert_eq!(result, Err(RouteError::RouteNotFound));
}

#[tokio::test]
async fn test_channel_update_with_pending_announcement_is_stashed() {
    let context = RouterTestContext::new().await;
    let channel = ChannelTestContext::gen(100, 0);
    context.confirm_funding(&channel);
    let now = now_timestamp_as_secs_u64();
    let update = channel.update_from(&channel.node1_key, now, UpdateFlags::empty());

    // The update arrives while its announcement is still awaiting
    // validation and has to wait for the admission.
    context.ingest(
        GossipMessage::ChannelAnnouncement(channel.announcement.clone()),
        random_peer_id(),
    );
    context.ingest(GossipMessage::ChannelUpdate(update), random_peer_id());
    settle().await;
    settle().await;

    let route = context
        .find_route(channel.announcement.node_id_1, channel.announcement.node_id_2)
        .await
        .expect("stashed update applied after admission");
    assert_eq!(route.len(), 1);
}

#[tokio::test]
async fn test_channel_update_for_unknown_channel_is_dropped() {
    let context = RouterTestContext::new().await;
    let channel = ChannelTestContext::gen(100, 0);
    context.confirm_funding(&channel);
    let now = now_timestamp_as_secs_u64();
    let update = channel.update_from(&channel.node1_key, now, UpdateFlags::empty());

    // No announcement anywhere, not even pending: silently dropped.
    context.ingest(GossipMessage::ChannelUpdate(update), random_peer_id());
    settle().await;
    assert!(context.outbound.read().await.is_empty());

    // Ingesting the announcement afterwards admits the channel, but the
    // dropped update is gone.
    context.ingest(
        GossipMessage::ChannelAnnouncement(channel.announcement.clone()),
        random_peer_id(),
    );
    settle().await;
    let result = context
        .find_route(channel.announcement.node_id_1, channel.announcement.node_id_2)
        .await;
    assert_eq!(result, Err(RouteError::RouteNotFound));
}

#[tokio::test]
async fn test_older_update_never_replaces_newer() {
    let context = RouterTestContext::new().await;
    let channel = ChannelTestContext::gen(100, 0);
    context.confirm_funding(&channel);
    context.ingest(
        GossipMessage::ChannelAnnouncement(channel.announcement.clone()),
        random_peer_id(),
    );
    settle().await;

    let now = now_timestamp_as_secs_u64();
    let newer = channel.update_from(&channel.node1_key, now, UpdateFlags::empty());
    let older = channel.update_from(&channel.node1_key, now - 100, UpdateFlags::empty());
    context.ingest(GossipMessage::ChannelUpdate(newer), random_peer_id());
    settle().await;
    context.ingest(GossipMessage::ChannelUpdate(older), random_peer_id());
    settle().await;

    let route = context
        .find_route(channel.announcement.node_id_1, channel.announcement.node_id_2)
        .await
        .expect("route");
    assert_eq!(route[0].update.timestamp, now);
}

#[tokio::test]
async fn test_channel_update_with_bad_signature_gets_error_reply() {
    let context = RouterTestContext::new().await;
    let channel = ChannelTestContext::gen(100, 0);
    context.confirm_funding(&channel);
    context.ingest(
        GossipMessage::ChannelAnnouncement(channel.announcement.clone()),
        random_peer_id(),
    );
    settle().await;

    // Signed by node 1 but flagged as an update of node 2.
    let now = now_timestamp_as_secs_u64();
    let mut update = channel.update_from(&channel.node1_key, now, UpdateFlags::empty());
    update.flags |= UpdateFlags::DIRECTION;
    update.sign(&channel.node1_key);
    let peer_id = random_peer_id();
    context.ingest(GossipMessage::ChannelUpdate(update), peer_id);
    settle().await;

    let outbound = context.outbound.read().await;
    assert!(matches!(
        outbound.as_slice(),
        [RouterOutbound::PeerError { peer_id: p, .. }] if *p == peer_id
    ));
}

#[tokio::test]
async fn test_node_announcement_requires_related_channel() {
    let context = RouterTestContext::new().await;
    let channel = ChannelTestContext::gen(100, 0);
    let now = now_timestamp_as_secs_u64();

    // No related channel anywhere: dropped silently.
    let unrelated = channel.node_announcement_of(&channel.node1_key, now);
    context.ingest(
        GossipMessage::NodeAnnouncement(unrelated),
        random_peer_id(),
    );
    settle().await;
    context
        .router
        .send_message(RouterMessage::TickBroadcast)
        .expect("router alive");
    settle().await;
    assert!(context.outbound.read().await.is_empty());

    // With the channel admitted the announcement is stored and queued
    // for rebroadcast.
    context.confirm_funding(&channel);
    context.ingest(
        GossipMessage::ChannelAnnouncement(channel.announcement.clone()),
        random_peer_id(),
    );
    settle().await;
    let announcement = channel.node_announcement_of(&channel.node1_key, now + 1);
    context.ingest(
        GossipMessage::NodeAnnouncement(announcement.clone()),
        random_peer_id(),
    );
    settle().await;
    context
        .router
        .send_message(RouterMessage::TickBroadcast)
        .expect("router alive");
    settle().await;

    let outbound = context.outbound.read().await;
    let batch = outbound
        .iter()
        .find_map(|message| match message {
            RouterOutbound::GossipBatch(batch) => Some(batch.clone()),
            _ => None,
        })
        .expect("a rebroadcast batch");
    // Insertion order: the channel announcement was queued first.
    assert!(matches!(batch[0], GossipMessage::ChannelAnnouncement(_)));
    assert!(batch
        .iter()
        .any(|message| matches!(message, GossipMessage::NodeAnnouncement(n) if *n == announcement)));
}

#[tokio::test]
async fn test_spent_channel_is_removed_before_next_route() {
    let context = RouterTestContext::new().await;
    let channel = ChannelTestContext::gen(100, 0);
    context.confirm_funding(&channel);
    context.ingest(
        GossipMessage::ChannelAnnouncement(channel.announcement.clone()),
        random_peer_id(),
    );
    settle().await;
    let now = now_timestamp_as_secs_u64();
    context.ingest(
        GossipMessage::ChannelUpdate(channel.update_from(
            &channel.node1_key,
            now,
            UpdateFlags::empty(),
        )),
        random_peer_id(),
    );
    settle().await;
    assert!(context
        .find_route(channel.announcement.node_id_1, channel.announcement.node_id_2)
        .await
        .is_ok());

    // A commitment transaction spends the funding output.
    let spend = spending_tx(channel.funding_outpoint(), 1);
    context.mock.add_mempool_tx(spend.clone());
    context
        .chain
        .send_message(ChainMessage::NewTransaction(spend))
        .expect("chain alive");
    settle().await;

    let result = context
        .find_route(channel.announcement.node_id_1, channel.announcement.node_id_2)
        .await;
    assert_eq!(result, Err(RouteError::RouteNotFound));
    assert!(context
        .node_events
        .read()
        .await
        .contains(&NodeEvent::ChannelLost(channel.short_channel_id())));
}

#[tokio::test]
async fn test_route_around_exclusion_and_lift() {
    let context = RouterTestContext::new().await;
    // A -> B -> D and A -> C -> D over four channels.
    let key_a = crate::router::tests::test_utils::generate_keypair();
    let key_b = crate::router::tests::test_utils::generate_keypair();
    let key_c = crate::router::tests::test_utils::generate_keypair();
    let key_d = crate::router::tests::test_utils::generate_keypair();
    let now = now_timestamp_as_secs_u64();

    let channels = [
        ChannelTestContext::gen_between(key_a, key_b, 100, 0),
        ChannelTestContext::gen_between(key_b, key_d, 101, 0),
        ChannelTestContext::gen_between(key_a, key_c, 102, 0),
        ChannelTestContext::gen_between(key_c, key_d, 103, 0),
    ];
    let senders = [key_a, key_b, key_a, key_c];
    for (channel, sender) in channels.iter().zip(senders.iter()) {
        context.confirm_funding(channel);
        context.ingest(
            GossipMessage::ChannelAnnouncement(channel.announcement.clone()),
            random_peer_id(),
        );
        settle().await;
        context.ingest(
            GossipMessage::ChannelUpdate(channel.update_from(sender, now, UpdateFlags::empty())),
            random_peer_id(),
        );
    }
    settle().await;

    let desc_a_b = channels[0].desc_from(&key_a);
    context
        .router
        .send_message(RouterMessage::ExcludeChannel(
            desc_a_b,
            Duration::from_millis(300),
        ))
        .expect("router alive");
    tokio::time::sleep(Duration::from_millis(50)).await;

    let route = context
        .find_route(key_a.pubkey(), key_d.pubkey())
        .await
        .expect("route around excluded edge");
    assert_eq!(route.len(), 2);
    assert_eq!(route[0].to, key_c.pubkey());

    // After the exclusion lifts, both first hops show up again.
    tokio::time::sleep(Duration::from_millis(400)).await;
    let mut seen = HashSet::new();
    for _ in 0..40 {
        let route = context
            .find_route(key_a.pubkey(), key_d.pubkey())
            .await
            .expect("route");
        seen.insert(route[0].to);
    }
    assert_eq!(seen.len(), 2);
}

#[tokio::test]
async fn test_stale_channel_pruned_with_events() {
    let context = RouterTestContext::new().await;
    let channel = ChannelTestContext::gen(697_000, 0);
    context.confirm_funding(&channel);
    context.ingest(
        GossipMessage::ChannelAnnouncement(channel.announcement.clone()),
        random_peer_id(),
    );
    settle().await;
    let now = now_timestamp_as_secs_u64();
    for key in [&channel.node1_key, &channel.node2_key] {
        context.ingest(
            GossipMessage::ChannelUpdate(channel.update_from(
                key,
                now - 2_000_000,
                UpdateFlags::empty(),
            )),
            random_peer_id(),
        );
    }
    settle().await;

    // Let the watcher publish the current block count.
    context.mock.set_block_count(700_000);
    context
        .chain
        .send_message(ChainMessage::NewBlock)
        .expect("chain alive");
    settle().await;

    context
        .router
        .send_message(RouterMessage::TickPruneStaleChannels)
        .expect("router alive");
    settle().await;

    let events = context.node_events.read().await;
    assert!(events.contains(&NodeEvent::ChannelLost(channel.short_channel_id())));
    let result = context
        .find_route(channel.announcement.node_id_1, channel.announcement.node_id_2)
        .await;
    assert_eq!(result, Err(RouteError::RouteNotFound));
}

#[tokio::test]
async fn test_many_announcements_are_validated_in_batches() {
    let context = RouterTestContext::new().await;
    let channels = (0..60)
        .map(|i| ChannelTestContext::gen(100 + i, 0))
        .collect::<Vec<_>>();
    for channel in &channels {
        context.confirm_funding(channel);
        context.ingest(
            GossipMessage::ChannelAnnouncement(channel.announcement.clone()),
            random_peer_id(),
        );
    }
    // More than one batch is needed; give the ticks some room.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(context.node_events.read().await.len(), 60);
}
