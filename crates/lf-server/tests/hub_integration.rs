//! Integration tests for the hub facade.
//!
//! These tests drive `Hub` through its public ingestion and admin API with
//! recording sinks standing in for transports, and check the routing,
//! ordering, liveness and backpressure guarantees end-to-end.

mod common;

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use common::{publish, subscribe, RecordingSink};
use lf_core::protocol::messages::{DisconnectReason, ErrorCode};
use lf_core::{
    Action, AllowAll, AuthorizationError, AuthorizationPolicy, ConnectionId, HubMessage, Role, Topic,
    TopicPattern,
};
use lf_server::application::connection::CloseCause;
use lf_server::application::error::HubError;
use lf_server::application::hub::{Hub, HubConfig, InboundAck};
use lf_server::application::queue::{BackpressurePolicy, QueueStats};
use lf_server::application::router::TopicRouter;
use lf_server::application::session::SessionConfig;
use mockall::mock;

mock! {
    pub Policy {}

    impl AuthorizationPolicy for Policy {
        fn authorize(
            &self,
            role: Role,
            subject: &TopicPattern,
            action: Action,
        ) -> Result<(), AuthorizationError>;
    }
}

fn started_hub(config: HubConfig) -> Hub {
    let hub = Hub::new(config, Arc::new(AllowAll));
    hub.start();
    hub
}

// ── Routing ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_machine_reading_reaches_dashboard_but_not_virtual_factory() {
    // Arrange
    let hub = started_hub(HubConfig::default());
    let (m_sink, d_sink, v_sink) = (RecordingSink::new(), RecordingSink::new(), RecordingSink::new());
    let m = hub.on_connect(m_sink.clone(), Role::Machine, "m").await.expect("m");
    let d = hub.on_connect(d_sink.clone(), Role::Dashboard, "d").await.expect("d");
    let v = hub.on_connect(v_sink.clone(), Role::VirtualFactory, "v").await.expect("v");
    hub.handle_message(d, subscribe("line1.*")).await.expect("d subscribe");
    hub.handle_message(v, subscribe("line2.*")).await.expect("v subscribe");

    // Act
    let ack = hub.handle_message(m, publish("line1.temp", b"72")).await;

    // Assert
    assert_eq!(ack, Ok(InboundAck::Published { sequence: 1 }));
    let delivered = d_sink.wait_for_deliveries(1).await;
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].topic().as_str(), "line1.temp");
    assert_eq!(delivered[0].payload().body, b"72");
    assert_eq!(delivered[0].sequence(), 1);
    assert_eq!(delivered[0].source(), m);
    assert!(v_sink.delivered().is_empty());
    assert!(m_sink.delivered().is_empty(), "m holds no subscriptions");

    hub.shutdown().await;
}

#[tokio::test]
async fn test_overlapping_patterns_deliver_exactly_once() {
    let hub = started_hub(HubConfig::default());
    let d_sink = RecordingSink::new();
    let m = hub.on_connect(RecordingSink::new(), Role::Machine, "m").await.expect("m");
    let d = hub.on_connect(d_sink.clone(), Role::Dashboard, "d").await.expect("d");
    for pattern in ["*", "line1.*", "line1.temp", "line1/*"] {
        hub.handle_message(d, subscribe(pattern)).await.expect("subscribe");
    }

    hub.handle_message(m, publish("line1.temp", b"72")).await.expect("publish");
    hub.handle_message(m, publish("line1.pressure", b"3")).await.expect("publish");

    let delivered = d_sink.wait_for_deliveries(2).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(d_sink.delivered().len(), 2, "no duplicates after settling");
    assert_eq!(
        delivered.iter().map(|e| e.topic().as_str().to_owned()).collect::<Vec<_>>(),
        vec!["line1.temp", "line1.pressure"]
    );

    hub.shutdown().await;
}

#[tokio::test]
async fn test_publishes_get_strictly_increasing_sequences() {
    let hub = started_hub(HubConfig::default());
    let m = hub.on_connect(RecordingSink::new(), Role::Machine, "m").await.expect("m");

    let mut sequences = Vec::new();
    for i in 0..20u8 {
        match hub.handle_message(m, publish("line1.count", &[i])).await {
            Ok(InboundAck::Published { sequence }) => sequences.push(sequence),
            other => panic!("unexpected ack: {other:?}"),
        }
    }

    assert_eq!(sequences, (1..=20).collect::<Vec<u64>>());
    let info = hub.connections(Some(Role::Machine)).await;
    assert_eq!(info[0].last_sequence, 20);

    hub.shutdown().await;
}

#[tokio::test]
async fn test_each_source_is_delivered_in_publish_order() {
    // Arrange: two machines interleave on several topics, one dashboard sees all
    let hub = started_hub(HubConfig::default());
    let d_sink = RecordingSink::new();
    let d = hub.on_connect(d_sink.clone(), Role::Dashboard, "d").await.expect("d");
    hub.handle_message(d, subscribe("*")).await.expect("subscribe");
    let a = hub.on_connect(RecordingSink::new(), Role::Machine, "a").await.expect("a");
    let b = hub.on_connect(RecordingSink::new(), Role::Machine, "b").await.expect("b");

    // Act
    for i in 0..50u8 {
        let topic = ["line1.temp", "line1.rpm", "line2.temp"][usize::from(i) % 3];
        hub.handle_message(a, publish(topic, &[i])).await.expect("a publish");
        hub.handle_message(b, publish(topic, &[i])).await.expect("b publish");
    }

    // Assert
    let delivered = d_sink.wait_for_deliveries(100).await;
    let mut per_source: BTreeMap<ConnectionId, Vec<u64>> = BTreeMap::new();
    for envelope in &delivered {
        per_source.entry(envelope.source()).or_default().push(envelope.sequence());
    }
    for source in [a, b] {
        assert_eq!(per_source[&source], (1..=50).collect::<Vec<u64>>());
    }

    hub.shutdown().await;
}

#[tokio::test]
async fn test_rebuilt_index_matches_the_same_subscribers() {
    // Arrange
    let router = TopicRouter::new();
    let ids: Vec<ConnectionId> = (0..4).map(|_| ConnectionId::new()).collect();
    let patterns = ["*", "line1.*", "line1.temp", "line2.*", "line1.press.*"];
    for (i, id) in ids.iter().enumerate() {
        for pattern in patterns.iter().skip(i) {
            router.subscribe(*id, TopicPattern::parse(pattern).expect("pattern")).await;
        }
    }
    router.unsubscribe(ids[1], &TopicPattern::parse("line1.temp").expect("pattern")).await;
    router.remove_connection(ids[3]).await;
    let topics = ["line1.temp", "line1.press.a", "line2.x", "line3.y"];
    let mut before = Vec::new();
    for topic in topics {
        before.push(router.match_subscribers(&Topic::parse(topic).expect("topic")).await.expect("match"));
    }

    // Act
    router.rebuild().await;

    // Assert
    assert!(router.check_consistency().await.is_ok());
    for (topic, expected) in topics.iter().zip(before) {
        let after: HashSet<ConnectionId> = router
            .match_subscribers(&Topic::parse(topic).expect("topic"))
            .await
            .expect("match");
        assert_eq!(after, expected, "subscribers of {topic} changed after rebuild");
    }
}

#[tokio::test]
async fn test_verify_routing_reports_consistent_index() {
    let hub = started_hub(HubConfig::default());
    let d = hub.on_connect(RecordingSink::new(), Role::Dashboard, "d").await.expect("d");
    hub.handle_message(d, subscribe("line1.*")).await.expect("subscribe");

    assert!(hub.verify_routing().await);

    hub.shutdown().await;
}

// ── Backpressure ──────────────────────────────────────────────────────────────

/// Polls a connection's queue counters until `ready` holds.
async fn wait_for_queue(hub: &Hub, id: ConnectionId, ready: impl Fn(&QueueStats) -> bool) -> QueueStats {
    tokio::time::timeout(common::WAIT, async {
        loop {
            let stats = hub.queue_stats(id).await.expect("stats");
            if ready(&stats) {
                return stats;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("queue never reached the expected state")
}

#[tokio::test]
async fn test_slow_subscriber_keeps_newest_envelopes_in_order() {
    // Arrange: capacity 3 behind a sink that is blocked
    let config = HubConfig {
        session: SessionConfig {
            outbound_queue_capacity: 3,
            ..SessionConfig::default()
        },
        ..HubConfig::default()
    };
    assert_eq!(config.dispatch.backpressure, BackpressurePolicy::DropOldest);
    let hub = started_hub(config);
    let d_sink = RecordingSink::gated();
    let d = hub.on_connect(d_sink.clone(), Role::Dashboard, "d").await.expect("d");
    hub.handle_message(d, subscribe("line1.*")).await.expect("subscribe");
    let m = hub.on_connect(RecordingSink::new(), Role::Machine, "m").await.expect("m");

    // Act: the writer takes #1 and parks on the gate, then #2..#7 overflow
    hub.handle_message(m, publish("line1.temp", &[1])).await.expect("publish");
    wait_for_queue(&hub, d, |s| s.enqueued == 1 && s.depth == 0).await;
    for i in 2..=7u8 {
        hub.handle_message(m, publish("line1.temp", &[i])).await.expect("publish");
    }
    let stats = wait_for_queue(&hub, d, |s| s.enqueued == 7).await;
    d_sink.release();

    // Assert
    let delivered: Vec<u64> = d_sink
        .wait_for_deliveries(4)
        .await
        .iter()
        .map(|e| e.sequence())
        .collect();
    assert_eq!(stats.dropped, 3);
    assert_eq!(delivered, vec![1, 5, 6, 7]);

    hub.shutdown().await;
}

fn block_source_config() -> HubConfig {
    let mut config = HubConfig {
        session: SessionConfig {
            outbound_queue_capacity: 1,
            ..SessionConfig::default()
        },
        ..HubConfig::default()
    };
    config.dispatch.workers = 1;
    config.dispatch.backpressure = BackpressurePolicy::BlockSource;
    config
}

#[tokio::test]
async fn test_full_subscriber_blocks_only_its_publisher() {
    // Arrange: slow subscriber on a.*, prompt subscriber on b.*
    let hub = started_hub(block_source_config());
    let (slow_sink, fast_sink) = (RecordingSink::gated(), RecordingSink::new());
    let slow = hub.on_connect(slow_sink.clone(), Role::Dashboard, "slow").await.expect("slow");
    let fast = hub.on_connect(fast_sink.clone(), Role::Dashboard, "fast").await.expect("fast");
    hub.handle_message(slow, subscribe("a.*")).await.expect("subscribe");
    hub.handle_message(fast, subscribe("b.*")).await.expect("subscribe");
    let m1 = hub.on_connect(RecordingSink::new(), Role::Machine, "m1").await.expect("m1");
    let m2 = hub.on_connect(RecordingSink::new(), Role::Machine, "m2").await.expect("m2");

    // Act: writer holds #1, queue holds #2, #3 waits for space
    for i in 1..=3u8 {
        hub.handle_message(m1, publish("a.x", &[i])).await.expect("m1 publish");
    }
    wait_for_queue(&hub, slow, |s| s.enqueued == 2 && s.depth == 1).await;
    hub.handle_message(m2, publish("b.y", b"1")).await.expect("m2 publish");

    // Assert: m2 flows while m1 waits, and nothing was dropped
    let delivered = fast_sink.wait_for_deliveries(1).await;
    assert_eq!(delivered[0].source(), m2);
    let stats = hub.queue_stats(slow).await.expect("stats");
    assert_eq!((stats.enqueued, stats.dropped), (2, 0));

    // Act
    slow_sink.release();

    // Assert
    let order: Vec<u64> = slow_sink.wait_for_deliveries(3).await.iter().map(|e| e.sequence()).collect();
    assert_eq!(order, vec![1, 2, 3]);

    hub.shutdown().await;
}

#[tokio::test]
async fn test_closing_full_subscriber_releases_waiting_publisher() {
    // Arrange
    let hub = started_hub(block_source_config());
    let (slow_sink, fast_sink) = (RecordingSink::gated(), RecordingSink::new());
    let slow = hub.on_connect(slow_sink.clone(), Role::Dashboard, "slow").await.expect("slow");
    let fast = hub.on_connect(fast_sink.clone(), Role::Dashboard, "fast").await.expect("fast");
    hub.handle_message(slow, subscribe("a.*")).await.expect("subscribe");
    hub.handle_message(fast, subscribe("b.*")).await.expect("subscribe");
    let m = hub.on_connect(RecordingSink::new(), Role::Machine, "m").await.expect("m");
    for i in 1..=3u8 {
        hub.handle_message(m, publish("a.x", &[i])).await.expect("publish");
    }
    wait_for_queue(&hub, slow, |s| s.enqueued == 2 && s.depth == 1).await;

    // Act
    tokio_test::assert_ok!(hub.force_close(slow).await);
    hub.handle_message(m, publish("b.z", b"4")).await.expect("publish");

    // Assert: m's later envelope got past the closed subscriber
    let delivered = fast_sink.wait_for_deliveries(1).await;
    assert_eq!((delivered[0].source(), delivered[0].sequence()), (m, 4));
    assert_eq!(slow_sink.closes(), vec![CloseCause::ForceClosed]);

    hub.shutdown().await;
}

// ── Sessions ──────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_silent_connection_is_reaped_after_liveness_window() {
    // Arrange: heartbeat every 5 s, three missed heartbeats allowed
    let hub = started_hub(HubConfig::default());
    let m_sink = RecordingSink::new();
    let d_sink = RecordingSink::new();
    let m = hub.on_connect(m_sink.clone(), Role::Machine, "m").await.expect("m");
    let d = hub.on_connect(d_sink.clone(), Role::Dashboard, "d").await.expect("d");
    hub.handle_message(d, subscribe("line1.*")).await.expect("subscribe");

    // Act: only the machine keeps talking
    for token in 0..5 {
        tokio::time::sleep(Duration::from_secs(5)).await;
        hub.handle_message(m, HubMessage::Heartbeat(token)).await.expect("heartbeat");
    }

    // Assert
    assert_eq!(d_sink.wait_for_close().await, CloseCause::HeartbeatTimeout);
    let live: Vec<ConnectionId> = hub.connections(None).await.iter().map(|c| c.id).collect();
    assert_eq!(live, vec![m]);
    assert!(hub.subscription_counts().await.is_empty());
    assert!(m_sink.closes().is_empty());

    hub.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_handshake_that_never_finishes_times_out() {
    let hub = Hub::new(HubConfig::default(), Arc::new(AllowAll));

    let result = hub.await_handshake(std::future::pending::<()>()).await;

    assert_eq!(result, Err(HubError::HandshakeTimeout(Duration::from_secs(5))));
}

#[tokio::test]
async fn test_second_session_with_same_identity_is_refused() {
    let hub = started_hub(HubConfig::default());
    hub.on_connect(RecordingSink::new(), Role::Machine, "haas-vf2").await.expect("first");

    let second = hub.on_connect(RecordingSink::new(), Role::Machine, "haas-vf2").await;
    let other_role = hub.on_connect(RecordingSink::new(), Role::Dashboard, "haas-vf2").await;

    assert_eq!(
        second.map_err(|e| e.code()),
        Err(ErrorCode::DuplicateIdentity)
    );
    assert!(other_role.is_ok(), "identities are scoped by role");

    hub.shutdown().await;
}

#[tokio::test]
async fn test_multiple_sessions_allowed_when_configured() {
    let hub = started_hub(HubConfig {
        session: SessionConfig {
            allow_multiple_sessions: true,
            ..SessionConfig::default()
        },
        ..HubConfig::default()
    });

    let first = hub.on_connect(RecordingSink::new(), Role::Dashboard, "wall").await;
    let second = hub.on_connect(RecordingSink::new(), Role::Dashboard, "wall").await;

    assert!(first.is_ok() && second.is_ok());
    assert_eq!(hub.connections(Some(Role::Dashboard)).await.len(), 2);

    hub.shutdown().await;
}

#[tokio::test]
async fn test_drain_flushes_queued_output_before_closing() {
    // Arrange: three envelopes queued behind a blocked sink
    let hub = started_hub(HubConfig::default());
    let d_sink = RecordingSink::gated();
    let d = hub.on_connect(d_sink.clone(), Role::Dashboard, "d").await.expect("d");
    hub.handle_message(d, subscribe("*")).await.expect("subscribe");
    let m = hub.on_connect(RecordingSink::new(), Role::Machine, "m").await.expect("m");
    for i in 0..3u8 {
        hub.handle_message(m, publish("line1.temp", &[i])).await.expect("publish");
    }
    tokio::time::timeout(common::WAIT, async {
        while hub.queue_stats(d).await.expect("stats").enqueued < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("dispatched");

    // Act
    let ack = hub
        .handle_message(d, HubMessage::Disconnect { reason: DisconnectReason::ClientShutdown })
        .await;
    d_sink.release();

    // Assert
    assert_eq!(ack, Ok(InboundAck::Draining));
    assert_eq!(d_sink.wait_for_close().await, CloseCause::Drained);
    assert_eq!(d_sink.delivered().len(), 3);
    assert!(hub.connections(Some(Role::Dashboard)).await.is_empty());

    hub.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_drain_deadline_discards_stuck_output() {
    let hub = started_hub(HubConfig {
        session: SessionConfig {
            drain_deadline: Duration::from_millis(50),
            ..SessionConfig::default()
        },
        ..HubConfig::default()
    });
    let d_sink = RecordingSink::gated();
    let d = hub.on_connect(d_sink.clone(), Role::Dashboard, "d").await.expect("d");
    hub.handle_message(d, subscribe("*")).await.expect("subscribe");
    let m = hub.on_connect(RecordingSink::new(), Role::Machine, "m").await.expect("m");
    hub.handle_message(m, publish("line1.temp", b"1")).await.expect("publish");

    hub.drain(d).await.expect("drain");

    assert_eq!(d_sink.wait_for_close().await, CloseCause::DrainDeadline);
    assert!(d_sink.delivered().is_empty());

    hub.shutdown().await;
}

#[tokio::test]
async fn test_force_close_notifies_sink_and_clears_subscriptions() {
    let hub = started_hub(HubConfig::default());
    let d_sink = RecordingSink::new();
    let d = hub.on_connect(d_sink.clone(), Role::Dashboard, "d").await.expect("d");
    hub.handle_message(d, subscribe("line1.*")).await.expect("subscribe");

    tokio_test::assert_ok!(hub.force_close(d).await);

    assert_eq!(d_sink.closes(), vec![CloseCause::ForceClosed]);
    assert!(hub.subscription_counts().await.is_empty());
    assert_eq!(hub.force_close(d).await, Err(HubError::NotFound(d)));

    hub.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_closes_every_connection() {
    let hub = started_hub(HubConfig::default());
    let sinks: Vec<_> = (0..3).map(|_| RecordingSink::new()).collect();
    for (i, sink) in sinks.iter().enumerate() {
        hub.on_connect(sink.clone(), Role::Machine, &format!("m{i}")).await.expect("connect");
    }

    hub.shutdown().await;

    assert!(hub.connections(None).await.is_empty());
    for sink in sinks {
        assert_eq!(sink.closes(), vec![CloseCause::Shutdown]);
    }
}

// ── Authorization ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_policy_is_consulted_for_subscribe_and_publish() {
    // Arrange: virtual factories may not subscribe to machine commands
    let mut policy = MockPolicy::new();
    policy
        .expect_authorize()
        .withf(|role, subject, action| {
            *role == Role::VirtualFactory
                && *action == Action::Subscribe
                && subject.as_str() == "machine.*"
        })
        .returning(|role, subject, action| {
            Err(AuthorizationError {
                role,
                action,
                subject: subject.to_string(),
            })
        });
    policy
        .expect_authorize()
        .withf(|_, subject, _| subject.as_str() != "machine.*")
        .returning(|_, _, _| Ok(()));
    let hub = Hub::new(HubConfig::default(), Arc::new(policy));
    hub.start();
    let v = hub.on_connect(RecordingSink::new(), Role::VirtualFactory, "v").await.expect("v");

    // Act
    let refused = hub.handle_message(v, subscribe("machine.*")).await;
    let allowed = hub.handle_message(v, subscribe("line1.*")).await;
    let published = hub.handle_message(v, publish("sim.tick", b"1")).await;

    // Assert
    assert_eq!(refused.map_err(|e| e.code()), Err(ErrorCode::Authorization));
    assert_eq!(allowed, Ok(InboundAck::Subscribed { pattern: "line1.*".into() }));
    assert_eq!(published, Ok(InboundAck::Published { sequence: 1 }));
    assert_eq!(hub.connections(None).await[0].violations, 1);

    hub.shutdown().await;
}
