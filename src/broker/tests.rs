use super::topic::Topic;
use super::{Message, Router, TopicRegistry};
use crate::connection::{
    BackpressurePolicy, CloseReason, Connection, ConnectionId, Outbound, QueueConfig,
};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

fn open_connection(id: &str) -> Arc<Connection> {
    open_connection_with(id, QueueConfig::default())
}

fn open_connection_with(id: &str, queue: QueueConfig) -> Arc<Connection> {
    let connection = Arc::new(Connection::new(ConnectionId::from(id), queue));
    assert!(connection.mark_open());
    connection
}

async fn next_delivery(connection: &Connection) -> Arc<Message> {
    let item = tokio::time::timeout(Duration::from_secs(1), connection.next_outbound())
        .await
        .expect("timed out waiting for delivery")
        .expect("queue closed");
    match item {
        Outbound::Deliver(message) => message,
        other => panic!("Expected a delivery, got {other:?}"),
    }
}

#[test]
fn test_topic_new() {
    let topic = Topic::new("test_topic");
    assert_eq!(topic.name(), "test_topic");
    assert!(topic.is_empty());
    assert!(topic.snapshot().is_empty());
}

#[test]
fn test_topic_insert_and_remove() {
    let topic = Topic::new("test_topic");
    let connection = open_connection("client1");

    assert_eq!(topic.insert(&connection), Some(true));
    assert_eq!(topic.insert(&connection), Some(false));
    assert!(topic.contains(connection.id()));
    assert_eq!(topic.snapshot().len(), 1);

    assert!(topic.remove(connection.id()));
    assert!(!topic.contains(connection.id()));
    assert!(topic.snapshot().is_empty());
}

#[test]
fn test_retired_topic_refuses_inserts() {
    let topic = Topic::new("test_topic");
    assert!(topic.retire_if_empty());
    assert!(!topic.retire_if_empty());
    assert_eq!(topic.insert(&open_connection("client1")), None);
}

#[test]
fn test_registry_new() {
    let registry = TopicRegistry::new();
    assert_eq!(registry.topic_count(), 0);
    assert!(registry.subscribers_of("anything").is_empty());
}

#[test]
fn test_subscribe_is_idempotent() {
    let registry = TopicRegistry::new();
    let connection = open_connection("client1");

    assert!(registry.subscribe("room1", &connection).unwrap());
    assert!(!registry.subscribe("room1", &connection).unwrap());

    assert_eq!(registry.subscriber_count("room1"), 1);
    assert_eq!(connection.topics(), vec!["room1".to_string()]);
}

#[test]
fn test_unsubscribe_absent_is_noop() {
    let registry = TopicRegistry::new();
    let connection = open_connection("client1");

    assert!(!registry.unsubscribe("room1", &connection));
    registry.subscribe("room2", &connection).unwrap();
    assert!(!registry.unsubscribe("room1", &connection));
    assert_eq!(registry.subscriber_count("room2"), 1);
}

#[test]
fn test_subscription_sequence_matches_net_effect() {
    let registry = TopicRegistry::new();
    let connection = open_connection("client1");
    let ops = [
        ("sub", "a"),
        ("sub", "b"),
        ("sub", "a"),
        ("unsub", "c"),
        ("unsub", "a"),
        ("sub", "c"),
        ("unsub", "a"),
        ("sub", "a"),
        ("unsub", "b"),
        ("sub", "b"),
        ("sub", "b"),
        ("unsub", "c"),
    ];

    let mut expected = HashSet::new();
    for (op, topic) in ops {
        if op == "sub" {
            registry.subscribe(topic, &connection).unwrap();
            expected.insert(topic.to_string());
        } else {
            registry.unsubscribe(topic, &connection);
            expected.remove(topic);
        }

        let actual: HashSet<String> = connection.topics().into_iter().collect();
        assert_eq!(actual, expected);
        for name in ["a", "b", "c"] {
            let in_registry = registry
                .subscribers_of(name)
                .iter()
                .any(|c| c.id() == connection.id());
            assert_eq!(in_registry, expected.contains(name), "topic {name}");
        }
    }
}

#[test]
fn test_subscribe_rejects_connection_that_is_not_open() {
    let registry = TopicRegistry::new();

    let connecting = Arc::new(Connection::new(
        ConnectionId::from("connecting"),
        QueueConfig::default(),
    ));
    assert!(registry.subscribe("room1", &connecting).is_err());

    let closed = open_connection("closed");
    closed.close(CloseReason::ClientClosed);
    assert!(registry.subscribe("room1", &closed).is_err());

    assert_eq!(registry.topic_count(), 0);
}

#[test]
fn test_unsubscribe_all_clears_every_topic() {
    let registry = TopicRegistry::new();
    let a = open_connection("a");
    let b = open_connection("b");
    for topic in ["room1", "room2", "room3"] {
        registry.subscribe(topic, &a).unwrap();
    }
    registry.subscribe("room1", &b).unwrap();

    assert_eq!(registry.unsubscribe_all(&a), 3);
    assert!(a.topics().is_empty());
    assert_eq!(registry.subscriber_count("room1"), 1);
    // room2 and room3 lost their only subscriber
    assert_eq!(registry.topics(), vec!["room1".to_string()]);

    assert_eq!(registry.unsubscribe_all(&a), 0);
}

#[test]
fn test_empty_topic_is_dropped_and_recreated() {
    let registry = TopicRegistry::new();
    let connection = open_connection("client1");

    registry.subscribe("room1", &connection).unwrap();
    registry.unsubscribe("room1", &connection);
    assert_eq!(registry.topic_count(), 0);

    registry.subscribe("room1", &connection).unwrap();
    assert_eq!(registry.subscriber_count("room1"), 1);
}

#[test]
fn test_snapshot_is_immune_to_later_changes() {
    let registry = TopicRegistry::new();
    let a = open_connection("a");
    let b = open_connection("b");
    registry.subscribe("room1", &a).unwrap();

    let snapshot = registry.subscribers_of("room1");
    registry.subscribe("room1", &b).unwrap();
    registry.unsubscribe("room1", &a);

    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].id(), a.id());

    let current = registry.subscribers_of("room1");
    assert_eq!(current.len(), 1);
    assert_eq!(current[0].id(), b.id());
}

#[tokio::test]
async fn test_room_scenario_with_echo() {
    let registry = Arc::new(TopicRegistry::new());
    let router = Router::new(registry.clone(), true);
    let a = open_connection("a");
    let b = open_connection("b");
    let c = open_connection("c");
    registry.subscribe("room1", &a).unwrap();
    registry.subscribe("room1", &b).unwrap();
    registry.subscribe("room2", &c).unwrap();

    let report = router.publish("room1", json!("hi"), a.id()).await;
    assert_eq!(report.recipients, 2);
    assert_eq!(report.dropped, 0);

    for connection in [&a, &b] {
        let message = next_delivery(connection).await;
        assert_eq!(message.topic, "room1");
        assert_eq!(message.payload, json!("hi"));
        assert_eq!(&message.origin, a.id());
    }
    assert_eq!(c.queued(), 0);
}

#[tokio::test]
async fn test_publish_without_echo_skips_sender() {
    let registry = Arc::new(TopicRegistry::new());
    let router = Router::new(registry.clone(), false);
    let a = open_connection("a");
    let b = open_connection("b");
    registry.subscribe("room1", &a).unwrap();
    registry.subscribe("room1", &b).unwrap();

    let report = router.publish("room1", json!({"text": "hi"}), a.id()).await;
    assert_eq!(report.recipients, 1);
    assert_eq!(a.queued(), 0);
    assert_eq!(next_delivery(&b).await.payload, json!({"text": "hi"}));
}

#[tokio::test]
async fn test_publish_to_topic_without_subscribers() {
    let registry = Arc::new(TopicRegistry::new());
    let router = Router::new(registry.clone(), true);
    let a = open_connection("a");

    let report = router.publish("nobody-home", json!("hello"), a.id()).await;
    assert_eq!(report, Default::default());
    assert_eq!(registry.topic_count(), 0);
    assert_eq!(a.queued(), 0);
}

#[tokio::test]
async fn test_publish_preserves_order_per_origin() {
    let registry = Arc::new(TopicRegistry::new());
    let router = Router::new(registry.clone(), true);
    let a = open_connection("a");
    let b = open_connection("b");
    registry.subscribe("room1", &b).unwrap();

    for i in 0..50 {
        router.publish("room1", json!(i), a.id()).await;
    }
    for i in 0..50 {
        assert_eq!(next_delivery(&b).await.payload, json!(i));
    }
}

#[tokio::test]
async fn test_no_delivery_after_unsubscribe() {
    let registry = Arc::new(TopicRegistry::new());
    let router = Router::new(registry.clone(), true);
    let a = open_connection("a");
    let b = open_connection("b");
    registry.subscribe("room1", &b).unwrap();

    router.publish("room1", json!("before"), a.id()).await;
    registry.unsubscribe("room1", &b);
    let report = router.publish("room1", json!("after"), a.id()).await;

    assert_eq!(report.recipients, 0);
    assert_eq!(next_delivery(&b).await.payload, json!("before"));
    assert_eq!(b.queued(), 0);
}

#[tokio::test]
async fn test_disconnected_subscriber_gets_nothing() {
    let registry = Arc::new(TopicRegistry::new());
    let router = Router::new(registry.clone(), true);
    let a = open_connection("a");
    let b = open_connection("b");
    registry.subscribe("room1", &a).unwrap();

    // what the connection manager does on close
    a.close(CloseReason::ClientClosed);
    registry.unsubscribe_all(&a);

    let report = router.publish("room1", json!("anyone?"), b.id()).await;
    assert_eq!(report, Default::default());
    assert_eq!(a.queued(), 0);
}

#[tokio::test]
async fn test_drop_oldest_through_router() {
    let registry = Arc::new(TopicRegistry::new());
    let router = Router::new(registry.clone(), true);
    let queue = QueueConfig {
        capacity: 2,
        policy: BackpressurePolicy::DropOldest,
        ..QueueConfig::default()
    };
    let slow = open_connection_with("slow", queue);
    let origin = ConnectionId::from("origin");
    registry.subscribe("room1", &slow).unwrap();

    router.publish("room1", json!(1), &origin).await;
    router.publish("room1", json!(2), &origin).await;
    let report = router.publish("room1", json!(3), &origin).await;

    assert_eq!(report.recipients, 1);
    assert_eq!(report.dropped, 1);
    assert_eq!(slow.queued(), 2);
    assert_eq!(slow.dropped(), 1);
    assert_eq!(next_delivery(&slow).await.payload, json!(2));
    assert_eq!(next_delivery(&slow).await.payload, json!(3));
}

#[tokio::test]
async fn test_slow_subscriber_does_not_starve_others() {
    let registry = Arc::new(TopicRegistry::new());
    let router = Router::new(registry.clone(), true);
    let slow = open_connection_with(
        "slow",
        QueueConfig {
            capacity: 1,
            policy: BackpressurePolicy::DropNewest,
            ..QueueConfig::default()
        },
    );
    let fast = open_connection("fast");
    let origin = ConnectionId::from("origin");
    registry.subscribe("room1", &slow).unwrap();
    registry.subscribe("room1", &fast).unwrap();

    for i in 0..10 {
        router.publish("room1", json!(i), &origin).await;
    }

    assert_eq!(slow.queued(), 1);
    assert_eq!(slow.dropped(), 9);
    assert_eq!(fast.queued(), 10);
    assert_eq!(next_delivery(&slow).await.payload, json!(0));
}

fn block_brief_queue(wait: Duration) -> QueueConfig {
    QueueConfig {
        capacity: 1,
        policy: BackpressurePolicy::BlockBrief,
        block_brief: wait,
    }
}

#[tokio::test]
async fn test_block_brief_subscriber_does_not_starve_others() {
    let wait = Duration::from_millis(50);
    let registry = Arc::new(TopicRegistry::new());
    let router = Router::new(registry.clone(), true);
    let slow = open_connection_with("slow", block_brief_queue(wait));
    let fast = open_connection("fast");
    let origin = ConnectionId::from("origin");
    registry.subscribe("room1", &slow).unwrap();
    registry.subscribe("room1", &fast).unwrap();

    // Nobody drains `slow`, so its single slot stays taken.
    router.publish("room1", json!("first"), &origin).await;
    assert_eq!(slow.queued(), 1);

    let started = tokio::time::Instant::now();
    let report = router.publish("room1", json!("second"), &origin).await;
    let elapsed = started.elapsed();

    assert!(elapsed >= wait, "publish returned before the wait: {elapsed:?}");
    assert!(elapsed < wait * 10, "publish stalled for {elapsed:?}");
    assert_eq!(report.recipients, 1);
    assert_eq!(report.dropped, 1);
    assert_eq!(slow.dropped(), 1);
    assert_eq!(slow.queued(), 1);
    assert_eq!(next_delivery(&fast).await.payload, json!("first"));
    assert_eq!(next_delivery(&fast).await.payload, json!("second"));
    assert_eq!(next_delivery(&slow).await.payload, json!("first"));
}

#[tokio::test]
async fn test_block_brief_waits_once_per_full_subscriber() {
    let wait = Duration::from_millis(40);
    let registry = Arc::new(TopicRegistry::new());
    let router = Router::new(registry.clone(), true);
    let a = open_connection_with("a", block_brief_queue(wait));
    let b = open_connection_with("b", block_brief_queue(wait));
    let origin = ConnectionId::from("origin");
    registry.subscribe("room1", &a).unwrap();
    registry.subscribe("room1", &b).unwrap();

    router.publish("room1", json!(1), &origin).await;

    let started = tokio::time::Instant::now();
    let report = router.publish("room1", json!(2), &origin).await;

    assert!(started.elapsed() >= wait * 2);
    assert_eq!(report.recipients, 0);
    assert_eq!(report.dropped, 2);
    assert_eq!(a.dropped(), 1);
    assert_eq!(b.dropped(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_membership_stays_consistent() {
    let registry = Arc::new(TopicRegistry::new());
    let router = Router::new(registry.clone(), true);
    let connections: Vec<_> = (0..8)
        .map(|i| open_connection(&format!("conn-{i}")))
        .collect();
    let topics = ["t0", "t1", "t2", "t3"];

    let mut tasks = Vec::new();
    for (i, connection) in connections.iter().enumerate() {
        let registry = registry.clone();
        let router = router.clone();
        let connection = connection.clone();
        tasks.push(tokio::spawn(async move {
            for round in 0..200 {
                let topic = topics[(i + round) % topics.len()];
                if round % 3 == 0 {
                    registry.unsubscribe(topic, &connection);
                } else {
                    registry.subscribe(topic, &connection).unwrap();
                }
                router.publish(topic, json!(round), connection.id()).await;
                while connection.queued() > 0 {
                    connection.next_outbound().await;
                }
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    for connection in &connections {
        for topic in topics {
            let in_registry = registry
                .subscribers_of(topic)
                .iter()
                .any(|c| c.id() == connection.id());
            assert_eq!(in_registry, connection.is_subscribed(topic));
        }
    }

    for connection in &connections {
        registry.unsubscribe_all(connection);
    }
    assert_eq!(registry.topic_count(), 0);
}
