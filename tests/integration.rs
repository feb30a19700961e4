//! Integration Tests against a real Redis
//!
//! Tests use testcontainers for portability - no external docker-compose required.
//!
//! # Running Tests
//! ```bash
//! # Run all integration tests (requires Docker)
//! cargo test --test integration -- --ignored
//! ```
//!
//! # Test Organization
//! - `happy_*` - Normal operation: recovery script, release on publish
//! - `failure_*` - Failure scenarios: killed subscriber connections
//! - `lifecycle_*` - Connection teardown

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use redis::AsyncCommands;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

use causal_sync::{
    Backend, Dependency, Message, MessageSynchronizer, NodeId, Notification, RedisBackend, SyncError,
    SynchronizerConfig, SynchronizerState,
};

use testcontainers::{clients::Cli, core::WaitFor, Container, GenericImage};

// =============================================================================
// Container Helpers
// =============================================================================

/// Create a Redis container with health check
fn redis_container(docker: &Cli) -> Container<'_, GenericImage> {
    let image = GenericImage::new("redis", "7-alpine")
        .with_exposed_port(6379)
        .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"));
    docker.run(image)
}

fn redis_url(container: &Container<'_, GenericImage>) -> String {
    format!("redis://127.0.0.1:{}", container.get_host_port_ipv4(6379))
}

async fn admin(url: &str) -> redis::aio::MultiplexedConnection {
    redis::Client::open(url)
        .expect("client")
        .get_multiplexed_async_connection()
        .await
        .expect("admin connection")
}

/// Store and publish a version the way writers do.
async fn bump(conn: &mut redis::aio::MultiplexedConnection, key: &str, version: u64) {
    let _: () = conn.set(key, version).await.expect("SET");
    let _: () = conn.publish(key, version).await.expect("PUBLISH");
}

struct Event {
    id: u32,
    deps: Vec<Dependency>,
}

impl Message for Event {
    fn timestamp(&self) -> i64 {
        self.id as i64
    }

    fn happens_before_dependencies(&self) -> &[Dependency] {
        &self.deps
    }
}

fn config(url: &str) -> SynchronizerConfig {
    SynchronizerConfig {
        nodes: vec![url.to_string()],
        reconnect_interval_ms: 100,
        ..Default::default()
    }
}

async fn next_id(rx: &mut mpsc::UnboundedReceiver<Arc<Event>>) -> u32 {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for release")
        .expect("queue closed")
        .id
}

// =============================================================================
// Happy Path
// =============================================================================

#[tokio::test]
#[ignore]
async fn happy_recovery_script_semantics() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let url = redis_url(&redis);
    let mut conn = admin(&url).await;

    let cfg = config(&url);
    let backend = RedisBackend::new(&cfg);
    let node = backend.connect(NodeId(0), &url).await.expect("connect");

    let _: () = conn.set("acct", 2u64).await.unwrap();
    assert_eq!(node.worker.get_version("acct").await.unwrap(), 2);
    assert_eq!(node.worker.get_version("missing").await.unwrap(), 0);

    // Raised and guarded
    let delta = node.worker.recover("acct", 5, Some("acct:recovery_guard")).await.unwrap();
    assert_eq!(delta, Some(3));
    assert_eq!(node.worker.get_version("acct").await.unwrap(), 5);
    let ttl: i64 = conn.ttl("acct:recovery_guard").await.unwrap();
    assert!(ttl > 0 && ttl <= 10);

    // Guard held: no-op even though 9 > 5
    assert_eq!(node.worker.recover("acct", 9, Some("acct:recovery_guard")).await.unwrap(), None);

    // Unguarded read recovery, and no-op when already satisfied
    assert_eq!(node.worker.recover("other", 4, None).await.unwrap(), Some(4));
    assert_eq!(node.worker.recover("other", 3, None).await.unwrap(), None);
    let guard: Option<String> = conn.get("other:recovery_guard").await.unwrap();
    assert!(guard.is_none());
}

#[tokio::test]
#[ignore]
async fn happy_release_on_publish() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let url = redis_url(&redis);
    let mut conn = admin(&url).await;

    let cfg = config(&url);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let sync = MessageSynchronizer::builder(cfg.clone(), RedisBackend::new(&cfg), tx).build();
    sync.connect().await.expect("connect");

    for (id, version) in [(1, 5), (2, 2), (3, 8), (4, 2)] {
        let deps = vec![Dependency::read("orders", version, NodeId(0))];
        sync.process_when_ready(Arc::new(Event { id, deps })).await;
    }

    bump(&mut conn, "orders", 2).await;
    assert_eq!(next_id(&mut rx).await, 2);
    assert_eq!(next_id(&mut rx).await, 4);

    bump(&mut conn, "orders", 8).await;
    assert_eq!(next_id(&mut rx).await, 1);
    assert_eq!(next_id(&mut rx).await, 3);

    // Already stored before the wait starts
    let deps = vec![Dependency::read("orders", 8, NodeId(0))];
    sync.process_when_ready(Arc::new(Event { id: 5, deps })).await;
    assert_eq!(next_id(&mut rx).await, 5);

    sync.shutdown().await;
}

#[tokio::test]
#[ignore]
async fn happy_recovery_unblocks_saturated_queue() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let url = redis_url(&redis);
    let mut conn = admin(&url).await;

    let cfg = SynchronizerConfig { prefetch: 1, recovery: true, ..config(&url) };
    let (tx, mut rx) = mpsc::unbounded_channel();
    let sync = MessageSynchronizer::builder(cfg.clone(), RedisBackend::new(&cfg), tx).build();
    sync.connect().await.expect("connect");

    let deps = vec![Dependency::write("ledger", 3, NodeId(0))];
    sync.process_when_ready(Arc::new(Event { id: 1, deps })).await;
    assert_eq!(next_id(&mut rx).await, 1);

    let version: u64 = conn.get("ledger").await.unwrap();
    assert_eq!(version, 3);

    sync.shutdown().await;
}

// =============================================================================
// Failure Scenarios
// =============================================================================

#[tokio::test]
#[ignore]
async fn failure_killed_subscriber_reconnects() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let url = redis_url(&redis);
    let mut conn = admin(&url).await;

    let cfg = config(&url);
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = errors.clone();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let sync = MessageSynchronizer::builder(cfg.clone(), RedisBackend::new(&cfg), tx)
        .error_notifier(move |e: &SyncError| sink.lock().push(e.clone()))
        .build();
    sync.connect().await.expect("connect");

    let deps = vec![Dependency::read("inventory", 1, NodeId(0))];
    sync.process_when_ready(Arc::new(Event { id: 1, deps })).await;

    let _: () = redis::cmd("CLIENT")
        .arg("KILL")
        .arg("TYPE")
        .arg("pubsub")
        .query_async(&mut conn)
        .await
        .expect("CLIENT KILL");

    let mut reconnected = false;
    for _ in 0..100 {
        let lost = errors.lock().iter().any(|e| matches!(e, SyncError::ConnectionLost { .. }));
        if lost && sync.state() == SynchronizerState::Connected {
            reconnected = true;
            break;
        }
        sleep(Duration::from_millis(50)).await;
    }
    assert!(reconnected, "synchronizer did not reconnect");

    // The abandoned wait comes back through redelivery
    let deps = vec![Dependency::read("inventory", 1, NodeId(0))];
    sync.process_when_ready(Arc::new(Event { id: 2, deps })).await;
    bump(&mut conn, "inventory", 1).await;
    assert_eq!(next_id(&mut rx).await, 2);

    sync.shutdown().await;
}

// =============================================================================
// Lifecycle
// =============================================================================

async fn subscriber_count(conn: &mut redis::aio::MultiplexedConnection, channel: &str) -> usize {
    let (_, count): (String, usize) = redis::cmd("PUBSUB")
        .arg("NUMSUB")
        .arg(channel)
        .query_async(conn)
        .await
        .expect("PUBSUB NUMSUB");
    count
}

#[tokio::test]
#[ignore]
async fn lifecycle_close_releases_pubsub_connection() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let url = redis_url(&redis);
    let mut conn = admin(&url).await;

    let cfg = config(&url);
    let backend = RedisBackend::new(&cfg);
    let mut node = backend.connect(NodeId(0), &url).await.expect("connect");
    node.subscriber.subscribe("orders").await.expect("subscribe");
    assert_eq!(subscriber_count(&mut conn, "orders").await, 1);

    node.subscriber.close().await.expect("close");
    assert!(node.subscriber.subscribe("orders").await.is_err());

    let mut released = false;
    for _ in 0..50 {
        if subscriber_count(&mut conn, "orders").await == 0 {
            released = true;
            break;
        }
        sleep(Duration::from_millis(50)).await;
    }
    assert!(released, "pub/sub connection still subscribed after close");

    // The subscribe ack, then no loss notice from the closed stream
    let ack = node.notifications.recv().await.expect("ack").expect("ack is ok");
    assert_eq!(ack, Notification::Subscribed("orders".into()));
    assert!(timeout(Duration::from_millis(200), node.notifications.recv()).await.is_err());
}
