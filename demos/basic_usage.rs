// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic causal-sync usage example.
//!
//! Demonstrates:
//! 1. Connecting to Redis
//! 2. Submitting messages that depend on versioned keys
//! 3. Releasing them by publishing versions
//! 4. Recovery of a message nothing will ever unblock
//! 5. Displaying metrics
//! 6. Clean shutdown
//!
//! # Prerequisites
//!
//! ```bash
//! docker run --rm -p 6379:6379 redis:7-alpine
//! ```
//!
//! # Run
//!
//! ```bash
//! cargo run --example basic_usage
//! ```

use std::sync::Arc;
use std::time::Duration;

use causal_sync::{
    Dependency, Message, MessageSynchronizer, RedisBackend, SyncError, SynchronizerConfig,
};
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use redis::AsyncCommands;
use tokio::sync::mpsc;
use tokio::time::timeout;

struct Payment {
    id: u32,
    created_at: i64,
    deps: Vec<Dependency>,
}

impl Message for Payment {
    fn timestamp(&self) -> i64 {
        self.created_at
    }

    fn happens_before_dependencies(&self) -> &[Dependency] {
        &self.deps
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║             causal-sync: Basic Usage Example                  ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Configure and connect
    // ─────────────────────────────────────────────────────────────────────────
    let config = SynchronizerConfig {
        nodes: vec!["redis://localhost:6379".into()],
        // Recover as soon as two messages are stuck
        prefetch: 2,
        recovery: true,
        ..Default::default()
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<Arc<Payment>>();
    let backend = RedisBackend::new(&config);
    let sync = MessageSynchronizer::builder(config.clone(), backend, tx)
        .error_notifier(|e: &SyncError| eprintln!("   ⚠  {}", e))
        .build();

    sync.connect().await?;
    println!("🔌 Connected: {}", sync.state());

    let mut writer = redis::Client::open("redis://localhost:6379")?
        .get_multiplexed_async_connection()
        .await?;
    let _: () = redis::cmd("DEL").arg("demo:account").arg("demo:audit").query_async(&mut writer).await?;

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Submit a message waiting on demo:account v1
    // ─────────────────────────────────────────────────────────────────────────
    let account = config.node_for_key("demo:account");
    sync.process_when_ready(Arc::new(Payment {
        id: 1,
        created_at: 1,
        deps: vec![Dependency::read("demo:account", 1, account)],
    }))
    .await;
    println!("📥 Payment 1 waiting on demo:account v1");

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Publish the version
    // ─────────────────────────────────────────────────────────────────────────
    let _: () = writer.set("demo:account", 1u64).await?;
    let _: () = writer.publish("demo:account", 1u64).await?;
    if let Ok(Some(payment)) = timeout(Duration::from_secs(2), rx.recv()).await {
        println!("✅ Payment {} released", payment.id);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Two messages nobody will unblock: recovery kicks in
    // ─────────────────────────────────────────────────────────────────────────
    let audit = config.node_for_key("demo:audit");
    for (id, version) in [(2, 4), (3, 5)] {
        sync.process_when_ready(Arc::new(Payment {
            id,
            created_at: id as i64,
            deps: vec![Dependency::write("demo:audit", version, audit)],
        }))
        .await;
    }
    if let Ok(Some(payment)) = timeout(Duration::from_secs(2), rx.recv()).await {
        println!("🩹 Payment {} released by recovery", payment.id);
    }

    let stats = sync.stats().await;
    println!(
        "📊 nodes={} subscriptions={} queued={} processed={}",
        stats.nodes, stats.subscriptions, stats.queued_messages, stats.processed_messages
    );

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Metrics
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📈 Metrics:");
    dump_metrics(&snapshotter);

    // ─────────────────────────────────────────────────────────────────────────
    // 6. Shutdown
    // ─────────────────────────────────────────────────────────────────────────
    sync.shutdown().await;
    println!("\n👋 {}", sync.state());
    Ok(())
}

fn dump_metrics(snapshotter: &Snapshotter) {
    let mut counters = vec![];
    let mut gauges = vec![];

    for (composite_key, _, _, value) in snapshotter.snapshot().into_vec() {
        let (_, key) = composite_key.into_parts();
        let labels: Vec<_> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
        let label_str = if labels.is_empty() { String::new() } else { format!("{{{}}}", labels.join(",")) };

        match value {
            DebugValue::Counter(v) => counters.push((key.name().to_string(), label_str, v)),
            DebugValue::Gauge(v) => gauges.push((key.name().to_string(), label_str, v.into_inner())),
            DebugValue::Histogram(_) => {}
        }
    }
    counters.sort_by(|a, b| a.0.cmp(&b.0));
    gauges.sort_by(|a, b| a.0.cmp(&b.0));

    for (name, labels, value) in &counters {
        println!("   counter {}{} = {}", name, labels, value);
    }
    for (name, labels, value) in &gauges {
        println!("   gauge   {}{} = {:.0}", name, labels, value);
    }
    if counters.is_empty() && gauges.is_empty() {
        println!("   (no metrics recorded)");
    }
}
