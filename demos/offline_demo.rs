// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Offline-first walkthrough.
//!
//! Demonstrates:
//! 1. Composing a repository from a config (memory or SQLite local store)
//! 2. Saving typing results while the backend is healthy
//! 3. An outage: saves stay local, the circuit opens, reads go offline
//! 4. Recovery: the cool-down passes and the queue drains
//! 5. Displaying metrics
//!
//! # Run
//!
//! ```bash
//! cargo run --example offline_demo
//! # Durable local store:
//! TYPING_SYNC_CONFIG='{"local_db_path": "/tmp/typing.db"}' cargo run --example offline_demo
//! ```

use std::sync::Arc;
use std::time::Duration;

use metrics_util::debugging::{DebugValue, DebuggingRecorder};
use serde_json::json;
use tracing_subscriber::EnvFilter;
use typing_sync::{
    HybridRepository, InMemoryLocalStore, InMemoryRemoteStore, LocalStore, Record, RecordFilter, RemoteErrorKind,
    SqliteLocalStore, SyncConfig, SystemClock,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("typing_sync=info")))
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║           typing-sync: Offline-First Walkthrough              ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Resolve config once, pick the stores
    // ─────────────────────────────────────────────────────────────────────────
    let config = match std::env::var("TYPING_SYNC_CONFIG") {
        Ok(text) => SyncConfig::from_json(&text)?,
        Err(_) => SyncConfig {
            sync_interval_ms: 500,
            backoff_base_ms: 200,
            ..Default::default()
        },
    };
    let config = SyncConfig {
        circuit: typing_sync::CircuitConfig {
            cool_down: Duration::from_secs(2),
            ..config.circuit.clone()
        },
        ..config
    };

    let local: Arc<dyn LocalStore> = match &config.local_db_path {
        Some(path) => {
            println!("📦 Local store: SQLite at {path}");
            Arc::new(SqliteLocalStore::open(path).await?)
        }
        None => {
            println!("📦 Local store: in-memory");
            Arc::new(InMemoryLocalStore::new())
        }
    };
    let remote = Arc::new(InMemoryRemoteStore::new());

    let repo = HybridRepository::open(local, remote.clone(), Arc::new(SystemClock), config).await?;
    repo.start().await;

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Healthy backend
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📝 Saving results with the backend up...");
    for (i, wpm) in [72, 78, 81].into_iter().enumerate() {
        let record = Record::test_result(format!("run-{i}"), "alice", json!({ "wpm": wpm, "accuracy": 0.96 }));
        repo.save(record).await?;
        println!("   └─ run-{i}: {wpm} wpm");
    }
    print_status(&repo).await;

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Outage
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🔌 Backend goes down...");
    remote.set_outage(Some(RemoteErrorKind::Unavailable));
    for (i, wpm) in [84, 86, 83, 90, 88, 91].into_iter().enumerate() {
        let id = format!("run-{}", i + 3);
        repo.save(Record::test_result(id.as_str(), "alice", json!({ "wpm": wpm }))).await?;
        println!("   └─ {id}: {wpm} wpm (saved locally)");
    }
    repo.save(Record::preferences("prefs-alice", "alice", json!({ "theme": "dark", "layout": "dvorak" })))
        .await?;

    let results = repo.get_by_owner("alice", &RecordFilter::default()).await?;
    println!("   📖 {} records visible, offline: {}", results.len(), results.is_offline);
    print_status(&repo).await;

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Recovery
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🔋 Backend back up, waiting for the cool-down and drain...");
    remote.set_outage(None);
    for _ in 0..20 {
        tokio::time::sleep(Duration::from_millis(500)).await;
        if repo.get_sync_status().await.pending_count == 0 {
            break;
        }
    }
    print_status(&repo).await;

    let results = repo.get_by_owner("alice", &RecordFilter::default()).await?;
    println!("   📖 {} records visible, offline: {}", results.len(), results.is_offline);
    println!("   ☁️  {} records on the backend", remote.len());

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Metrics
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📊 Metrics:");
    for (key, _, _, value) in snapshotter.snapshot().into_vec() {
        let value = match value {
            DebugValue::Counter(v) => v.to_string(),
            DebugValue::Gauge(v) => format!("{:.0}", v.into_inner()),
            DebugValue::Histogram(v) => format!("{} samples", v.len()),
        };
        println!("   └─ {} = {}", key.key().name(), value);
    }

    println!("\n🛑 Shutting down...");
    repo.shutdown().await;
    println!("   ✅ Done\n");
    Ok(())
}

async fn print_status(repo: &HybridRepository) {
    let status = repo.get_sync_status().await;
    println!(
        "   ┌─ pending: {}, dead letters: {}, circuit: {}, last sync: {:?}",
        status.pending_count, status.dead_letter_count, status.breaker_status, status.last_sync_at
    );
}
