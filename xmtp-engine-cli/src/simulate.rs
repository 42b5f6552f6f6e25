//! Scripted engine run on in-memory collaborators

use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use xmtp_engine_core::adapters::memory::{
    MemoryAccountSource, MemoryClientSync, MemoryPendingQueue, MemoryStreamProvider,
    RecordingErrorReporter,
};
use xmtp_engine_core::config::EngineConfig;
use xmtp_engine_core::health::HealthReport;
use xmtp_engine_core::providers::PendingKind;
use xmtp_engine_core::{
    AccountId, AccountRegistry, AppLifecycle, AppState, Engine, EngineDeps, StreamKind,
    StreamingState,
};

/// Printed at the end of a run
#[derive(Debug, Serialize)]
pub struct Summary {
    pub duration_ms: u128,
    pub accounts: Vec<AccountSummary>,
    pub cron_flush_calls: usize,
    pub errors: Vec<String>,
    pub health: HealthReport,
}

#[derive(Debug, Serialize)]
pub struct AccountSummary {
    pub account: AccountId,
    pub streaming: StreamingState,
    pub stream_starts: usize,
    pub stream_stops: usize,
    pub client_syncs: usize,
    pub pending_messages: usize,
}

/// One scripted change to the app signals, at a fraction of the run
#[derive(Debug, Clone, Copy, PartialEq)]
enum Step {
    GoOffline,
    GoOnline,
    Background,
    Foreground,
}

const SCRIPT: [(f64, Step); 4] = [
    (0.25, Step::GoOffline),
    (0.5, Step::GoOnline),
    (0.625, Step::Background),
    (0.75, Step::Foreground),
];

fn apply(app: &AppState, step: Step) {
    info!(?step, "Simulation step");
    match step {
        Step::GoOffline => app.set_internet_reachable(false),
        Step::GoOnline => app.set_internet_reachable(true),
        Step::Background => app.set_lifecycle_state(AppLifecycle::Background),
        Step::Foreground => app.set_lifecycle_state(AppLifecycle::Active),
    }
}

pub async fn run(config: EngineConfig, addresses: &[String], duration: Duration) -> Result<Summary> {
    let accounts: Vec<AccountId> = addresses.iter().map(|a| AccountId::from(a.as_str())).collect();

    let app = Arc::new(AppState::new());
    let registry = Arc::new(AccountRegistry::with_accounts(accounts.clone()));
    let streams = Arc::new(MemoryStreamProvider::new());
    let client_sync = Arc::new(MemoryClientSync::new());
    let queue = Arc::new(MemoryPendingQueue::new());
    let source = Arc::new(MemoryAccountSource::new());
    let reporter = Arc::new(RecordingErrorReporter::new());

    for account in &accounts {
        source.mark_ready(account);
        queue.enqueue(account, PendingKind::Conversations, 1);
        queue.enqueue(account, PendingKind::Messages, 3);
    }

    let deps = EngineDeps {
        streams: streams.clone(),
        client_sync: client_sync.clone(),
        flusher: queue.clone(),
        source: source.clone(),
        reporter: reporter.clone(),
    };
    let engine = Engine::new(config, app.clone(), registry, deps)?.start().await;

    app.set_internet_reachable(true);
    app.set_hydration_done(true);
    app.set_splash_screen_hidden(true);

    let started = tokio::time::Instant::now();
    let script = async {
        for (at, step) in SCRIPT {
            tokio::time::sleep_until(started + duration.mul_f64(at)).await;
            apply(&app, step);
        }
        tokio::time::sleep_until(started + duration).await;
    };

    tokio::select! {
        _ = script => {}
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!(error = %e, "Failed to listen for Ctrl+C");
            } else {
                info!("Interrupted, stopping early");
            }
        }
    }

    let summary = Summary {
        duration_ms: started.elapsed().as_millis(),
        accounts: accounts
            .iter()
            .map(|account| AccountSummary {
                account: account.clone(),
                streaming: engine.streaming_state(account),
                stream_starts: StreamKind::ALL
                    .iter()
                    .map(|kind| streams.start_calls(account, *kind))
                    .sum(),
                stream_stops: StreamKind::ALL
                    .iter()
                    .map(|kind| streams.stop_calls(account, *kind))
                    .sum(),
                client_syncs: client_sync.sync_count(account),
                pending_messages: queue.pending(account, PendingKind::Messages),
            })
            .collect(),
        cron_flush_calls: queue.flush_count(),
        errors: reporter.errors(),
        health: engine.health(),
    };

    engine.shutdown().await;
    Ok(summary)
}
