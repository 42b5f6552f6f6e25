//! Engine
//!
//! Owns every piece of coordination state and wires the signals to it. All
//! reactions to account, hydration and lifecycle changes go through one
//! event channel and are handled one at a time by the event loop. The loop
//! decides what to start and stop in event order, then hands the stream
//! calls to a [`JoinSet`] so a start that never returns cannot hold up
//! later events.
//!
//! ```text
//!  AccountRegistry ──┐
//!  hydration ────────┼──> EngineEvent ──> event loop ──> StreamSupervisor
//!  LifecycleWatcher ─┘                                └─> ClientSyncer
//!
//!  ticker ──> SyncCron ──> PendingFlusher
//! ```

use crate::account::{AccountId, AccountRegistry};
use crate::app_state::AppState;
use crate::config::EngineConfig;
use crate::cron::SyncCron;
use crate::error::EngineResult;
use crate::health::{cron_health, streaming_health, HealthReport};
use crate::lifecycle::{LifecycleWatcher, ResyncReason};
use crate::metrics;
use crate::providers::{
    AccountSource, ClientSyncProvider, ErrorReporter, PendingFlusher, StreamProvider,
};
use crate::shutdown::{ShutdownCoordinator, ShutdownHandler};
use crate::signal::Subscription;
use crate::streaming::{AccountsChangeOutcome, StreamSupervisor, StreamingState};
use crate::sync::ClientSyncer;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// External collaborators the engine drives
#[derive(Clone)]
pub struct EngineDeps {
    pub streams: Arc<dyn StreamProvider>,
    pub client_sync: Arc<dyn ClientSyncProvider>,
    pub flusher: Arc<dyn PendingFlusher>,
    pub source: Arc<dyn AccountSource>,
    pub reporter: Arc<dyn ErrorReporter>,
}

/// Work queued for the event loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Registry changed; `reachable` is sampled when the change happened
    AccountsChanged {
        previous: Vec<AccountId>,
        current: Vec<AccountId>,
        reachable: bool,
    },
    HydrationChanged { previous: bool, current: bool },
    Resync(ResyncReason),
}

struct EngineShared {
    config: EngineConfig,
    app: Arc<AppState>,
    accounts: Arc<AccountRegistry>,
    supervisor: StreamSupervisor,
    cron: SyncCron,
    syncer: ClientSyncer,
    started_at: Instant,
}

impl EngineShared {
    async fn handle_event(self: &Arc<Self>, event: EngineEvent, stream_work: &mut JoinSet<()>) {
        debug!(?event, "Handling engine event");
        match event {
            EngineEvent::AccountsChanged {
                previous,
                current,
                reachable,
            } => {
                let change = self
                    .supervisor
                    .handle_accounts_changed(&previous, &current, reachable);
                stream_work.spawn(async move {
                    if let AccountsChangeOutcome::Applied { started, stopped } = change.await {
                        debug!(
                            started = started.len(),
                            stopped = stopped.len(),
                            "Account change applied"
                        );
                    }
                });
                self.syncer
                    .sync_new_accounts(&current, self.app.hydration_done())
                    .await;
            }
            EngineEvent::HydrationChanged { previous, current } => {
                if !previous && current {
                    info!("Hydration done, syncing accounts");
                    self.syncer
                        .sync_new_accounts(&self.accounts.list(), true)
                        .await;
                }
            }
            EngineEvent::Resync(reason) => {
                metrics::record_resync(reason);
                let accounts = self.accounts.list();
                info!(reason = %reason, accounts = accounts.len(), "Resyncing all accounts");
                let restart = self.supervisor.restart_streaming(&accounts);
                let shared = self.clone();
                stream_work.spawn(async move {
                    restart.await;
                    shared.syncer.sync_accounts(&accounts).await;
                });
            }
        }
    }

    async fn run_event_loop(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<EngineEvent>,
        mut stream_work: JoinSet<()>,
    ) {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event, &mut stream_work).await,
                    None => break,
                },
                Some(result) = stream_work.join_next(), if !stream_work.is_empty() => {
                    if let Err(e) = result {
                        warn!(error = %e, "Stream work did not complete");
                    }
                }
            }
        }

        debug!(pending = stream_work.len(), "Event channel closed");
        while stream_work.join_next().await.is_some() {}
    }
}

/// A configured engine that has not been started
pub struct Engine {
    shared: Arc<EngineShared>,
}

impl Engine {
    /// Build the engine around shared app and account state
    ///
    /// Fails only if `config` does not validate.
    pub fn new(
        config: EngineConfig,
        app: Arc<AppState>,
        accounts: Arc<AccountRegistry>,
        deps: EngineDeps,
    ) -> EngineResult<Self> {
        config.validate()?;

        let supervisor = StreamSupervisor::new(
            deps.streams,
            deps.reporter.clone(),
            config.streaming.clone(),
        );
        let cron = SyncCron::new(
            config.cron.clone(),
            app.clone(),
            accounts.clone(),
            deps.source.clone(),
            deps.flusher,
            deps.reporter.clone(),
        );
        let syncer = ClientSyncer::new(deps.client_sync, deps.source, deps.reporter);

        Ok(Self {
            shared: Arc::new(EngineShared {
                config,
                app,
                accounts,
                supervisor,
                cron,
                syncer,
                started_at: Instant::now(),
            }),
        })
    }

    /// Install listeners, start every known account, then spawn the loops
    ///
    /// Mount streaming does not wait for reachability, and this returns
    /// without waiting for the mount starts to complete.
    pub async fn start(self) -> EngineHandle {
        metrics::init_metrics();
        let shared = self.shared;
        let (tx, rx) = mpsc::unbounded_channel();

        let registry_sub = {
            let tx = tx.clone();
            let app = shared.app.clone();
            shared.accounts.subscribe(move |previous, current| {
                let event = EngineEvent::AccountsChanged {
                    previous: previous.clone(),
                    current: current.clone(),
                    reachable: app.internet_reachable(),
                };
                if tx.send(event).is_err() {
                    debug!("Engine stopped, dropping account change");
                }
            })
        };

        let hydration_sub = {
            let tx = tx.clone();
            shared.app.hydration().subscribe(move |previous, current| {
                let event = EngineEvent::HydrationChanged {
                    previous: *previous,
                    current: *current,
                };
                if tx.send(event).is_err() {
                    debug!("Engine stopped, dropping hydration change");
                }
            })
        };

        let watcher = LifecycleWatcher::install(&shared.app, move |reason| {
            if tx.send(EngineEvent::Resync(reason)).is_err() {
                debug!("Engine stopped, dropping resync");
            }
        });

        let accounts = shared.accounts.list();
        info!(accounts = accounts.len(), "Starting engine");
        let mut stream_work = JoinSet::new();
        let mount = shared.supervisor.start_streaming(&accounts);
        stream_work.spawn(async move {
            mount.await;
        });
        shared
            .syncer
            .sync_new_accounts(&accounts, shared.app.hydration_done())
            .await;

        let coordinator = ShutdownCoordinator::new(shared.config.shutdown.timeout);

        let event_loop = {
            let handler = ShutdownHandler::new(&coordinator, "event_loop");
            let shared = shared.clone();
            tokio::spawn(async move {
                handler
                    .run(move || shared.run_event_loop(rx, stream_work))
                    .await
            })
        };

        let cron_loop = {
            let handler = ShutdownHandler::new(&coordinator, "sync_cron");
            let cron = shared.cron.clone();
            tokio::spawn(async move { handler.run(|| cron.run()).await })
        };

        EngineHandle {
            shared,
            subscriptions: vec![registry_sub, hydration_sub],
            watcher: Some(watcher),
            coordinator,
            tasks: vec![event_loop, cron_loop],
        }
    }
}

/// A running engine
///
/// Call [`shutdown`](Self::shutdown) to stop it gracefully. Dropping the
/// handle instead removes the listeners, cancels stream tasks and aborts
/// both loops without waiting.
pub struct EngineHandle {
    shared: Arc<EngineShared>,
    subscriptions: Vec<Subscription>,
    watcher: Option<LifecycleWatcher>,
    coordinator: ShutdownCoordinator,
    tasks: Vec<JoinHandle<()>>,
}

impl EngineHandle {
    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    pub fn app(&self) -> &Arc<AppState> {
        &self.shared.app
    }

    pub fn accounts(&self) -> &Arc<AccountRegistry> {
        &self.shared.accounts
    }

    pub fn supervisor(&self) -> &StreamSupervisor {
        &self.shared.supervisor
    }

    pub fn cron(&self) -> &SyncCron {
        &self.shared.cron
    }

    pub fn streaming_state(&self, account: &AccountId) -> StreamingState {
        self.shared.supervisor.streaming_state(account)
    }

    pub fn health(&self) -> HealthReport {
        let shared = &self.shared;
        HealthReport::new(
            shared.started_at.elapsed(),
            vec![
                streaming_health(
                    &shared.accounts.list(),
                    shared.supervisor.store(),
                    shared.app.internet_reachable(),
                    shared.config.streaming.consent_stream_enabled,
                ),
                cron_health(shared.cron.last_run(), shared.config.cron.stale_after),
            ],
        )
    }

    /// Remove listeners, cancel in-flight stream tasks and stop both loops
    pub async fn shutdown(mut self) {
        info!("Shutting down engine");
        if let Some(watcher) = self.watcher.take() {
            watcher.teardown();
        }
        for subscription in self.subscriptions.drain(..) {
            subscription.unsubscribe();
        }

        self.shared.supervisor.shutdown();
        let tasks = std::mem::take(&mut self.tasks);
        if !self.coordinator.shutdown(tasks).await {
            warn!("Engine shutdown was already in progress");
        }
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        if self.tasks.is_empty() {
            return;
        }

        warn!("Engine handle dropped without shutdown, aborting loops");
        self.shared.supervisor.shutdown();
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{
        MemoryAccountSource, MemoryClientSync, MemoryPendingQueue, MemoryStreamProvider,
        RecordingErrorReporter,
    };
    use crate::config::CronConfig;
    use crate::providers::StreamKind;
    use crate::test_utils::assert_eventually;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(2);

    fn deps(streams: Arc<MemoryStreamProvider>, client_sync: Arc<MemoryClientSync>) -> EngineDeps {
        EngineDeps {
            streams,
            client_sync,
            flusher: Arc::new(MemoryPendingQueue::new()),
            source: Arc::new(MemoryAccountSource::new()),
            reporter: Arc::new(RecordingErrorReporter::new()),
        }
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = EngineConfig::default();
        config.cron = CronConfig {
            tick_interval: Duration::ZERO,
            ..CronConfig::default()
        };

        let result = Engine::new(
            config,
            Arc::new(AppState::new()),
            Arc::new(AccountRegistry::new()),
            deps(
                Arc::new(MemoryStreamProvider::new()),
                Arc::new(MemoryClientSync::new()),
            ),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_mount_streams_known_accounts_while_offline() {
        let streams = Arc::new(MemoryStreamProvider::new());
        let a = AccountId::from("0xA");
        let app = Arc::new(AppState::new());
        let engine = Engine::new(
            EngineConfig::default(),
            app.clone(),
            Arc::new(AccountRegistry::with_accounts([a.clone()])),
            deps(streams.clone(), Arc::new(MemoryClientSync::new())),
        )
        .unwrap();

        let handle = engine.start().await;

        assert!(!app.internet_reachable());
        assert_eventually(
            WAIT,
            || {
                let state = handle.streaming_state(&a);
                state.is_streaming_conversations && state.is_streaming_messages
            },
            "mount start",
        )
        .await;
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_hydration_edge_triggers_initial_sync() {
        let client_sync = Arc::new(MemoryClientSync::new());
        let a = AccountId::from("0xA");
        let app = Arc::new(AppState::new());
        let handle = Engine::new(
            EngineConfig::default(),
            app.clone(),
            Arc::new(AccountRegistry::with_accounts([a.clone()])),
            deps(Arc::new(MemoryStreamProvider::new()), client_sync.clone()),
        )
        .unwrap()
        .start()
        .await;

        assert_eq!(client_sync.sync_count(&a), 0);
        app.set_hydration_done(true);
        assert_eventually(WAIT, || client_sync.sync_count(&a) == 1, "initial sync").await;

        // same value again is not an edge
        app.set_hydration_done(true);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(client_sync.sync_count(&a), 1);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_foreground_restarts_streams() {
        let streams = Arc::new(MemoryStreamProvider::new());
        let a = AccountId::from("0xA");
        let app = Arc::new(AppState::new());
        app.set_hydration_done(true);
        let handle = Engine::new(
            EngineConfig::default(),
            app.clone(),
            Arc::new(AccountRegistry::with_accounts([a.clone()])),
            deps(streams.clone(), Arc::new(MemoryClientSync::new())),
        )
        .unwrap()
        .start()
        .await;
        assert_eventually(
            WAIT,
            || handle.streaming_state(&a).is_streaming_messages,
            "mount start",
        )
        .await;

        app.set_lifecycle_state(crate::app_state::AppLifecycle::Background);
        app.set_lifecycle_state(crate::app_state::AppLifecycle::Active);

        assert_eventually(
            WAIT,
            || streams.start_calls(&a, StreamKind::Messages) == 2,
            "restart after foreground",
        )
        .await;
        assert_eq!(streams.stop_calls(&a, StreamKind::Messages), 1);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_removes_listeners() {
        let app = Arc::new(AppState::new());
        let accounts = Arc::new(AccountRegistry::new());
        let handle = Engine::new(
            EngineConfig::default(),
            app.clone(),
            accounts.clone(),
            deps(
                Arc::new(MemoryStreamProvider::new()),
                Arc::new(MemoryClientSync::new()),
            ),
        )
        .unwrap()
        .start()
        .await;

        assert_eq!(app.reachability().listener_count(), 1);
        assert_eq!(app.hydration().listener_count(), 1);

        handle.shutdown().await;

        assert_eq!(app.reachability().listener_count(), 0);
        assert_eq!(app.lifecycle().listener_count(), 0);
        assert_eq!(app.hydration().listener_count(), 0);
        assert!(accounts.add(AccountId::from("0xA")));
    }

    #[tokio::test]
    async fn test_start_returns_while_mount_start_is_in_flight() {
        let streams = Arc::new(MemoryStreamProvider::gated());
        let a = AccountId::from("0xA");
        let handle = Engine::new(
            EngineConfig::default(),
            Arc::new(AppState::new()),
            Arc::new(AccountRegistry::with_accounts([a.clone()])),
            deps(streams.clone(), Arc::new(MemoryClientSync::new())),
        )
        .unwrap()
        .start()
        .await;

        assert_eventually(WAIT, || streams.pending_starts() == 1, "mount start in flight").await;
        streams.release_starts(2);
        assert_eventually(
            WAIT,
            || handle.streaming_state(&a).is_streaming_messages,
            "mount start completes",
        )
        .await;
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_handle_stops_cron_and_streams() {
        let app = Arc::new(AppState::new());
        let a = AccountId::from("0xA");
        let handle = Engine::new(
            EngineConfig::default(),
            app.clone(),
            Arc::new(AccountRegistry::with_accounts([a.clone()])),
            deps(
                Arc::new(MemoryStreamProvider::new()),
                Arc::new(MemoryClientSync::new()),
            ),
        )
        .unwrap()
        .start()
        .await;
        let cron = handle.cron().clone();
        let supervisor = handle.supervisor().clone();

        drop(handle);
        app.set_splash_screen_hidden(true);
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert!(supervisor.is_shut_down());
        assert!(cron.last_run().is_none());
        assert_eq!(app.lifecycle().listener_count(), 0);
    }
}
