//! Sync cron
//!
//! Flushes pending conversations and messages for every ready account. The
//! ticker fires often; actual passes are spaced by `cron.min_interval` and
//! never overlap.

use crate::account::{AccountId, AccountRegistry};
use crate::app_state::AppState;
use crate::config::CronConfig;
use crate::error::EngineError;
use crate::metrics::{self, PassTimer};
use crate::providers::{AccountSource, ErrorReporter, PendingFlusher, PendingKind};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

/// Result of one tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// A pass is still running
    Busy,
    /// The previous pass finished less than `min_interval` ago
    TooSoon,
    /// The app has not hidden its splash screen yet
    NotReady,
    /// A pass ran
    Ran(CronPassReport),
}

/// Accounts touched by a pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CronPassReport {
    /// Accounts whose queues were flushed
    pub flushed: Vec<AccountId>,
    /// Accounts not ready this pass
    pub skipped: Vec<AccountId>,
    /// Accounts where a flush failed
    pub failed: Vec<AccountId>,
    /// Items sent across all accounts
    pub items: usize,
}

struct CronInner {
    config: CronConfig,
    app: Arc<AppState>,
    accounts: Arc<AccountRegistry>,
    source: Arc<dyn AccountSource>,
    flusher: Arc<dyn PendingFlusher>,
    reporter: Arc<dyn ErrorReporter>,
    running: AtomicBool,
    last_run: Mutex<Option<Instant>>,
}

/// Periodic flush of pending writes
#[derive(Clone)]
pub struct SyncCron {
    inner: Arc<CronInner>,
}

/// Clears the run flag when a pass ends, including on panic
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl SyncCron {
    pub fn new(
        config: CronConfig,
        app: Arc<AppState>,
        accounts: Arc<AccountRegistry>,
        source: Arc<dyn AccountSource>,
        flusher: Arc<dyn PendingFlusher>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        Self {
            inner: Arc::new(CronInner {
                config,
                app,
                accounts,
                source,
                flusher,
                reporter,
                running: AtomicBool::new(false),
                last_run: Mutex::new(None),
            }),
        }
    }

    /// When the last pass completed
    pub fn last_run(&self) -> Option<Instant> {
        *self.inner.last_run.lock()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &CronConfig {
        &self.inner.config
    }

    /// Handle one ticker firing
    pub async fn tick(&self) -> TickOutcome {
        if self.is_running() {
            metrics::record_cron_skip("busy");
            return TickOutcome::Busy;
        }

        if let Some(last) = self.last_run() {
            if last.elapsed() <= self.inner.config.min_interval {
                metrics::record_cron_skip("too_soon");
                return TickOutcome::TooSoon;
            }
        }

        self.run_pass().await
    }

    /// Run a pass now, ignoring the spacing check
    ///
    /// Still refuses to run before the splash screen is hidden or while
    /// another pass holds the run flag.
    pub async fn run_pass(&self) -> TickOutcome {
        if !self.inner.app.splash_screen_hidden() {
            metrics::record_cron_skip("not_ready");
            return TickOutcome::NotReady;
        }

        if self
            .inner
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            metrics::record_cron_skip("busy");
            return TickOutcome::Busy;
        }
        let _guard = RunGuard(&self.inner.running);
        let _timer = PassTimer::start();

        let mut report = CronPassReport::default();
        for account in self.inner.accounts.list() {
            if !self.is_account_ready(&account) {
                trace!(account = %account, "Account not ready, skipping flush");
                report.skipped.push(account);
                continue;
            }

            match self.flush_account(&account).await {
                Ok(items) => {
                    report.items += items;
                    report.flushed.push(account);
                }
                Err(e) => {
                    metrics::record_cron_flush_failure();
                    self.inner.reporter.capture(&e);
                    report.failed.push(account);
                }
            }
        }

        *self.inner.last_run.lock() = Some(Instant::now());
        debug!(
            flushed = report.flushed.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            items = report.items,
            "Cron pass complete"
        );
        TickOutcome::Ran(report)
    }

    /// Drive ticks every `tick_interval` until the returned future is dropped
    ///
    /// Each tick runs as its own task so a slow pass never delays the ticker;
    /// overlapping ticks resolve to [`TickOutcome::Busy`]. Dropping the future
    /// aborts any pass still in flight.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.inner.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut passes = JoinSet::new();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let cron = self.clone();
                    passes.spawn(async move { cron.tick().await });
                }
                Some(result) = passes.join_next(), if !passes.is_empty() => {
                    if let Err(e) = result {
                        warn!(error = %e, "Cron pass did not complete");
                    }
                }
            }
        }
    }

    fn is_account_ready(&self, account: &AccountId) -> bool {
        let Some(snapshot) = self.inner.source.chat_snapshot(account) else {
            return false;
        };
        snapshot.local_client_connected
            && snapshot.initial_load_done
            && self.inner.source.has_data_source(account)
    }

    async fn flush_account(&self, account: &AccountId) -> Result<usize, EngineError> {
        let conversations = self
            .inner
            .flusher
            .flush_pending_conversations(account)
            .await
            .map_err(|source| EngineError::Flush {
                account: account.clone(),
                what: PendingKind::Conversations,
                source,
            })?;
        metrics::record_cron_flushed(PendingKind::Conversations.as_str(), conversations);

        let messages = self
            .inner
            .flusher
            .flush_pending_messages(account)
            .await
            .map_err(|source| EngineError::Flush {
                account: account.clone(),
                what: PendingKind::Messages,
                source,
            })?;
        metrics::record_cron_flushed(PendingKind::Messages.as_str(), messages);

        Ok(conversations + messages)
    }
}
