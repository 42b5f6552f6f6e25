//! Stream supervisor
//!
//! Keeps conversation and message streams running for every known account.
//! Starts are optimistic: the flag is set before the external call and rolled
//! back if the call fails, so a later trigger (remount, reconnect, foreground)
//! can retry. Stops are best effort: the flags are reset whatever the
//! external calls return.
//!
//! Every operation spawns its per-account tasks before returning, and the
//! returned future only collects their reports. Callers can therefore hand
//! the future off without waiting, and the order in which operations were
//! issued still holds: in-flight starts are cancelled the moment a stop is
//! issued, and a start issued after a stop waits for that stop to finish.

use super::state::{StreamingState, StreamingStore};
use super::task::StreamTask;
use crate::account::{diff_accounts, AccountDiff, AccountId};
use crate::config::StreamingConfig;
use crate::error::EngineError;
use crate::metrics;
use crate::providers::{ErrorReporter, StreamKind, StreamProvider};
use futures::future::{join_all, FutureExt, Shared};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What happened to one stream kind during a start
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StartOutcome {
    /// External start succeeded
    Started,
    /// Flag was already set; no call issued
    AlreadyActive,
    /// External start failed; flag rolled back
    Failed,
    /// Task was cancelled before the start completed; flag rolled back
    Cancelled,
    /// Kind is switched off in configuration
    Disabled,
}

/// Per-account result of [`StreamSupervisor::start_streaming`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountStartReport {
    pub account: AccountId,
    pub conversations: StartOutcome,
    pub messages: StartOutcome,
    pub consent: StartOutcome,
}

impl AccountStartReport {
    pub fn outcome(&self, kind: StreamKind) -> StartOutcome {
        match kind {
            StreamKind::Conversations => self.conversations,
            StreamKind::Messages => self.messages,
            StreamKind::Consent => self.consent,
        }
    }
}

/// Per-account result of [`StreamSupervisor::stop_streaming`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountStopReport {
    pub account: AccountId,
    /// Kinds whose external stop call failed
    pub failed: Vec<StreamKind>,
}

/// Result of reacting to an account-list change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountsChangeOutcome {
    /// Device offline; diff dropped until the next reconnect resync
    IgnoredOffline,
    /// Diff applied
    Applied {
        started: Vec<AccountStartReport>,
        stopped: Vec<AccountStopReport>,
    },
}

/// Resolves when a stop finishes, whichever way it ends
type StopDone = Shared<oneshot::Receiver<()>>;

struct SupervisorInner {
    streams: Arc<dyn StreamProvider>,
    reporter: Arc<dyn ErrorReporter>,
    store: StreamingStore,
    config: StreamingConfig,
    root: CancellationToken,
    in_flight: Mutex<HashMap<AccountId, CancellationToken>>,
    stopping: Mutex<HashMap<AccountId, (u64, StopDone)>>,
    next_stop: AtomicU64,
}

/// Starts and stops per-account streams
#[derive(Clone)]
pub struct StreamSupervisor {
    inner: Arc<SupervisorInner>,
}

impl StreamSupervisor {
    /// Create a supervisor over `streams`, reporting failures to `reporter`
    pub fn new(
        streams: Arc<dyn StreamProvider>,
        reporter: Arc<dyn ErrorReporter>,
        config: StreamingConfig,
    ) -> Self {
        Self {
            inner: Arc::new(SupervisorInner {
                streams,
                reporter,
                store: StreamingStore::new(),
                config,
                root: CancellationToken::new(),
                in_flight: Mutex::new(HashMap::new()),
                stopping: Mutex::new(HashMap::new()),
                next_stop: AtomicU64::new(0),
            }),
        }
    }

    /// Current flags for `account`
    pub fn streaming_state(&self, account: &AccountId) -> StreamingState {
        self.inner.store.get(account)
    }

    /// Flags for every account that has streamed
    pub fn snapshot(&self) -> HashMap<AccountId, StreamingState> {
        self.inner.store.snapshot()
    }

    /// Read access to the underlying store
    pub fn store(&self) -> &StreamingStore {
        &self.inner.store
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.root.is_cancelled()
    }

    /// Start missing streams for each account
    ///
    /// Accounts run as independent tasks. Within one account conversations are
    /// attempted before messages, and a failure of one kind does not prevent
    /// the other. After [`shutdown`](Self::shutdown) nothing is spawned and
    /// [`EngineError::ShutDown`] is reported instead.
    pub fn start_streaming(
        &self,
        accounts: &[AccountId],
    ) -> impl Future<Output = Vec<AccountStartReport>> + Send + 'static {
        let tasks: Vec<StreamTask<AccountStartReport>> = if self.is_shut_down() {
            warn!(accounts = accounts.len(), "Ignoring start request after shutdown");
            self.inner.reporter.capture(&EngineError::ShutDown);
            Vec::new()
        } else {
            accounts
                .iter()
                .map(|account| {
                    let token = self.account_token(account);
                    let pending_stop = self.pending_stop(account);
                    let inner = self.inner.clone();
                    let account_clone = account.clone();
                    StreamTask::spawn(account.clone(), token, move |token| {
                        start_account(inner, account_clone, token, pending_stop)
                    })
                })
                .collect()
        };

        let inner = self.inner.clone();
        async move {
            let mut reports = Vec::with_capacity(tasks.len());
            for result in join_all(tasks.into_iter().map(StreamTask::join)).await {
                match result {
                    Ok(report) => reports.push(report),
                    // The task released its own claims while unwinding.
                    Err(e) => inner.reporter.capture(&e),
                }
            }

            metrics::set_streaming_accounts(inner.store.active_accounts());
            reports
        }
    }

    /// Stop every stream kind for each account and reset its flags
    ///
    /// Any in-flight start for the account is cancelled before this returns.
    /// The three stop calls run concurrently; their failures are reported but
    /// the account state is always reset afterwards.
    pub fn stop_streaming(
        &self,
        accounts: &[AccountId],
    ) -> impl Future<Output = Vec<AccountStopReport>> + Send + 'static {
        let tasks: Vec<StreamTask<AccountStopReport>> = accounts
            .iter()
            .map(|account| {
                if let Some(token) = self.inner.in_flight.lock().remove(account) {
                    debug!(account = %account, "Cancelling in-flight stream start");
                    token.cancel();
                }

                let ticket = self.begin_stop(account);
                let inner = self.inner.clone();
                let account_clone = account.clone();
                StreamTask::spawn(account.clone(), self.inner.root.child_token(), move |token| {
                    stop_account(inner, account_clone, token, ticket)
                })
            })
            .collect();

        let inner = self.inner.clone();
        async move {
            let mut reports = Vec::with_capacity(tasks.len());
            for result in join_all(tasks.into_iter().map(|task| {
                let account = task.account().clone();
                async move { (account, task.join().await) }
            }))
            .await
            {
                match result {
                    (_, Ok(report)) => reports.push(report),
                    (account, Err(e)) => {
                        inner.store.reset(&account);
                        inner.reporter.capture(&e);
                        reports.push(AccountStopReport {
                            account,
                            failed: StreamKind::ALL.to_vec(),
                        });
                    }
                }
            }

            metrics::set_streaming_accounts(inner.store.active_accounts());
            reports
        }
    }

    /// Stop then start, forcing fresh subscriptions
    pub fn restart_streaming(
        &self,
        accounts: &[AccountId],
    ) -> impl Future<Output = Vec<AccountStartReport>> + Send + 'static {
        let stop = self.stop_streaming(accounts);
        let start = self.start_streaming(accounts);
        async move {
            stop.await;
            start.await
        }
    }

    /// React to an account-list change
    ///
    /// While offline the diff is dropped entirely; newly added accounts only
    /// start streaming on the next reachability-regained resync.
    pub fn handle_accounts_changed(
        &self,
        previous: &[AccountId],
        current: &[AccountId],
        reachable: bool,
    ) -> impl Future<Output = AccountsChangeOutcome> + Send + 'static {
        let scheduled = if reachable {
            let AccountDiff { added, removed } = diff_accounts(previous, current);

            let start = (!added.is_empty()).then(|| {
                info!(count = added.len(), "Starting streams for new accounts");
                self.start_streaming(&added)
            });
            let stop = (!removed.is_empty()).then(|| {
                info!(count = removed.len(), "Stopping streams for removed accounts");
                self.stop_streaming(&removed)
            });
            Some((start, stop))
        } else {
            debug!(
                previous = previous.len(),
                current = current.len(),
                "Offline, ignoring account list change"
            );
            None
        };

        async move {
            match scheduled {
                None => AccountsChangeOutcome::IgnoredOffline,
                Some((start, stop)) => {
                    let (started, stopped) = tokio::join!(
                        async {
                            match start {
                                Some(start) => start.await,
                                None => Vec::new(),
                            }
                        },
                        async {
                            match stop {
                                Some(stop) => stop.await,
                                None => Vec::new(),
                            }
                        },
                    );
                    AccountsChangeOutcome::Applied { started, stopped }
                }
            }
        }
    }

    /// Cancel every in-flight task and forget all flags
    pub fn shutdown(&self) {
        self.inner.root.cancel();
        self.inner.in_flight.lock().clear();
        self.inner.store.clear();
        metrics::set_streaming_accounts(0);
    }

    fn account_token(&self, account: &AccountId) -> CancellationToken {
        self.inner
            .in_flight
            .lock()
            .entry(account.clone())
            .or_insert_with(|| self.inner.root.child_token())
            .clone()
    }

    fn pending_stop(&self, account: &AccountId) -> Option<StopDone> {
        self.inner
            .stopping
            .lock()
            .get(account)
            .map(|(_, done)| done.clone())
    }

    fn begin_stop(&self, account: &AccountId) -> StopTicket {
        let (tx, rx) = oneshot::channel();
        let id = self.inner.next_stop.fetch_add(1, Ordering::Relaxed);
        self.inner
            .stopping
            .lock()
            .insert(account.clone(), (id, rx.shared()));
        StopTicket {
            inner: self.inner.clone(),
            account: account.clone(),
            id,
            _done: tx,
        }
    }
}

/// Held by a stop task; dropping it wakes starts queued behind the stop
struct StopTicket {
    inner: Arc<SupervisorInner>,
    account: AccountId,
    id: u64,
    _done: oneshot::Sender<()>,
}

impl Drop for StopTicket {
    fn drop(&mut self) {
        let mut stopping = self.inner.stopping.lock();
        if stopping.get(&self.account).map(|(id, _)| *id) == Some(self.id) {
            stopping.remove(&self.account);
        }
    }
}

/// Kinds a start task has claimed and not yet settled
///
/// If the task unwinds, the claims are released so a later trigger retries
/// them. Kinds claimed by other tasks are left alone.
struct Claims<'a> {
    store: &'a StreamingStore,
    account: &'a AccountId,
    kinds: Vec<StreamKind>,
}

impl Claims<'_> {
    fn release(&mut self, kind: StreamKind) {
        self.kinds.retain(|k| *k != kind);
        self.store.update(self.account, kind, false);
    }

    fn settle(mut self) {
        self.kinds.clear();
    }
}

impl Drop for Claims<'_> {
    fn drop(&mut self) {
        for kind in self.kinds.drain(..) {
            self.store.update(self.account, kind, false);
        }
    }
}

async fn start_account(
    inner: Arc<SupervisorInner>,
    account: AccountId,
    token: CancellationToken,
    pending_stop: Option<StopDone>,
) -> AccountStartReport {
    if let Some(stop) = pending_stop {
        debug!(account = %account, "Waiting for stop before starting");
        tokio::select! {
            biased;
            _ = token.cancelled() => {}
            _ = stop => {}
        }
    }

    let mut claims = Claims {
        store: &inner.store,
        account: &account,
        kinds: Vec::new(),
    };
    let conversations = start_kind(&inner, &mut claims, StreamKind::Conversations, &token).await;
    let messages = start_kind(&inner, &mut claims, StreamKind::Messages, &token).await;
    let consent = if inner.config.consent_stream_enabled {
        start_kind(&inner, &mut claims, StreamKind::Consent, &token).await
    } else {
        StartOutcome::Disabled
    };
    claims.settle();

    AccountStartReport {
        account,
        conversations,
        messages,
        consent,
    }
}

async fn start_kind(
    inner: &SupervisorInner,
    claims: &mut Claims<'_>,
    kind: StreamKind,
    token: &CancellationToken,
) -> StartOutcome {
    let account = claims.account;
    if token.is_cancelled() {
        return StartOutcome::Cancelled;
    }
    if !inner.store.try_claim(account, kind) {
        return StartOutcome::AlreadyActive;
    }
    claims.kinds.push(kind);

    info!(account = %account, kind = %kind, "Starting stream");

    let result = tokio::select! {
        biased;
        _ = token.cancelled() => Err(EngineError::Cancelled {
            account: account.clone(),
            kind,
        }),
        res = inner.streams.start_stream(account, kind) => res.map_err(|source| EngineError::StreamStart {
            account: account.clone(),
            kind,
            source,
        }),
    };

    match result {
        Ok(()) => {
            metrics::record_stream_start(kind, true);
            StartOutcome::Started
        }
        Err(e) => {
            claims.release(kind);
            metrics::record_stream_start(kind, false);
            let outcome = match e {
                EngineError::Cancelled { .. } => StartOutcome::Cancelled,
                _ => StartOutcome::Failed,
            };
            inner.reporter.capture(&e);
            outcome
        }
    }
}

async fn stop_account(
    inner: Arc<SupervisorInner>,
    account: AccountId,
    token: CancellationToken,
    _ticket: StopTicket,
) -> AccountStopReport {
    info!(account = %account, "Stopping streams");

    let stops = async {
        tokio::join!(
            inner.streams.stop_stream(&account, StreamKind::Messages),
            inner.streams.stop_stream(&account, StreamKind::Conversations),
            inner.streams.stop_stream(&account, StreamKind::Consent),
        )
    };

    let mut failed = Vec::new();
    tokio::select! {
        _ = token.cancelled() => {
            warn!(account = %account, "Stream stop interrupted by shutdown");
        }
        (messages, conversations, consent) = stops => {
            for (kind, result) in [
                (StreamKind::Messages, messages),
                (StreamKind::Conversations, conversations),
                (StreamKind::Consent, consent),
            ] {
                if let Err(source) = result {
                    metrics::record_stream_stop_failure(kind);
                    inner.reporter.capture(&EngineError::StreamStop {
                        account: account.clone(),
                        kind,
                        source,
                    });
                    failed.push(kind);
                }
            }
        }
    }

    inner.store.reset(&account);
    AccountStopReport { account, failed }
}
