//! In-memory collaborators
//!
//! Every call is recorded and failures can be injected per account, so tests
//! can assert exactly what the engine asked for.

use crate::account::AccountId;
use crate::error::EngineError;
use crate::providers::{
    AccountSource, ChatSnapshot, ClientSyncProvider, ErrorReporter, PendingFlusher, PendingKind,
    ProviderError, ProviderResult, StreamKind, StreamProvider,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Semaphore;

#[derive(Default)]
struct StreamCalls {
    starts: HashMap<(AccountId, StreamKind), usize>,
    stops: HashMap<(AccountId, StreamKind), usize>,
    start_failures: HashMap<(AccountId, StreamKind), ProviderError>,
    stop_failures: HashMap<(AccountId, StreamKind), ProviderError>,
    start_panics: HashSet<(AccountId, StreamKind)>,
    open: HashSet<(AccountId, StreamKind)>,
}

/// Stream provider that keeps subscriptions in a set
///
/// With [`MemoryStreamProvider::gated`] every start blocks until a permit is
/// released, which lets tests hold a start in flight.
#[derive(Default)]
pub struct MemoryStreamProvider {
    calls: Mutex<StreamCalls>,
    gate: Option<Semaphore>,
    pending_starts: AtomicUsize,
}

impl MemoryStreamProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider whose starts wait for [`release_starts`](Self::release_starts)
    pub fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::default()
        }
    }

    /// Let `n` blocked starts proceed
    pub fn release_starts(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    /// Starts currently waiting on the gate
    pub fn pending_starts(&self) -> usize {
        self.pending_starts.load(Ordering::SeqCst)
    }

    pub fn fail_starts(&self, account: &AccountId, kind: StreamKind, error: ProviderError) {
        self.calls
            .lock()
            .start_failures
            .insert((account.clone(), kind), error);
    }

    pub fn fail_stops(&self, account: &AccountId, kind: StreamKind, error: ProviderError) {
        self.calls
            .lock()
            .stop_failures
            .insert((account.clone(), kind), error);
    }

    /// Make starts of `kind` for `account` panic inside the provider
    pub fn panic_starts(&self, account: &AccountId, kind: StreamKind) {
        self.calls
            .lock()
            .start_panics
            .insert((account.clone(), kind));
    }

    pub fn clear_failures(&self) {
        let mut calls = self.calls.lock();
        calls.start_failures.clear();
        calls.stop_failures.clear();
        calls.start_panics.clear();
    }

    pub fn start_calls(&self, account: &AccountId, kind: StreamKind) -> usize {
        self.calls
            .lock()
            .starts
            .get(&(account.clone(), kind))
            .copied()
            .unwrap_or(0)
    }

    pub fn stop_calls(&self, account: &AccountId, kind: StreamKind) -> usize {
        self.calls
            .lock()
            .stops
            .get(&(account.clone(), kind))
            .copied()
            .unwrap_or(0)
    }

    pub fn total_start_calls(&self) -> usize {
        self.calls.lock().starts.values().sum()
    }

    pub fn total_stop_calls(&self) -> usize {
        self.calls.lock().stops.values().sum()
    }

    /// Whether a subscription is open on the provider side
    pub fn is_open(&self, account: &AccountId, kind: StreamKind) -> bool {
        self.calls.lock().open.contains(&(account.clone(), kind))
    }
}

#[async_trait]
impl StreamProvider for MemoryStreamProvider {
    async fn start_stream(&self, account: &AccountId, kind: StreamKind) -> ProviderResult<()> {
        let key = (account.clone(), kind);
        *self.calls.lock().starts.entry(key.clone()).or_insert(0) += 1;

        if let Some(gate) = &self.gate {
            self.pending_starts.fetch_add(1, Ordering::SeqCst);
            let permit = gate.acquire().await;
            self.pending_starts.fetch_sub(1, Ordering::SeqCst);
            match permit {
                Ok(permit) => permit.forget(),
                Err(_) => return Err(ProviderError::Unavailable("gate closed".to_string())),
            }
        }

        let mut calls = self.calls.lock();
        if calls.start_panics.contains(&key) {
            drop(calls);
            panic!("stream provider panicked starting {kind} for {account}");
        }
        if let Some(error) = calls.start_failures.get(&key) {
            return Err(error.clone());
        }
        calls.open.insert(key);
        Ok(())
    }

    async fn stop_stream(&self, account: &AccountId, kind: StreamKind) -> ProviderResult<()> {
        let key = (account.clone(), kind);
        let mut calls = self.calls.lock();
        *calls.stops.entry(key.clone()).or_insert(0) += 1;

        if let Some(error) = calls.stop_failures.get(&key) {
            return Err(error.clone());
        }
        calls.open.remove(&key);
        Ok(())
    }
}

/// A recorded `sync_client` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncCall {
    pub account: AccountId,
    pub known_topics: Vec<String>,
    pub last_synced_at: Option<u64>,
}

#[derive(Default)]
struct SyncState {
    calls: Vec<SyncCall>,
    blocked_fetches: Vec<AccountId>,
    blocked: HashMap<AccountId, Vec<String>>,
    failures: HashMap<AccountId, ProviderError>,
}

/// Client sync provider with canned blocked-peer lists
#[derive(Default)]
pub struct MemoryClientSync {
    state: Mutex<SyncState>,
}

impl MemoryClientSync {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_blocked_peers(&self, account: &AccountId, peers: Vec<String>) {
        self.state.lock().blocked.insert(account.clone(), peers);
    }

    pub fn fail_syncs(&self, account: &AccountId, error: ProviderError) {
        self.state.lock().failures.insert(account.clone(), error);
    }

    pub fn calls(&self) -> Vec<SyncCall> {
        self.state.lock().calls.clone()
    }

    pub fn sync_count(&self, account: &AccountId) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| &c.account == account)
            .count()
    }

    pub fn blocked_fetches(&self) -> Vec<AccountId> {
        self.state.lock().blocked_fetches.clone()
    }
}

#[async_trait]
impl ClientSyncProvider for MemoryClientSync {
    async fn sync_client(
        &self,
        account: &AccountId,
        known_topics: &[String],
        last_synced_at: Option<u64>,
    ) -> ProviderResult<()> {
        let mut state = self.state.lock();
        state.calls.push(SyncCall {
            account: account.clone(),
            known_topics: known_topics.to_vec(),
            last_synced_at,
        });
        match state.failures.get(account) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    async fn fetch_blocked_peers(&self, account: &AccountId) -> ProviderResult<Vec<String>> {
        let mut state = self.state.lock();
        state.blocked_fetches.push(account.clone());
        Ok(state.blocked.get(account).cloned().unwrap_or_default())
    }
}

#[derive(Default)]
struct QueueState {
    pending: HashMap<(AccountId, PendingKind), usize>,
    failures: HashMap<(AccountId, PendingKind), ProviderError>,
    log: Vec<(AccountId, PendingKind)>,
}

/// Outbound queue holding a count of pending items per account and kind
#[derive(Default)]
pub struct MemoryPendingQueue {
    state: Mutex<QueueState>,
}

impl MemoryPendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `count` more items
    pub fn enqueue(&self, account: &AccountId, kind: PendingKind, count: usize) {
        *self
            .state
            .lock()
            .pending
            .entry((account.clone(), kind))
            .or_insert(0) += count;
    }

    pub fn pending(&self, account: &AccountId, kind: PendingKind) -> usize {
        self.state
            .lock()
            .pending
            .get(&(account.clone(), kind))
            .copied()
            .unwrap_or(0)
    }

    pub fn fail_flushes(&self, account: &AccountId, kind: PendingKind, error: ProviderError) {
        self.state
            .lock()
            .failures
            .insert((account.clone(), kind), error);
    }

    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    /// Every flush call in the order it was made
    pub fn flush_log(&self) -> Vec<(AccountId, PendingKind)> {
        self.state.lock().log.clone()
    }

    pub fn flush_count(&self) -> usize {
        self.state.lock().log.len()
    }

    fn flush(&self, account: &AccountId, kind: PendingKind) -> ProviderResult<usize> {
        let key = (account.clone(), kind);
        let mut state = self.state.lock();
        state.log.push(key.clone());
        if let Some(error) = state.failures.get(&key) {
            return Err(error.clone());
        }
        Ok(state.pending.remove(&key).unwrap_or(0))
    }
}

#[async_trait]
impl PendingFlusher for MemoryPendingQueue {
    async fn flush_pending_conversations(&self, account: &AccountId) -> ProviderResult<usize> {
        self.flush(account, PendingKind::Conversations)
    }

    async fn flush_pending_messages(&self, account: &AccountId) -> ProviderResult<usize> {
        self.flush(account, PendingKind::Messages)
    }
}

#[derive(Default)]
struct SourceState {
    snapshots: HashMap<AccountId, ChatSnapshot>,
    data_sources: HashSet<AccountId>,
    blocked: HashMap<AccountId, Vec<String>>,
}

/// Account readiness backed by plain maps
#[derive(Default)]
pub struct MemoryAccountSource {
    state: Mutex<SourceState>,
}

impl MemoryAccountSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Give `account` a connected, loaded chat store and an open database
    pub fn ready(self, account: &AccountId) -> Self {
        self.mark_ready(account);
        self
    }

    pub fn mark_ready(&self, account: &AccountId) {
        let mut state = self.state.lock();
        let snapshot = state.snapshots.entry(account.clone()).or_default();
        snapshot.local_client_connected = true;
        snapshot.initial_load_done = true;
        state.data_sources.insert(account.clone());
    }

    pub fn set_snapshot(&self, account: &AccountId, snapshot: ChatSnapshot) {
        self.state.lock().snapshots.insert(account.clone(), snapshot);
    }

    pub fn set_data_source(&self, account: &AccountId, open: bool) {
        let mut state = self.state.lock();
        if open {
            state.data_sources.insert(account.clone());
        } else {
            state.data_sources.remove(account);
        }
    }

    pub fn blocked_peers(&self, account: &AccountId) -> Option<Vec<String>> {
        self.state.lock().blocked.get(account).cloned()
    }
}

impl AccountSource for MemoryAccountSource {
    fn chat_snapshot(&self, account: &AccountId) -> Option<ChatSnapshot> {
        self.state.lock().snapshots.get(account).cloned()
    }

    fn has_data_source(&self, account: &AccountId) -> bool {
        self.state.lock().data_sources.contains(account)
    }

    fn set_blocked_peers(&self, account: &AccountId, peers: Vec<String>) {
        self.state.lock().blocked.insert(account.clone(), peers);
    }
}

/// Error reporter that keeps every captured error as its display string
#[derive(Default)]
pub struct RecordingErrorReporter {
    errors: Mutex<Vec<String>>,
}

impl RecordingErrorReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.errors.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.lock().is_empty()
    }
}

impl ErrorReporter for RecordingErrorReporter {
    fn capture(&self, error: &EngineError) {
        self.errors.lock().push(error.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_stream_provider_tracks_open_streams() {
        let provider = MemoryStreamProvider::new();
        let account = AccountId::from("0xA");

        provider
            .start_stream(&account, StreamKind::Messages)
            .await
            .unwrap();
        assert!(provider.is_open(&account, StreamKind::Messages));

        provider
            .stop_stream(&account, StreamKind::Messages)
            .await
            .unwrap();
        assert!(!provider.is_open(&account, StreamKind::Messages));

        // stopping again is fine
        provider
            .stop_stream(&account, StreamKind::Messages)
            .await
            .unwrap();
        assert_eq!(provider.stop_calls(&account, StreamKind::Messages), 2);
    }

    #[tokio::test]
    async fn test_gated_start_waits_for_release() {
        let provider = Arc::new(MemoryStreamProvider::gated());
        let account = AccountId::from("0xA");

        let task = {
            let provider = provider.clone();
            let account = account.clone();
            tokio::spawn(async move { provider.start_stream(&account, StreamKind::Messages).await })
        };

        while provider.pending_starts() == 0 {
            tokio::task::yield_now().await;
        }
        assert!(!provider.is_open(&account, StreamKind::Messages));

        provider.release_starts(1);
        task.await.unwrap().unwrap();
        assert!(provider.is_open(&account, StreamKind::Messages));
    }

    #[tokio::test]
    async fn test_pending_queue_drains_and_fails() {
        let queue = MemoryPendingQueue::new();
        let account = AccountId::from("0xA");
        queue.enqueue(&account, PendingKind::Messages, 3);

        assert_eq!(queue.flush_pending_messages(&account).await.unwrap(), 3);
        assert_eq!(queue.flush_pending_messages(&account).await.unwrap(), 0);

        queue.fail_flushes(
            &account,
            PendingKind::Conversations,
            ProviderError::Unavailable("offline".to_string()),
        );
        assert!(queue.flush_pending_conversations(&account).await.is_err());
        assert_eq!(queue.flush_count(), 3);
    }

    #[tokio::test]
    async fn test_client_sync_records_arguments() {
        let sync = MemoryClientSync::new();
        let account = AccountId::from("0xA");
        sync.set_blocked_peers(&account, vec!["0xBAD".to_string()]);

        sync.sync_client(&account, &["t1".to_string()], Some(42))
            .await
            .unwrap();
        let peers = sync.fetch_blocked_peers(&account).await.unwrap();

        assert_eq!(peers, vec!["0xBAD".to_string()]);
        assert_eq!(
            sync.calls(),
            vec![SyncCall {
                account: account.clone(),
                known_topics: vec!["t1".to_string()],
                last_synced_at: Some(42),
            }]
        );
    }

    #[test]
    fn test_account_source_ready_builder() {
        let account = AccountId::from("0xA");
        let source = MemoryAccountSource::new().ready(&account);

        let snapshot = source.chat_snapshot(&account).unwrap();
        assert!(snapshot.local_client_connected);
        assert!(snapshot.initial_load_done);
        assert!(source.has_data_source(&account));
        assert!(source.chat_snapshot(&AccountId::from("0xB")).is_none());
    }
}
