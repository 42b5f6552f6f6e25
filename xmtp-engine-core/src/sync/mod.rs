//! Client sync
//!
//! Brings each account's conversation list up to date once per session, and
//! again on every recovery resync. The first sync of an account also pulls
//! its blocked peers from the backend.

use crate::account::AccountId;
use crate::error::EngineError;
use crate::metrics;
use crate::providers::{AccountSource, ClientSyncProvider, ErrorReporter};
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Tracks which accounts have been synced this session
pub struct ClientSyncer {
    client: Arc<dyn ClientSyncProvider>,
    source: Arc<dyn AccountSource>,
    reporter: Arc<dyn ErrorReporter>,
    synced: Mutex<HashSet<AccountId>>,
}

impl ClientSyncer {
    pub fn new(
        client: Arc<dyn ClientSyncProvider>,
        source: Arc<dyn AccountSource>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        Self {
            client,
            source,
            reporter,
            synced: Mutex::new(HashSet::new()),
        }
    }

    pub fn is_synced(&self, account: &AccountId) -> bool {
        self.synced.lock().contains(account)
    }

    /// Sync accounts not seen before, then fetch their blocked peers
    ///
    /// Accounts no longer in `accounts` are forgotten first, so re-adding one
    /// syncs it again. Nothing is synced until `hydrated`. Returns the
    /// accounts that were synced.
    pub async fn sync_new_accounts(&self, accounts: &[AccountId], hydrated: bool) -> Vec<AccountId> {
        self.synced.lock().retain(|a| accounts.contains(a));
        if !hydrated {
            return Vec::new();
        }

        let unsynced: Vec<AccountId> = {
            let synced = self.synced.lock();
            accounts
                .iter()
                .filter(|a| !synced.contains(*a))
                .cloned()
                .collect()
        };
        if unsynced.is_empty() {
            return unsynced;
        }

        info!(count = unsynced.len(), "Syncing new accounts");
        self.sync_accounts(&unsynced).await;
        join_all(unsynced.iter().map(|a| self.refresh_blocked_peers(a))).await;
        unsynced
    }

    /// Sync every account in `accounts`, synced before or not
    pub async fn sync_accounts(&self, accounts: &[AccountId]) {
        // Marked before the call: a failed sync is not retried until the
        // next resync or until the account is re-added.
        self.synced.lock().extend(accounts.iter().cloned());
        join_all(accounts.iter().map(|a| self.sync_one(a))).await;
    }

    async fn sync_one(&self, account: &AccountId) {
        let snapshot = self.source.chat_snapshot(account).unwrap_or_default();
        debug!(
            account = %account,
            topics = snapshot.known_topics.len(),
            last_synced_at = ?snapshot.last_synced_at,
            "Syncing client"
        );

        if let Err(source) = self
            .client
            .sync_client(account, &snapshot.known_topics, snapshot.last_synced_at)
            .await
        {
            metrics::record_sync_failure();
            self.reporter.capture(&EngineError::ClientSync {
                account: account.clone(),
                source,
            });
        }
    }

    async fn refresh_blocked_peers(&self, account: &AccountId) {
        match self.client.fetch_blocked_peers(account).await {
            Ok(peers) => {
                debug!(account = %account, count = peers.len(), "Fetched blocked peers");
                self.source.set_blocked_peers(account, peers);
            }
            Err(source) => self.reporter.capture(&EngineError::BlockedPeers {
                account: account.clone(),
                source,
            }),
        }
    }
}
