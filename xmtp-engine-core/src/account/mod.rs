//! Account registry
//!
//! Tracks the signed-in identities. Every other component references accounts
//! by [`AccountId`] but only the registry owns the list.

use crate::signal::{Observable, Subscription};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Wallet address identifying a signed-in account
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    /// Create an account id from an address
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// Address as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(address: &str) -> Self {
        Self::new(address)
    }
}

impl From<String> for AccountId {
    fn from(address: String) -> Self {
        Self(address)
    }
}

/// Accounts added and removed between two registry snapshots
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountDiff {
    /// Present now, absent before (in current order)
    pub added: Vec<AccountId>,
    /// Present before, absent now (in previous order)
    pub removed: Vec<AccountId>,
}

impl AccountDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Compute which accounts appeared and disappeared
pub fn diff_accounts(previous: &[AccountId], current: &[AccountId]) -> AccountDiff {
    let added = current
        .iter()
        .filter(|account| !previous.contains(account))
        .cloned()
        .collect();
    let removed = previous
        .iter()
        .filter(|account| !current.contains(account))
        .cloned()
        .collect();

    AccountDiff { added, removed }
}

/// Ordered list of known accounts
#[derive(Debug, Default)]
pub struct AccountRegistry {
    accounts: Observable<Vec<AccountId>>,
}

impl AccountRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry seeded with accounts (duplicates dropped)
    pub fn with_accounts(accounts: impl IntoIterator<Item = AccountId>) -> Self {
        let registry = Self::new();
        registry.accounts.update(|list| {
            for account in accounts {
                if !list.contains(&account) {
                    list.push(account);
                }
            }
        });
        registry
    }

    /// Add an account. Returns false if it was already known.
    pub fn add(&self, account: AccountId) -> bool {
        if self.contains(&account) {
            return false;
        }
        self.accounts.update(|list| list.push(account));
        true
    }

    /// Remove an account. Returns false if it was not known.
    pub fn remove(&self, account: &AccountId) -> bool {
        if !self.contains(account) {
            return false;
        }
        self.accounts.update(|list| list.retain(|existing| existing != account));
        true
    }

    /// Replace the whole account list
    pub fn set_accounts(&self, accounts: Vec<AccountId>) {
        let mut deduped = Vec::with_capacity(accounts.len());
        for account in accounts {
            if !deduped.contains(&account) {
                deduped.push(account);
            }
        }
        self.accounts.set(deduped);
    }

    /// Snapshot of the known accounts
    pub fn list(&self) -> Vec<AccountId> {
        self.accounts.get()
    }

    pub fn contains(&self, account: &AccountId) -> bool {
        self.accounts.get().contains(account)
    }

    pub fn len(&self) -> usize {
        self.accounts.get().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Listen for `(previous, current)` account lists
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Vec<AccountId>, &Vec<AccountId>) + Send + Sync + 'static,
    {
        self.accounts.subscribe(listener)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn ids(addresses: &[&str]) -> Vec<AccountId> {
        addresses.iter().map(|a| AccountId::from(*a)).collect()
    }

    #[test]
    fn test_diff_added_and_removed() {
        let diff = diff_accounts(&ids(&["0xA", "0xB"]), &ids(&["0xB", "0xC"]));
        assert_eq!(diff.added, ids(&["0xC"]));
        assert_eq!(diff.removed, ids(&["0xA"]));
    }

    #[test]
    fn test_diff_unchanged_is_empty() {
        let accounts = ids(&["0xA", "0xB"]);
        assert!(diff_accounts(&accounts, &accounts).is_empty());
    }

    #[test]
    fn test_add_and_remove() {
        let registry = AccountRegistry::new();
        assert!(registry.add(AccountId::from("0xA")));
        assert!(!registry.add(AccountId::from("0xA")));
        assert_eq!(registry.len(), 1);

        assert!(registry.remove(&AccountId::from("0xA")));
        assert!(!registry.remove(&AccountId::from("0xA")));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_with_accounts_dedupes() {
        let registry = AccountRegistry::with_accounts(ids(&["0xA", "0xA", "0xB"]));
        assert_eq!(registry.list(), ids(&["0xA", "0xB"]));
    }

    #[test]
    fn test_subscribers_receive_previous_list() {
        let registry = AccountRegistry::with_accounts(ids(&["0xA"]));
        let changes = Arc::new(Mutex::new(Vec::new()));

        let changes_clone = changes.clone();
        let _sub = registry.subscribe(move |prev, next| {
            changes_clone.lock().push(diff_accounts(prev, next));
        });

        registry.add(AccountId::from("0xB"));
        registry.remove(&AccountId::from("0xA"));

        let changes = changes.lock();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].added, ids(&["0xB"]));
        assert_eq!(changes[1].removed, ids(&["0xA"]));
    }

    proptest! {
        #[test]
        fn prop_diff_partitions_accounts(
            prev in proptest::collection::hash_set("0x[0-9a-f]{2}", 0..8),
            next in proptest::collection::hash_set("0x[0-9a-f]{2}", 0..8),
        ) {
            let previous: Vec<AccountId> = prev.into_iter().map(AccountId::from).collect();
            let current: Vec<AccountId> = next.into_iter().map(AccountId::from).collect();
            let diff = diff_accounts(&previous, &current);

            for account in &diff.added {
                prop_assert!(current.contains(account) && !previous.contains(account));
            }
            for account in &diff.removed {
                prop_assert!(previous.contains(account) && !current.contains(account));
            }
            let kept = current.iter().filter(|a| previous.contains(a)).count();
            prop_assert_eq!(kept + diff.added.len(), current.len());
        }
    }
}
