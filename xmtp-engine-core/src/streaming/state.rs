//! Per-account streaming flags

use crate::account::AccountId;
use crate::providers::StreamKind;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Which subscriptions are believed active for one account
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamingState {
    pub is_streaming_conversations: bool,
    pub is_streaming_messages: bool,
    pub is_streaming_consent: bool,
}

impl StreamingState {
    pub fn get(&self, kind: StreamKind) -> bool {
        match kind {
            StreamKind::Conversations => self.is_streaming_conversations,
            StreamKind::Messages => self.is_streaming_messages,
            StreamKind::Consent => self.is_streaming_consent,
        }
    }

    pub fn set(&mut self, kind: StreamKind, streaming: bool) {
        match kind {
            StreamKind::Conversations => self.is_streaming_conversations = streaming,
            StreamKind::Messages => self.is_streaming_messages = streaming,
            StreamKind::Consent => self.is_streaming_consent = streaming,
        }
    }

    /// All flags false
    pub fn is_idle(&self) -> bool {
        *self == StreamingState::default()
    }
}

/// Account → [`StreamingState`] map owned by the stream supervisor
///
/// Reads are public; writes are crate-private so only the supervisor mutates
/// it. The lock is never held across an `.await`.
#[derive(Debug, Default)]
pub struct StreamingStore {
    states: RwLock<HashMap<AccountId, StreamingState>>,
}

impl StreamingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// State for `account`; all-false if it has never streamed
    pub fn get(&self, account: &AccountId) -> StreamingState {
        self.states.read().get(account).copied().unwrap_or_default()
    }

    pub fn snapshot(&self) -> HashMap<AccountId, StreamingState> {
        self.states.read().clone()
    }

    /// Number of accounts with any flag set
    pub fn active_accounts(&self) -> usize {
        self.states.read().values().filter(|s| !s.is_idle()).count()
    }

    /// Set `kind` to true if it is false. Returns whether this call flipped it.
    pub(crate) fn try_claim(&self, account: &AccountId, kind: StreamKind) -> bool {
        let mut states = self.states.write();
        let state = states.entry(account.clone()).or_default();
        if state.get(kind) {
            return false;
        }
        state.set(kind, true);
        true
    }

    pub(crate) fn update(&self, account: &AccountId, kind: StreamKind, streaming: bool) {
        self.states
            .write()
            .entry(account.clone())
            .or_default()
            .set(kind, streaming);
    }

    pub(crate) fn reset(&self, account: &AccountId) {
        self.states.write().remove(account);
    }

    pub(crate) fn clear(&self) {
        self.states.write().clear();
    }
}
