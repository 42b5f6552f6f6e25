//! Collaborator traits
//!
//! The engine never talks to the messaging SDK, the local database or the
//! backend directly. Everything it needs is expressed here so the host app
//! (or a test) can plug in its own implementation.
//!
//! # Architecture
//!
//! ```text
//!            Engine
//!              |
//!   +----------+-----------+----------------+
//!   |          |           |                |
//!   v          v           v                v
//! StreamProvider  ClientSyncProvider  PendingFlusher  AccountSource
//!   |
//!   +---> SDK-backed streams (host app)
//!   +---> MemoryStreamProvider (adapters::memory)
//! ```

use crate::account::AccountId;
use crate::error::EngineError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type for collaborator calls
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Failure reported by an external collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Service could not be reached (offline, socket closed, client missing)
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// Service answered but refused the request
    #[error("request rejected: {0}")]
    Rejected(String),

    /// Anything else
    #[error("{0}")]
    Other(String),
}

/// Kind of long-lived subscription held per account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Conversations,
    Messages,
    Consent,
}

impl StreamKind {
    pub const ALL: [StreamKind; 3] = [
        StreamKind::Conversations,
        StreamKind::Messages,
        StreamKind::Consent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Conversations => "conversations",
            StreamKind::Messages => "messages",
            StreamKind::Consent => "consent",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of locally queued write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingKind {
    Conversations,
    Messages,
}

impl PendingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PendingKind::Conversations => "conversations",
            PendingKind::Messages => "messages",
        }
    }
}

impl fmt::Display for PendingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Conversation, message and consent stream services
///
/// `stop_stream` must be idempotent: the engine may call it for streams that
/// were never started or were already stopped.
#[async_trait]
pub trait StreamProvider: Send + Sync {
    /// Open the subscription for `kind`
    async fn start_stream(&self, account: &AccountId, kind: StreamKind) -> ProviderResult<()>;

    /// Close the subscription for `kind`
    async fn stop_stream(&self, account: &AccountId, kind: StreamKind) -> ProviderResult<()>;
}

/// Protocol client synchronisation and the blocked-peers backend call
#[async_trait]
pub trait ClientSyncProvider: Send + Sync {
    /// Bring the local conversation list up to date
    ///
    /// # Arguments
    ///
    /// * `account` - Account whose client should sync
    /// * `known_topics` - Topics already present locally
    /// * `last_synced_at` - Milliseconds since epoch of the previous sync, if any
    async fn sync_client(
        &self,
        account: &AccountId,
        known_topics: &[String],
        last_synced_at: Option<u64>,
    ) -> ProviderResult<()>;

    /// Addresses the account has blocked
    async fn fetch_blocked_peers(&self, account: &AccountId) -> ProviderResult<Vec<String>>;
}

/// Outbound queue of locally created conversations and messages
///
/// Items stay queued until acknowledged, so calls are safe to retry.
#[async_trait]
pub trait PendingFlusher: Send + Sync {
    /// Publish conversations created while offline. Returns how many went out.
    async fn flush_pending_conversations(&self, account: &AccountId) -> ProviderResult<usize>;

    /// Send queued messages. Returns how many went out.
    async fn flush_pending_messages(&self, account: &AccountId) -> ProviderResult<usize>;
}

/// Read-only view of a per-account chat store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSnapshot {
    pub known_topics: Vec<String>,
    pub last_synced_at: Option<u64>,
    pub local_client_connected: bool,
    pub initial_load_done: bool,
}

/// Synchronous per-account readiness queries
pub trait AccountSource: Send + Sync {
    /// Chat store state for the account, if it has one
    fn chat_snapshot(&self, account: &AccountId) -> Option<ChatSnapshot>;

    /// Whether a local database is open for the account
    fn has_data_source(&self, account: &AccountId) -> bool;

    /// Store the blocked peers fetched after the first sync
    fn set_blocked_peers(&self, account: &AccountId, peers: Vec<String>);
}

/// Sink for errors caught inside the engine
pub trait ErrorReporter: Send + Sync {
    fn capture(&self, error: &EngineError);
}

/// Reporter that logs captured errors through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorReporter;

impl ErrorReporter for TracingErrorReporter {
    fn capture(&self, error: &EngineError) {
        match (error.account(), error.stream_kind()) {
            (Some(account), Some(kind)) => {
                tracing::error!(account = %account, kind = %kind, error = %error, "captured engine error")
            }
            (Some(account), None) => {
                tracing::error!(account = %account, error = %error, "captured engine error")
            }
            _ => tracing::error!(error = %error, "captured engine error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_kind_names() {
        let names: Vec<&str> = StreamKind::ALL.iter().map(|k| k.as_str()).collect();
        assert_eq!(names, vec!["conversations", "messages", "consent"]);
    }

    #[test]
    fn test_provider_error_display() {
        assert_eq!(
            ProviderError::Rejected("forbidden".to_string()).to_string(),
            "request rejected: forbidden"
        );
        assert_eq!(ProviderError::Other("boom".to_string()).to_string(), "boom");
    }

    #[test]
    fn test_tracing_reporter_accepts_all_shapes() {
        let reporter = TracingErrorReporter;
        reporter.capture(&EngineError::ShutDown);
        reporter.capture(&EngineError::Cancelled {
            account: AccountId::from("0xA"),
            kind: StreamKind::Conversations,
        });
    }
}
