//! Error types for the engine
//!
//! Every failure in the coordination layer is isolated to one account and one
//! stream kind (or one cron iteration). These errors are handed to an
//! [`ErrorReporter`](crate::providers::ErrorReporter) and never re-thrown
//! across component boundaries.

use crate::account::AccountId;
use crate::config::ConfigError;
use crate::providers::{PendingKind, ProviderError, StreamKind};
use thiserror::Error;

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors raised while coordinating streams, syncs and flushes
#[derive(Error, Debug)]
pub enum EngineError {
    /// External stream start call rejected
    #[error("failed to start {kind} stream for {account}: {source}")]
    StreamStart {
        account: AccountId,
        kind: StreamKind,
        #[source]
        source: ProviderError,
    },

    /// External stream stop call rejected
    #[error("failed to stop {kind} stream for {account}: {source}")]
    StreamStop {
        account: AccountId,
        kind: StreamKind,
        #[source]
        source: ProviderError,
    },

    /// Stream start abandoned because its task was cancelled
    #[error("{kind} stream start for {account} was cancelled")]
    Cancelled { account: AccountId, kind: StreamKind },

    /// Protocol client sync failed
    #[error("client sync failed for {account}: {source}")]
    ClientSync {
        account: AccountId,
        #[source]
        source: ProviderError,
    },

    /// Blocked peers could not be fetched
    #[error("failed to fetch blocked peers for {account}: {source}")]
    BlockedPeers {
        account: AccountId,
        #[source]
        source: ProviderError,
    },

    /// Pending conversations or messages could not be flushed
    #[error("failed to flush pending {what} for {account}: {source}")]
    Flush {
        account: AccountId,
        what: PendingKind,
        #[source]
        source: ProviderError,
    },

    /// A spawned per-account task panicked or was aborted
    #[error("task for {account} did not complete: {reason}")]
    TaskFailed { account: AccountId, reason: String },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Engine was used after shutdown
    #[error("engine is shut down")]
    ShutDown,
}

impl EngineError {
    /// Account the error belongs to, if any
    pub fn account(&self) -> Option<&AccountId> {
        match self {
            EngineError::StreamStart { account, .. }
            | EngineError::StreamStop { account, .. }
            | EngineError::Cancelled { account, .. }
            | EngineError::ClientSync { account, .. }
            | EngineError::BlockedPeers { account, .. }
            | EngineError::Flush { account, .. }
            | EngineError::TaskFailed { account, .. } => Some(account),
            EngineError::Config(_) | EngineError::ShutDown => None,
        }
    }

    /// Stream kind the error belongs to, if any
    pub fn stream_kind(&self) -> Option<StreamKind> {
        match self {
            EngineError::StreamStart { kind, .. }
            | EngineError::StreamStop { kind, .. }
            | EngineError::Cancelled { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}
