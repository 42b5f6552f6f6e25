//! Background coordination for a multi-account XMTP client
//!
//! Keeps conversation and message streams alive per account, flushes
//! pending writes on a cron, and resyncs when the app returns to the
//! foreground or the network comes back. The SDK, the local database and
//! the backend are reached only through the traits in [`providers`].

pub mod account;
pub mod adapters;
pub mod app_state;
pub mod config;
pub mod cron;
pub mod engine;
pub mod error;
pub mod health;
pub mod lifecycle;
pub mod logging;
pub mod metrics;
pub mod providers;
pub mod shutdown;
pub mod signal;
pub mod streaming;
pub mod sync;
pub mod test_utils;

pub use account::{AccountId, AccountRegistry};
pub use app_state::{AppLifecycle, AppState};
pub use config::EngineConfig;
pub use engine::{Engine, EngineDeps, EngineEvent, EngineHandle};
pub use error::{EngineError, EngineResult};
pub use logging::{init_logging, LogLevel};
pub use providers::StreamKind;
pub use streaming::{StreamSupervisor, StreamingState};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_exports() {
        let _ = LogLevel::Info;
        let _ = StreamKind::ALL;
        let _ = AppLifecycle::default();
        let _ = EngineConfig::default();
    }
}
