//! Per-account streaming
//!
//! [`StreamSupervisor`] owns the [`StreamingStore`] and is the only writer to
//! it. Each per-account start or stop runs as a [`StreamTask`].

pub mod state;
pub mod supervisor;
pub mod task;

pub use state::{StreamingState, StreamingStore};
pub use supervisor::{
    AccountStartReport, AccountStopReport, AccountsChangeOutcome, StartOutcome, StreamSupervisor,
};
pub use task::StreamTask;
