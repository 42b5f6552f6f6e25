//! Collaborator implementations shipped with the engine
//!
//! Only in-memory ones for now. The host app provides the SDK-backed
//! implementations; these exist for tests, the simulator and local tooling.

pub mod memory;

pub use memory::{
    MemoryAccountSource, MemoryClientSync, MemoryPendingQueue, MemoryStreamProvider,
    RecordingErrorReporter,
};
