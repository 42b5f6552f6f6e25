//! Async test helpers
//!
//! The engine reacts to signals on background tasks, so tests usually need
//! to wait for a condition rather than for a specific future.

use std::future::Future;
use thiserror::Error;
use tokio::time::{timeout, Duration};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TimeoutError {
    #[error("operation timed out")]
    Elapsed,
}

/// Run a future with a timeout, returning Ok(result) or Err on timeout
pub async fn with_timeout<F, T>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    timeout(duration, future)
        .await
        .map_err(|_| TimeoutError::Elapsed)
}

/// Poll `condition` until it holds or `duration` elapses
///
/// Yields to the runtime between checks, so it also works under a paused
/// clock.
pub async fn wait_until<F>(duration: Duration, mut condition: F) -> Result<(), TimeoutError>
where
    F: FnMut() -> bool,
{
    with_timeout(duration, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
}

/// Helper to assert a future completes within duration
pub async fn assert_completes_within<F, T>(duration: Duration, future: F) -> T
where
    F: Future<Output = T>,
{
    match timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => panic!("Future did not complete within {:?}", duration),
    }
}

/// Assert `condition` becomes true within `duration`
pub async fn assert_eventually<F>(duration: Duration, condition: F, what: &str)
where
    F: FnMut() -> bool,
{
    if wait_until(duration, condition).await.is_err() {
        panic!("{} did not happen within {:?}", what, duration);
    }
}
