//! Cancellable per-account tasks

use crate::account::AccountId;
use crate::error::{EngineError, EngineResult};
use std::future::Future;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A spawned per-account start or stop, paired with its cancellation token
///
/// The future receives a clone of the token and decides itself how to react
/// to cancellation; `cancel` only signals.
#[derive(Debug)]
pub struct StreamTask<T> {
    account: AccountId,
    token: CancellationToken,
    handle: JoinHandle<T>,
}

impl<T: Send + 'static> StreamTask<T> {
    /// Spawn `make(token)` on the current runtime
    pub fn spawn<F, Fut>(account: AccountId, token: CancellationToken, make: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let handle = tokio::spawn(make(token.clone()));
        Self {
            account,
            token,
            handle,
        }
    }

    pub fn account(&self) -> &AccountId {
        &self.account
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the task. A panic or abort becomes [`EngineError::TaskFailed`].
    pub async fn join(self) -> EngineResult<T> {
        let account = self.account;
        self.handle.await.map_err(|e| EngineError::TaskFailed {
            account,
            reason: e.to_string(),
        })
    }
}
