//! Timeout and cancellation for remote calls.
//!
//! Every collaborator call made while creating a VM goes through
//! [`RemoteCalls`], which bounds it by the configured timeout and aborts it
//! when the caller flips the cancellation signal to `true`.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tracing::debug;

use crate::error::CpiError;

/// Guard applied to each remote call of one `create_vm` invocation.
pub struct RemoteCalls {
    timeout: Duration,
    cancel: watch::Receiver<bool>,
}

impl RemoteCalls {
    pub fn new(timeout: Duration, cancel: watch::Receiver<bool>) -> Self {
        Self { timeout, cancel }
    }

    /// Run a remote call, honouring both the timeout and cancellation.
    pub async fn call<T, F>(&mut self, operation: &'static str, fut: F) -> Result<T, CpiError>
    where
        F: Future<Output = Result<T, CpiError>>,
    {
        let timeout = self.timeout;
        let cancel = &mut self.cancel;

        let cancelled = async {
            loop {
                if *cancel.borrow_and_update() {
                    return;
                }
                if cancel.changed().await.is_err() {
                    // Sender gone: cancellation can no longer be requested.
                    std::future::pending::<()>().await;
                }
            }
        };

        tokio::select! {
            biased;
            _ = cancelled => {
                debug!(operation, "Remote call cancelled");
                Err(CpiError::Cancelled { operation })
            }
            result = bounded(timeout, operation, fut) => result,
        }
    }

    /// Run a remote call that must not be interrupted by cancellation.
    ///
    /// Used for rollback, which has to be attempted even when the caller
    /// has given up on the operation.
    pub async fn call_uncancellable<T, F>(
        &self,
        operation: &'static str,
        fut: F,
    ) -> Result<T, CpiError>
    where
        F: Future<Output = Result<T, CpiError>>,
    {
        bounded(self.timeout, operation, fut).await
    }
}

async fn bounded<T, F>(timeout: Duration, operation: &'static str, fut: F) -> Result<T, CpiError>
where
    F: Future<Output = Result<T, CpiError>>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| CpiError::Timeout {
            operation,
            elapsed: timeout,
        })?
}
