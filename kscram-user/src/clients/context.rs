//! Per-call bounds for remote admin requests.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::ClientError;

/// Cancellation signal and optional timeout applied to every remote call of a pass.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    cancel: CancellationToken,
    timeout: Option<Duration>,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run one remote call, returning promptly with `Canceled` or `TimedOut`
    /// when the context fires first.
    pub async fn run<T, F>(&self, call: F) -> Result<T, ClientError>
    where
        F: Future<Output = Result<T, ClientError>>,
    {
        if self.cancel.is_cancelled() {
            return Err(ClientError::Canceled);
        }

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ClientError::Canceled),
            result = self.run_to_completion(call) => result,
        }
    }

    /// Run a call bounded only by the timeout, ignoring cancellation.
    pub async fn run_to_completion<T, F>(&self, call: F) -> Result<T, ClientError>
    where
        F: Future<Output = Result<T, ClientError>>,
    {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .unwrap_or_else(|_| Err(ClientError::TimedOut(limit))),
            None => call.await,
        }
    }
}
