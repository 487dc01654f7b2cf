//! Retrying wrapper around calls to one unreliable remote service.
//!
//! Transient failures (network errors, 5xx, rate limits) are retried after a
//! fixed backoff until the call succeeds or the task is cancelled. Anything
//! else fails straight away. An optional attempt cap turns endless retrying
//! into [`Error::RetriesExhausted`].

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::RetrySettings;
use crate::error::{Error, Result};
use crate::util::sleep_or_cancel;

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Fixed sleep between attempts.
    pub backoff: Duration,
    /// Total attempts allowed, None for unbounded.
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: Duration::from_secs(15),
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self {
            backoff: settings.backoff(),
            max_attempts: settings.max_attempts,
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts.max(1));
        self
    }
}

/// Calls one service under a [`RetryPolicy`], bound to a task's
/// cancellation token.
#[derive(Debug, Clone)]
pub struct RetryableClient {
    service: String,
    policy: RetryPolicy,
    cancel: CancellationToken,
    detailed: bool,
}

impl RetryableClient {
    pub fn new(service: impl Into<String>, policy: RetryPolicy, cancel: CancellationToken) -> Self {
        Self {
            service: service.into(),
            policy,
            cancel,
            detailed: false,
        }
    }

    /// Log every attempt and its outcome at DEBUG.
    pub fn with_detailed_logging(mut self, detailed: bool) -> Self {
        self.detailed = detailed;
        self
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `call` until it succeeds.
    ///
    /// Returns only with a success, a non-transient error, cancellation, or
    /// (with a cap configured) [`Error::RetriesExhausted`].
    pub async fn call<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.attempt(operation, call()).await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(service = %self.service, operation, attempt, "call recovered");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) if !e.is_transient() => {
                    error!(service = %self.service, operation, error = %e, "call failed, not retrying");
                    return Err(e);
                }
                Err(e) => {
                    if let Some(max) = self.policy.max_attempts {
                        if attempt >= max {
                            error!(service = %self.service, operation, attempt, error = %e, "retries exhausted");
                            return Err(Error::RetriesExhausted {
                                service: self.service.clone(),
                                attempts: attempt,
                            });
                        }
                    }
                    warn!(
                        service = %self.service,
                        operation,
                        attempt,
                        error = %e,
                        "call failed, retrying in {:?}",
                        self.policy.backoff
                    );
                    sleep_or_cancel(self.policy.backoff, &self.cancel).await?;
                }
            }
        }
    }

    /// A single cancellable try with no retry. Used where the caller owns
    /// the retry decision, as with provider failover.
    pub async fn attempt<T, Fut>(&self, operation: &str, fut: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if self.detailed {
            debug!(service = %self.service, operation, "request");
        }
        let result = tokio::select! {
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            result = fut => result,
        };
        if self.detailed {
            match &result {
                Ok(_) => debug!(service = %self.service, operation, "response ok"),
                Err(e) => debug!(service = %self.service, operation, error = %e, "response error"),
            }
        }
        result
    }
}
