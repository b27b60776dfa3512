//! Retrying completion client
//!
//! Opens one segment per call. Transient server errors (500/503) are retried
//! with linear backoff; everything else is surfaced immediately. Both the
//! provider call and the backoff sleep stop as soon as the session is
//! cancelled.

use crate::provider::CompletionProvider;
use crate::retry::RetryPolicy;
use crate::segment::Segment;
use loom_core::{LoomError, Message, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Completion client that retries transient provider failures
#[derive(Clone)]
pub struct RetryingCompletionClient {
    provider: Arc<dyn CompletionProvider>,
    policy: RetryPolicy,
}

impl RetryingCompletionClient {
    pub fn new(provider: Arc<dyn CompletionProvider>) -> Self {
        Self {
            provider,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Open a segment for `messages`
    pub async fn complete(
        &self,
        messages: &[Message],
        cancel: &CancellationToken,
    ) -> Result<Segment> {
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            tracing::debug!(
                attempt,
                max_attempts = self.policy.max_attempts,
                "Requesting completion segment"
            );

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(LoomError::Aborted),
                result = self.provider.open_segment(messages) => result,
            };

            let err = match result {
                Ok(segment) => return Ok(segment),
                Err(err) => err,
            };

            if !err.is_transient() {
                tracing::error!(attempt, "Provider call failed permanently: {}", err);
                return Err(LoomError::ProviderRejected(err.to_string()));
            }

            if !self.policy.has_attempts_left(attempt) {
                tracing::error!(attempt, "Provider retries exhausted: {}", err);
                return Err(LoomError::ProviderExhausted {
                    attempts: attempt,
                    last_error: err.to_string(),
                });
            }

            let delay = self.policy.delay_before_retry(attempt);
            tracing::warn!(
                "Transient provider error ({}). Waiting {}ms before retry {}/{}",
                err,
                delay.as_millis(),
                attempt,
                self.policy.max_attempts - 1
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(LoomError::Aborted),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
