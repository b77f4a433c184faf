//! Retry controller.
//!
//! Wraps a single delivery attempt with bounded exponential backoff. Only
//! transient failures are retried; permanent ones are handed back so the
//! engine can park the envelope in the delivery queue.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::envelope::DeliveryId;
use crate::error::DeliveryError;

/// Retry policy for delivery attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry in milliseconds.
    pub initial_delay_ms: u64,
    /// Upper bound for any single delay in milliseconds.
    pub max_delay_ms: u64,
    /// Random spread applied to each delay, as a fraction (0.25 = ±25%).
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 60_000,
            jitter: 0.0,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based): `initial * 2^retry`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let delay_ms = self
            .initial_delay_ms
            .saturating_mul(2u64.saturating_pow(retry))
            .min(self.max_delay_ms);

        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 || delay_ms == 0 {
            return Duration::from_millis(delay_ms);
        }

        let spread = (rand::random::<f64>() * 2.0 - 1.0) * jitter;
        Duration::from_millis((delay_ms as f64 * (1.0 + spread)).round() as u64)
    }
}

/// Timer used between attempts.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// How a retried delivery ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome {
    /// The channel accepted the notification.
    Delivered(DeliveryId),
    /// Preferences suppressed the notification; the channel was not contacted.
    Suppressed,
    /// Permanent failure; the envelope belongs in the delivery queue.
    Rejected(DeliveryError),
    /// Transient failures outlasted the policy; the envelope is dropped.
    Exhausted(DeliveryError),
    /// The attempt was cancelled by the caller or by shutdown.
    Cancelled,
}

/// Runs delivery attempts under a [`RetryPolicy`].
pub struct RetryController {
    policy: RetryPolicy,
    sleeper: std::sync::Arc<dyn Sleeper>,
}

impl RetryController {
    pub fn new(policy: RetryPolicy, sleeper: std::sync::Arc<dyn Sleeper>) -> Self {
        Self { policy, sleeper }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `attempt` until it succeeds, fails permanently, runs out of
    /// retries, or `cancel` fires.
    ///
    /// `attempt` resolves to `Ok(None)` when the notification was suppressed.
    pub async fn run<F, Fut>(&self, cancel: &CancellationToken, mut attempt: F) -> RetryOutcome
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<DeliveryId>, DeliveryError>>,
    {
        let mut retries = 0u32;
        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return RetryOutcome::Cancelled,
                result = attempt() => result,
            };

            let error = match result {
                Ok(Some(id)) => return RetryOutcome::Delivered(id),
                Ok(None) => return RetryOutcome::Suppressed,
                Err(e) if !e.is_retryable() => {
                    debug!(error = %e, "Delivery failed permanently, not retrying");
                    return RetryOutcome::Rejected(e);
                }
                Err(e) => e,
            };

            if retries >= self.policy.max_retries {
                warn!(
                    "Delivery failed after {} attempts: {}",
                    retries + 1,
                    error
                );
                return RetryOutcome::Exhausted(error);
            }

            let delay = self.policy.delay_for(retries);
            debug!(
                "Transient delivery failure, retrying in {:?} (retry {}/{}): {}",
                delay,
                retries + 1,
                self.policy.max_retries,
                error
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return RetryOutcome::Cancelled,
                _ = self.sleeper.sleep(delay) => {}
            }
            retries += 1;
        }
    }
}
