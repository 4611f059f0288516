// src/ingest/retry.rs
//! Fixed-delay retry executor.
//!
//! An operation gets `max_retries + 1` attempts with a constant delay between
//! them. The outcome is a value, never an error: exhaustion is reported as
//! [`RetryOutcome::Failed`] with the last error and the attempt count.

use std::future::Future;
use std::time::Duration;

use metrics::counter;

use crate::ingest::types::Collector;
use crate::model::RawItem;

pub const DEFAULT_MAX_RETRIES: u32 = 2;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Delay strategy between attempts. Swapped out in tests so no real time passes.
#[async_trait::async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, delay: Duration);
}

pub struct TokioSleeper;

#[async_trait::async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}

/// Returns immediately; records nothing.
pub struct NoopSleeper;

#[async_trait::async_trait]
impl Sleeper for NoopSleeper {
    async fn sleep(&self, _delay: Duration) {}
}

#[derive(Debug)]
pub enum RetryOutcome<T> {
    Success { data: T, attempts: u32 },
    Failed { error: anyhow::Error, attempts: u32 },
}

impl<T> RetryOutcome<T> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryOutcome::Success { attempts, .. } | RetryOutcome::Failed { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RetryOutcome::Success { .. })
    }
}

/// Run `op` until it succeeds or the policy is exhausted.
pub async fn execute_with_retry<T, F, Fut>(
    label: &str,
    policy: RetryPolicy,
    sleeper: &dyn Sleeper,
    mut op: F,
) -> RetryOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let max_attempts = policy.max_attempts();
    let mut attempt = 1;
    loop {
        tracing::debug!(target: "ingest", collector = label, attempt, max_attempts, "attempt");
        counter!("collector_attempts_total").increment(1);

        match op().await {
            Ok(data) => return RetryOutcome::Success { data, attempts: attempt },
            Err(error) => {
                tracing::warn!(
                    target: "ingest",
                    collector = label,
                    attempt,
                    max_attempts,
                    error = %format!("{error:#}"),
                    "attempt failed"
                );
                if attempt >= max_attempts {
                    counter!("collector_failures_total").increment(1);
                    return RetryOutcome::Failed { error, attempts: attempt };
                }
                tracing::info!(
                    target: "ingest",
                    collector = label,
                    delay_secs = policy.delay.as_secs_f64(),
                    "retrying after delay"
                );
                sleeper.sleep(policy.delay).await;
                attempt += 1;
            }
        }
    }
}

/// `collect()` wrapped in the collector's own retry policy.
pub async fn collect_with_retry(
    collector: &dyn Collector,
    sleeper: &dyn Sleeper,
) -> RetryOutcome<Vec<RawItem>> {
    execute_with_retry(
        collector.name(),
        collector.retry_policy(),
        sleeper,
        || collector.collect(),
    )
    .await
}
