use agentflow_core::{AgentflowError, AgentflowResult};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

/// Configures retry behaviour for step invocations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay in milliseconds for exponential backoff.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Maximum delay in milliseconds (cap for exponential backoff).
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// Whether a timed-out attempt counts as transient.
    #[serde(default)]
    pub retry_on_timeout: bool,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    200
}

fn default_backoff_max_ms() -> u64 {
    5_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            retry_on_timeout: false,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Whether `err` belongs to a failure class this policy retries.
    pub fn should_retry(&self, err: &AgentflowError) -> bool {
        err.is_transient() || (self.retry_on_timeout && err.is_timeout())
    }
}

/// Computes the backoff delay for a given attempt using exponential backoff
/// capped at `backoff_max_ms`.
pub fn compute_backoff(policy: &RetryPolicy, attempt: u32) -> Duration {
    let delay = policy
        .backoff_base_ms
        .saturating_mul(2u64.saturating_pow(attempt));
    Duration::from_millis(delay.min(policy.backoff_max_ms))
}

/// Run `op` under `policy`, strictly one attempt at a time.
///
/// `op` receives the zero-based attempt number. Returns the final result
/// together with the number of attempts made.
pub async fn run_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> (AgentflowResult<T>, u32)
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = AgentflowResult<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match op(attempt).await {
            Ok(value) => return (Ok(value), attempt + 1),
            Err(e) => {
                let attempts = attempt + 1;
                if !policy.should_retry(&e) {
                    return (Err(e), attempts);
                }
                if attempts >= max_attempts {
                    warn!(target_name = %label, attempts, error = %e, "Retries exhausted");
                    return (Err(e), attempts);
                }

                let delay = compute_backoff(policy, attempt);
                info!(
                    target_name = %label,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient failure, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
