use std::future::Future;
use std::time::Duration;

use crate::error::ProviderError;

const DEFAULT_MAX_RETRIES: u32 = 2;
const DEFAULT_BASE_DELAY_SECS: f64 = 1.0;
const DEFAULT_RATE_LIMIT_BASE_DELAY_SECS: f64 = 10.0;
const RATE_LIMIT_CAP_SECS: f64 = 60.0;
const CONNECTION_CAP_SECS: f64 = 8.0;
const NON_RETRIABLE_RATE_LIMIT_THRESHOLD_SECS: f64 = 90.0;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_secs: f64,
    pub rate_limit_base_delay_secs: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_secs: DEFAULT_BASE_DELAY_SECS,
            rate_limit_base_delay_secs: DEFAULT_RATE_LIMIT_BASE_DELAY_SECS,
        }
    }
}

/// Wraps an operation that may fail with a transient [`ProviderError`],
/// retrying with exponential backoff. Non-transient errors (authentication,
/// permission, not-found) are never retried. A rate limit whose
/// `retry_after` exceeds 90s is treated as non-retriable.
pub async fn retry_transient<T, F, Fut>(policy: RetryPolicy, mut op: F) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !err.is_transient() || attempt >= policy.max_retries {
                    return Err(err);
                }
                if let ProviderError::RateLimit { retry_after: Some(secs), .. } = &err {
                    if *secs > NON_RETRIABLE_RATE_LIMIT_THRESHOLD_SECS {
                        return Err(err);
                    }
                }
                let delay = backoff_delay(&err, &policy, attempt);
                tokio::time::sleep(Duration::from_secs_f64(delay)).await;
                attempt += 1;
            }
        }
    }
}

fn backoff_delay(err: &ProviderError, policy: &RetryPolicy, attempt: u32) -> f64 {
    match err {
        ProviderError::RateLimit { .. } => {
            let raw = policy.rate_limit_base_delay_secs * 2f64.powi(attempt as i32);
            raw.min(RATE_LIMIT_CAP_SECS)
        }
        ProviderError::Connection(_) => {
            let raw = policy.base_delay_secs * 2f64.powi(attempt as i32);
            raw.min(CONNECTION_CAP_SECS)
        }
        _ => policy.base_delay_secs * 2f64.powi(attempt as i32),
    }
}
