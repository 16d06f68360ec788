//! Retry logic for transient gateway failures.
//!
//! [`with_retry`] wraps a side-effect-free operation (connect, evaluate,
//! endorse) and retries it while [`LedgerError::is_transient`] holds.
//! Submit and commit-status are never routed through here: resubmitting a
//! transaction whose first hand-off may have reached ordering is not safe.
//!
//! # Backoff Strategy
//!
//! - Base delay doubles with each attempt: `initial_backoff * 2^attempt`
//! - Delay is capped at `max_backoff`
//! - Random jitter of 0–50% of the computed delay is added

use std::{future::Future, time::Duration};

use fail::fail_point;
use rand::Rng;

use crate::{
    config::RetryConfig,
    error::{LedgerError, Result, TransactionPhase},
};

/// Executes `operation` with automatic retry on transient errors.
///
/// Returns the first success, the first non-transient error, or the last
/// transient error once `max_retries` retries are spent.
#[tracing::instrument(skip(config, operation), fields(max_retries = config.max_retries))]
pub(crate) async fn with_retry<F, Fut, T>(
    config: &RetryConfig,
    phase: TransactionPhase,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error: Option<LedgerError> = None;

    for attempt in 0..=config.max_retries {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::debug!(%phase, attempt = attempt + 1, "operation succeeded after retry");
                }
                return Ok(value);
            },
            Err(err) if err.is_transient() && attempt < config.max_retries => {
                let delay = compute_backoff(config, attempt);
                tracing::debug!(
                    %phase,
                    attempt = attempt + 1,
                    max_attempts = config.max_retries + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient error, retrying after backoff",
                );
                fail_point!("retry-before-sleep");
                tokio::time::sleep(delay).await;
                last_error = Some(err);
            },
            Err(err) => {
                if attempt > 0 && err.is_transient() {
                    tracing::warn!(%phase, attempts = attempt + 1, error = %err, "retries exhausted");
                }
                return Err(err);
            },
        }
    }

    Err(last_error
        .unwrap_or_else(|| LedgerError::connection("retry loop completed without result or error")))
}

/// Computes the backoff duration for the given attempt number.
///
/// `min(initial_backoff * 2^attempt, max_backoff) + random(0..50% of delay)`
fn compute_backoff(config: &RetryConfig, attempt: u32) -> Duration {
    let base = config.initial_backoff.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
    let capped = base.min(config.max_backoff);

    let jitter_range = capped.as_millis() as u64 / 2;
    if jitter_range > 0 {
        let jitter = rand::rng().random_range(0..=jitter_range);
        capped + Duration::from_millis(jitter)
    } else {
        capped
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn fast_config(max_retries: u32) -> RetryConfig {
        RetryConfig::builder()
            .max_retries(max_retries)
            .initial_backoff(Duration::from_millis(1))
            .max_backoff(Duration::from_millis(5))
            .build()
            .unwrap()
    }

    #[test]
    fn test_compute_backoff_exponential() {
        let config = RetryConfig::builder()
            .max_retries(5)
            .initial_backoff(Duration::from_millis(100))
            .max_backoff(Duration::from_secs(10))
            .build()
            .unwrap();

        let d0 = compute_backoff(&config, 0);
        assert!(d0 >= Duration::from_millis(100) && d0 <= Duration::from_millis(150));

        let d1 = compute_backoff(&config, 1);
        assert!(d1 >= Duration::from_millis(200) && d1 <= Duration::from_millis(300));

        let d2 = compute_backoff(&config, 2);
        assert!(d2 >= Duration::from_millis(400) && d2 <= Duration::from_millis(600));
    }

    #[test]
    fn test_compute_backoff_capped_at_max() {
        let config = RetryConfig::default();

        // 100ms * 2^6 = 6.4s, capped at 2s
        let d = compute_backoff(&config, 6);
        assert!(d >= Duration::from_secs(2));
        assert!(d <= Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_transient_failure() {
        let calls = AtomicU32::new(0);

        let result = with_retry(&fast_config(3), TransactionPhase::Evaluate, || {
            let attempt = calls.fetch_add(1, Ordering::Relaxed);
            async move {
                if attempt < 2 {
                    Err(LedgerError::connection("unavailable"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.ok(), Some(42));
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn test_configuration_error_not_retried() {
        let calls = AtomicU32::new(0);

        let result: Result<()> = with_retry(&fast_config(3), TransactionPhase::Connect, || {
            calls.fetch_add(1, Ordering::Relaxed);
            async { Err(LedgerError::configuration("malformed key")) }
        })
        .await;

        assert!(matches!(result, Err(LedgerError::Configuration { .. })));
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_endorsement_rejection_not_retried() {
        let calls = AtomicU32::new(0);

        let result: Result<()> = with_retry(&fast_config(3), TransactionPhase::Endorse, || {
            calls.fetch_add(1, Ordering::Relaxed);
            async {
                Err(LedgerError::Endorsement { tx_id: "tx".into(), message: "exists".into() })
            }
        })
        .await;

        assert!(matches!(result, Err(LedgerError::Endorsement { .. })));
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_retry_exhausted_returns_last_error() {
        let calls = AtomicU32::new(0);

        let result: Result<()> = with_retry(&fast_config(2), TransactionPhase::Evaluate, || {
            calls.fetch_add(1, Ordering::Relaxed);
            async {
                Err(LedgerError::Timeout {
                    phase: TransactionPhase::Evaluate,
                    deadline: Duration::from_secs(5),
                })
            }
        })
        .await;

        assert!(matches!(result, Err(LedgerError::Timeout { .. })));
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn test_retry_disabled() {
        let calls = AtomicU32::new(0);

        let result: Result<()> = with_retry(&RetryConfig::disabled(), TransactionPhase::Connect, || {
            calls.fetch_add(1, Ordering::Relaxed);
            async { Err(LedgerError::connection("refused")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }
}
