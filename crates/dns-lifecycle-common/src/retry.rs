//! Retry utilities with exponential backoff
//!
//! Two consumers share one backoff curve: [`retry_with_backoff`] for
//! one-shot startup calls (CRD install, first list) where jitter spreads
//! out restarts, and the per-key rate limiter of the work queue which uses
//! the deterministic [`RetryConfig::delay_for_attempt`] so consecutive
//! failures never produce a shorter delay.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

/// Exponential backoff parameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryConfig {
    /// Maximum number of attempts (0 = infinite)
    pub max_attempts: u32,
    /// Delay after the first failure
    #[serde(with = "duration_millis")]
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,
    /// Growth factor between consecutive delays
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Create a config with a maximum number of attempts and short delays,
    /// suited for startup calls
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            ..Default::default()
        }
    }

    /// Delay to wait before retrying after the `attempt`-th consecutive failure
    ///
    /// `attempt` is 1-based. The result is `initial * multiplier^(attempt-1)`
    /// capped at `max_delay`, and is non-decreasing in `attempt`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let factor = self.backoff_multiplier.max(1.0).powi(exp);
        let secs = self.initial_delay.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

/// Run `operation` until it succeeds, sleeping a jittered backoff between
/// failures
///
/// Gives up with the last error after `max_attempts` failures; never gives
/// up when `max_attempts` is 0.
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut failures = 0u32;
    loop {
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        failures = failures.saturating_add(1);

        let exhausted = config.max_attempts != 0 && failures >= config.max_attempts;
        if exhausted {
            error!(op = operation_name, failures, error = %err, "Giving up");
            return Err(err);
        }

        let nominal = config.delay_for_attempt(failures);
        // 0.5x to 1.5x of the nominal delay
        let sleep_for = nominal.mul_f64(rand::thread_rng().gen_range(0.5..1.5));
        warn!(
            op = operation_name,
            failures,
            error = %err,
            retry_in_secs = sleep_for.as_secs_f64(),
            "Call failed, backing off"
        );
        tokio::time::sleep(sleep_for).await;
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn succeeds_immediately() {
        let config = RetryConfig::with_max_attempts(3);
        let result: Result<i32, &str> =
            retry_with_backoff(&config, "op", || async { Ok(42) }).await;
        assert_eq!(result, Ok(42));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_failures() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let config = RetryConfig::with_max_attempts(5);

        let result: Result<u32, String> = retry_with_backoff(&config, "flaky", || {
            let c = c.clone();
            async move {
                let n = c.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(format!("failure {n}"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(3));
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let config = RetryConfig::with_max_attempts(3);

        let result: Result<(), String> = retry_with_backoff(&config, "broken", || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err("nope".to_string())
            }
        })
        .await;

        assert_eq!(result, Err("nope".to_string()));
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn delay_grows_then_caps() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(5));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(10));
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(20));
        assert_eq!(config.delay_for_attempt(7), Duration::from_secs(300));
        assert_eq!(config.delay_for_attempt(1000), Duration::from_secs(300));
    }

    #[test]
    fn delay_never_decreases() {
        let config = RetryConfig::default();
        let mut prev = Duration::ZERO;
        for attempt in 1..200 {
            let d = config.delay_for_attempt(attempt);
            assert!(d >= prev, "attempt {attempt}: {d:?} < {prev:?}");
            prev = d;
        }
    }

    #[test]
    fn attempt_zero_treated_as_first() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for_attempt(0), config.initial_delay);
    }

    #[test]
    fn oversized_delays_saturate_when_serialized() {
        let config = RetryConfig {
            max_delay: Duration::MAX,
            ..Default::default()
        };
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["maxDelay"], u64::MAX);
        assert_eq!(value["initialDelay"], 5000);
    }

    #[test]
    fn deserializes_millis_with_defaults() {
        let config: RetryConfig =
            serde_json::from_str(r#"{"initialDelay": 250, "maxDelay": 1000}"#).unwrap();
        assert_eq!(config.initial_delay, Duration::from_millis(250));
        assert_eq!(config.max_delay, Duration::from_secs(1));
        assert_eq!(config.backoff_multiplier, 2.0);
        assert_eq!(config.max_attempts, 0);
    }
}
