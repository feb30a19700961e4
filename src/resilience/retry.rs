// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry logic for connections.
//!
//! Two presets cover the synchronizer's needs:
//!
//! ```
//! use causal_sync::RetryConfig;
//! use std::time::Duration;
//!
//! // Initial node connections: a few attempts with exponential backoff
//! let startup = RetryConfig::startup();
//! assert_eq!(startup.max_retries, Some(5));
//!
//! // Reconnect timer: same interval forever, no backoff
//! let reconnect = RetryConfig::fixed(Duration::from_secs(2));
//! assert_eq!(reconnect.max_retries, None);
//! assert_eq!(reconnect.factor, 1.0);
//! ```

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

/// Configuration for connection/operation retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    /// `None` retries forever.
    pub max_retries: Option<usize>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::startup()
    }
}

impl RetryConfig {
    /// Fast-fail retry for opening node connections.
    /// 5 attempts with exponential backoff, failing after ~3 seconds.
    #[must_use]
    pub fn startup() -> Self {
        Self {
            max_retries: Some(5),
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
        }
    }

    /// Retry forever at a fixed interval.
    #[must_use]
    pub fn fixed(interval: Duration) -> Self {
        Self {
            max_retries: None,
            initial_delay: interval,
            max_delay: interval,
            factor: 1.0,
        }
    }

    /// Fast retry for tests (minimal delays)
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            max_retries: Some(3),
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            factor: 2.0,
        }
    }

    fn next_delay(&self, delay: Duration) -> Duration {
        delay.mul_f64(self.factor).min(self.max_delay)
    }
}

pub async fn retry<F, Fut, T, E>(
    operation_name: &str,
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut delay = config.initial_delay;
    let mut attempts = 0;

    loop {
        match operation().await {
            Ok(val) => {
                if attempts > 0 {
                    info!("Operation '{}' succeeded after {} retries", operation_name, attempts);
                }
                return Ok(val);
            }
            Err(err) => {
                attempts += 1;

                match config.max_retries {
                    Some(max) if attempts >= max => return Err(err),
                    Some(max) => warn!(
                        "Operation '{}' failed (attempt {}/{}): {}. Retrying in {:?}...",
                        operation_name, attempts, max, err, delay
                    ),
                    None => warn!(
                        "Operation '{}' failed (attempt {}, will retry forever): {}. Next retry in {:?}...",
                        operation_name, attempts, err, delay
                    ),
                }

                sleep(delay).await;
                delay = config.next_delay(delay);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug)]
    struct TestError(String);

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    #[tokio::test]
    async fn test_retry_succeeds_first_try() {
        let result: Result<i32, TestError> = retry(
            "test_op",
            &RetryConfig::test(),
            || async { Ok(42) },
        ).await;

        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();

        let result: Result<i32, TestError> = retry(
            "test_op",
            &RetryConfig::test(),
            || {
                let a = attempts_clone.clone();
                async move {
                    let count = a.fetch_add(1, Ordering::SeqCst) + 1;
                    if count < 3 {
                        Err(TestError(format!("fail {}", count)))
                    } else {
                        Ok(42)
                    }
                }
            },
        ).await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhausts_retries() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();

        let result: Result<i32, TestError> = retry(
            "test_op",
            &RetryConfig::test(),
            || {
                let a = attempts_clone.clone();
                async move {
                    a.fetch_add(1, Ordering::SeqCst);
                    Err(TestError("always fail".to_string()))
                }
            },
        ).await;

        assert!(result.unwrap_err().0.contains("always fail"));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fixed_retries_until_success() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();

        let result: Result<(), TestError> = retry(
            "reconnect",
            &RetryConfig::fixed(Duration::from_millis(1)),
            || {
                let a = attempts_clone.clone();
                async move {
                    if a.fetch_add(1, Ordering::SeqCst) < 10 {
                        Err(TestError("down".to_string()))
                    } else {
                        Ok(())
                    }
                }
            },
        ).await;

        assert!(result.is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 11);
    }

    #[test]
    fn test_startup_backoff_doubles_and_caps() {
        let config = RetryConfig::startup();
        let mut delay = config.initial_delay;
        delay = config.next_delay(delay);
        assert_eq!(delay, Duration::from_millis(400));
        for _ in 0..10 {
            delay = config.next_delay(delay);
        }
        assert_eq!(delay, config.max_delay);
    }

    #[test]
    fn test_fixed_delay_never_grows() {
        let config = RetryConfig::fixed(Duration::from_secs(2));
        assert_eq!(config.next_delay(config.initial_delay), Duration::from_secs(2));
    }
}
