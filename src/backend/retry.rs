//! A typed retry policy with exponential backoff for calls to the tax engine.

use std::{future::Future, time::Duration};

use crate::Error;

/// Decides how often a failing call to the tax engine is retried and how
/// long to wait between attempts.
///
/// The delay before retry `k` (1-based) is `base_delay * 2^(k - 1)`,
/// capped at `max_delay`, so delays strictly increase until the cap is
/// reached. Only transient errors ([Error::is_transient]) are retried;
/// terminal errors surface immediately.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// The total number of attempts, including the first one.
    pub max_attempts: u32,
    /// The delay before the first retry.
    pub base_delay: Duration,
    /// The upper bound on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// A policy with a single attempt and no retries, used for health
    /// probes.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// The delay to wait after a failed `attempt` (1-based) before the
    /// next one.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self.base_delay.saturating_mul(1 << exponent);

        delay.min(self.max_delay)
    }

    /// The full backoff schedule: one delay per retry the policy allows.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (1..self.max_attempts).map(|attempt| self.delay_after(attempt))
    }

    /// Run `operation` until it succeeds, fails terminally, or the
    /// attempt budget is spent.
    ///
    /// The operation receives the 1-based attempt number. The error from
    /// the final attempt is returned unchanged.
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<T, Error>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let mut attempt = 1;

        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) if error.is_transient() && attempt < self.max_attempts => {
                    let delay = self.delay_after(attempt);
                    tracing::warn!(
                        "tax engine call failed on attempt {attempt}/{}: {error}, \
                        retrying in {delay:?}",
                        self.max_attempts
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

#[cfg(test)]
mod retry_tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicU32, Ordering},
        },
        time::Duration,
    };

    use crate::Error;

    use super::RetryPolicy;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(16),
        }
    }

    fn transient() -> Error {
        Error::BackendUnavailable("connection refused".to_owned())
    }

    #[test]
    fn delays_strictly_increase_until_cap() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
        };

        let delays: Vec<_> = policy.delays().collect();

        assert_eq!(delays.len(), 4);
        for pair in delays.windows(2) {
            assert!(
                pair[0] < pair[1],
                "want strictly increasing delays, got {delays:?}"
            );
        }
    }

    #[test]
    fn delays_respect_cap() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
        };

        let longest = policy.delays().max().expect("policy has retries");

        assert_eq!(longest, Duration::from_secs(8));
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        // For every n below the attempt budget, failing attempts 1..n-1
        // and succeeding on attempt n must yield a success.
        for succeed_on in 1..=3u32 {
            let calls = Arc::new(AtomicU32::new(0));
            let calls_in_op = calls.clone();

            let result = fast_policy(3)
                .run(|attempt| {
                    let calls = calls_in_op.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        if attempt < succeed_on {
                            Err(transient())
                        } else {
                            Ok(attempt)
                        }
                    }
                })
                .await;

            assert_eq!(result, Ok(succeed_on));
            assert_eq!(calls.load(Ordering::SeqCst), succeed_on);
        }
    }

    #[tokio::test]
    async fn surfaces_final_error_when_budget_spent() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in_op = calls.clone();

        let result: Result<(), Error> = fast_policy(3)
            .run(|_| {
                let calls = calls_in_op.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(transient())
                }
            })
            .await;

        assert_eq!(result, Err(transient()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn terminal_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in_op = calls.clone();

        let result: Result<(), Error> = fast_policy(3)
            .run(|_| {
                let calls = calls_in_op.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(Error::BackendRejected {
                        status: 400,
                        message: "bad request".to_owned(),
                    })
                }
            })
            .await;

        assert!(matches!(result, Err(Error::BackendRejected { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
