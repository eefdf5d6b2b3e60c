//! Exponential-backoff retry policy shared by index and point-service lookups.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, timeout_at, Instant};
use tracing::warn;

/// Optional point in time after which no further work should start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// No deadline; retries are bounded only by their attempt count.
    pub fn none() -> Self {
        Self(None)
    }

    /// Deadline at a fixed instant.
    pub fn at(instant: Instant) -> Self {
        Self(Some(instant))
    }

    /// Deadline `budget` from now.
    pub fn after(budget: Duration) -> Self {
        Self(Some(Instant::now() + budget))
    }

    /// The deadline instant, if any.
    pub fn instant(&self) -> Option<Instant> {
        self.0
    }

    /// Whether the deadline has passed.
    pub fn is_elapsed(&self) -> bool {
        self.0.is_some_and(|at| Instant::now() >= at)
    }

    fn allows_wait(&self, delay: Duration) -> bool {
        self.0.map_or(true, |at| Instant::now() + delay < at)
    }
}

/// Result of a retried operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    /// An attempt succeeded.
    Success(T),
    /// Every permitted attempt failed, or the deadline cut the loop short.
    Exhausted {
        /// Attempts actually started.
        attempts: u32,
        /// Message from the last failure.
        last_error: String,
    },
}

impl<T> Outcome<T> {
    /// Whether an attempt succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    /// Converts into `Some` on success.
    pub fn success(self) -> Option<T> {
        match self {
            Outcome::Success(value) => Some(value),
            Outcome::Exhausted { .. } => None,
        }
    }
}

/// Retry parameters: total attempts, first backoff delay, and growth factor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    multiplier: f64,
}

impl RetryPolicy {
    /// Builds a policy. At least one attempt is always made.
    pub fn new(max_attempts: u32, initial_delay: Duration, multiplier: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            multiplier: if multiplier.is_finite() && multiplier >= 1.0 {
                multiplier
            } else {
                1.0
            },
        }
    }

    /// Policy for search-index scans: 3 attempts, backing off 1.5s then 3s.
    pub fn index_fetch() -> Self {
        Self::new(3, Duration::from_millis(1500), 2.0)
    }

    /// Policy for point-service pages: 3 attempts, backing off 1s then 2s.
    pub fn point_query() -> Self {
        Self::new(3, Duration::from_secs(1), 2.0)
    }

    /// Same policy with a different first delay.
    pub fn with_initial_delay(mut self, initial_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self
    }

    /// Total attempts permitted.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay slept after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16) as i32;
        self.initial_delay.mul_f64(self.multiplier.powi(exponent))
    }

    /// Runs `op` until it succeeds, attempts run out, or `deadline` passes.
    ///
    /// `op` receives the 1-based attempt number and must start from scratch
    /// each time; nothing from a failed attempt is carried forward.
    pub async fn run<T, E, F, Fut>(&self, label: &str, deadline: Deadline, mut op: F) -> Outcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut last_error = String::new();
        let mut attempts = 0;
        while attempts < self.max_attempts {
            if deadline.is_elapsed() {
                last_error = "deadline elapsed".to_string();
                break;
            }
            attempts += 1;
            let result = match deadline.instant() {
                Some(at) => match timeout_at(at, op(attempts)).await {
                    Ok(result) => result.map_err(|err| err.to_string()),
                    Err(_) => Err("deadline elapsed".to_string()),
                },
                None => op(attempts).await.map_err(|err| err.to_string()),
            };
            let err = match result {
                Ok(value) => return Outcome::Success(value),
                Err(err) => err,
            };
            warn!(
                "{label}: attempt {attempts}/{max} failed: {err}",
                max = self.max_attempts
            );
            last_error = err;
            if attempts == self.max_attempts {
                break;
            }
            let delay = self.delay_after(attempts);
            if !deadline.allows_wait(delay) {
                break;
            }
            sleep(delay).await;
        }
        Outcome::Exhausted {
            attempts,
            last_error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delays_double_from_initial() {
        let policy = RetryPolicy::index_fetch();
        assert_eq!(policy.delay_after(1), Duration::from_millis(1500));
        assert_eq!(policy.delay_after(2), Duration::from_millis(3000));
        assert_eq!(policy.delay_after(3), Duration::from_millis(6000));
        assert_eq!(RetryPolicy::new(0, Duration::ZERO, 0.5).max_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let started = Instant::now();
        let outcome = RetryPolicy::index_fetch()
            .run("flaky", Deadline::none(), |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err(format!("boom {attempt}"))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;
        assert_eq!(outcome, Outcome::Success(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), Duration::from_millis(4500));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_without_trailing_sleep() {
        let started = Instant::now();
        let outcome: Outcome<()> = RetryPolicy::index_fetch()
            .run("down", Deadline::none(), |_| async { Err("unavailable") })
            .await;
        assert_eq!(
            outcome,
            Outcome::Exhausted {
                attempts: 3,
                last_error: "unavailable".to_string()
            }
        );
        assert_eq!(started.elapsed(), Duration::from_millis(4500));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_stops_retrying() {
        let deadline = Deadline::after(Duration::from_secs(2));
        let outcome: Outcome<()> = RetryPolicy::index_fetch()
            .run("slow", deadline, |_| async { Err("unavailable") })
            .await;
        // The second backoff (3s) would overrun the deadline.
        assert!(matches!(outcome, Outcome::Exhausted { attempts: 2, .. }));

        let outcome: Outcome<()> = RetryPolicy::index_fetch()
            .run("late", Deadline::at(Instant::now()), |_| async { Ok::<_, String>(()) })
            .await;
        assert!(matches!(outcome, Outcome::Exhausted { attempts: 0, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_cuts_off_hung_attempt() {
        let outcome: Outcome<()> = RetryPolicy::new(1, Duration::ZERO, 2.0)
            .run("hung", Deadline::after(Duration::from_secs(5)), |_| async {
                sleep(Duration::from_secs(60)).await;
                Ok::<_, String>(())
            })
            .await;
        match outcome {
            Outcome::Exhausted {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 1);
                assert_eq!(last_error, "deadline elapsed");
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }
}
