//! Bounded retry with exponential backoff.
//!
//! One state machine drives both blocking and async callers; only the way a
//! pause is realized differs (thread sleep vs. timer).

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{MetadataError, TransportError};

/// Default number of attempts per fetch.
pub const DEFAULT_ATTEMPTS: u32 = 3;

/// Minimum pause between attempts.
pub const MIN_RETRY_WAIT: Duration = Duration::from_millis(250);

/// Attempt budget and backoff floor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: u32,
    min_wait: Duration,
}

impl RetryPolicy {
    /// Policy with `attempts` tries and the default backoff floor.
    pub fn new(attempts: u32) -> Self {
        Self {
            attempts,
            min_wait: MIN_RETRY_WAIT,
        }
    }

    /// Replace the attempt budget.
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// Replace the backoff floor `W`.
    pub fn with_min_wait(mut self, min_wait: Duration) -> Self {
        self.min_wait = min_wait;
        self
    }

    /// Total attempts, including the first.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Shortest pause between attempts.
    pub fn min_wait(&self) -> Duration {
        self.min_wait
    }

    /// Pause after a failed attempt with `remaining` attempts left,
    /// `max(W, 2^(N - remaining) * W)`.
    pub fn backoff(&self, remaining: u32) -> Duration {
        let exponent = self.attempts.saturating_sub(remaining);
        let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        self.min_wait.saturating_mul(factor).max(self.min_wait)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_ATTEMPTS)
    }
}

/// Outcome of a single attempt.
#[derive(Debug)]
pub enum Attempt<T> {
    /// Done; stop with this value.
    Success(T),
    /// Failed in a way worth trying again.
    Retry(TransportError),
    /// Failed fatally; stop without using further attempts.
    Abort(MetadataError),
}

#[derive(Debug)]
enum Step<T> {
    Finished(Result<T, MetadataError>),
    Pause(Duration),
}

#[derive(Debug)]
struct RetryState {
    policy: RetryPolicy,
    remaining: u32,
}

impl RetryState {
    fn begin(policy: RetryPolicy) -> Result<Self, MetadataError> {
        if policy.attempts == 0 {
            return Err(MetadataError::Unreachable);
        }
        Ok(Self {
            policy,
            remaining: policy.attempts,
        })
    }

    fn advance<T>(&mut self, attempt: Attempt<T>) -> Step<T> {
        match attempt {
            Attempt::Success(value) => Step::Finished(Ok(value)),
            Attempt::Abort(err) => Step::Finished(Err(err)),
            Attempt::Retry(cause) if self.remaining <= 1 => {
                warn!(attempts = self.policy.attempts, error = %cause, "metadata attempts exhausted");
                Step::Finished(Err(MetadataError::AttemptsExhausted {
                    attempts: self.policy.attempts,
                    source: cause,
                }))
            }
            Attempt::Retry(cause) => {
                let pause = self.policy.backoff(self.remaining);
                self.remaining -= 1;
                debug!(
                    remaining = self.remaining,
                    pause_ms = pause.as_millis() as u64,
                    error = %cause,
                    "metadata attempt failed, retrying"
                );
                Step::Pause(pause)
            }
        }
    }
}

/// Run `attempt` until it succeeds, aborts, or the budget is used up,
/// pausing on the tokio timer between attempts.
///
/// # Errors
///
/// `Unreachable` for a zero budget, `AttemptsExhausted` wrapping the last
/// cause, or whatever error an attempt aborted with.
pub async fn retry<T, F, Fut>(policy: RetryPolicy, mut attempt: F) -> Result<T, MetadataError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Attempt<T>>,
{
    let mut state = RetryState::begin(policy)?;
    loop {
        match state.advance(attempt().await) {
            Step::Finished(result) => return result,
            Step::Pause(pause) => tokio::time::sleep(pause).await,
        }
    }
}

/// Blocking counterpart of [`retry`]; pauses by sleeping the calling thread.
pub fn retry_blocking<T, F>(policy: RetryPolicy, mut attempt: F) -> Result<T, MetadataError>
where
    F: FnMut() -> Attempt<T>,
{
    let mut state = RetryState::begin(policy)?;
    loop {
        match state.advance(attempt()) {
            Step::Finished(result) => return result,
            Step::Pause(pause) => std::thread::sleep(pause),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(3), Duration::from_millis(250));
        assert_eq!(policy.backoff(2), Duration::from_millis(500));
        assert_eq!(policy.backoff(1), Duration::from_millis(1000));
    }

    #[test]
    fn test_backoff_never_below_floor() {
        let policy = RetryPolicy::new(2).with_min_wait(Duration::from_millis(10));
        // More remaining than the budget would give a negative exponent.
        assert_eq!(policy.backoff(5), Duration::from_millis(10));
    }

    #[test]
    fn test_backoff_saturates() {
        let policy = RetryPolicy::new(100).with_min_wait(Duration::from_secs(1));
        assert!(policy.backoff(1) >= Duration::from_secs(u64::from(u32::MAX)));
    }

    #[test]
    fn test_zero_attempts_is_unreachable() {
        let calls = Cell::new(0);
        let result: Result<(), _> = retry_blocking(RetryPolicy::new(0), || {
            calls.set(calls.get() + 1);
            Attempt::Success(())
        });
        assert!(matches!(result, Err(MetadataError::Unreachable)));
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn test_exhausts_budget_and_wraps_last_cause() {
        let calls = Cell::new(0u16);
        let policy = RetryPolicy::new(3).with_min_wait(Duration::from_millis(1));
        let result: Result<(), _> = retry_blocking(policy, || {
            calls.set(calls.get() + 1);
            Attempt::Retry(TransportError::Status(500 + calls.get()))
        });

        assert_eq!(calls.get(), 3);
        match result {
            Err(MetadataError::AttemptsExhausted { attempts, source }) => {
                assert_eq!(attempts, 3);
                assert!(matches!(source, TransportError::Status(503)));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_abort_stops_immediately() {
        let calls = Cell::new(0);
        let result: Result<(), _> = retry_blocking(RetryPolicy::default(), || {
            calls.set(calls.get() + 1);
            Attempt::Abort(MetadataError::Disabled)
        });
        assert!(matches!(result, Err(MetadataError::Disabled)));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_succeeds_after_transient_failure() {
        let calls = Cell::new(0);
        let policy = RetryPolicy::new(3).with_min_wait(Duration::from_millis(1));
        let result = retry_blocking(policy, || {
            calls.set(calls.get() + 1);
            if calls.get() < 2 {
                Attempt::Retry(TransportError::Timeout)
            } else {
                Attempt::Success("ok")
            }
        });
        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.get(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_async_pauses_follow_schedule() {
        let started = tokio::time::Instant::now();
        let calls = Cell::new(0);
        let result: Result<(), _> = retry(RetryPolicy::default(), || {
            calls.set(calls.get() + 1);
            async { Attempt::Retry(TransportError::Timeout) }
        })
        .await;

        assert!(matches!(result, Err(MetadataError::AttemptsExhausted { .. })));
        assert_eq!(calls.get(), 3);
        // 250ms after the first failure, 500ms after the second.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(750), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(760), "elapsed {elapsed:?}");
    }
}
