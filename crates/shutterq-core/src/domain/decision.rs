//! Decision model: what happens to a task after a failed attempt.
//!
//! Deciders are pure: they see only the error classification and the attempt
//! count, never the payload or the store. Applying the decision (persisting
//! the new status, arming the retry timer) is the controller's job.

use std::time::Duration;

use super::outcome::{ErrorClass, UploadError};
use crate::queue::RetryPolicy;

/// Next action for a task whose attempt failed.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Eligible again immediately.
    RetryNow,

    /// Eligible again after the delay.
    RetryAfter(Duration),

    /// Give up; the task moves to `failed`.
    Terminal { reason: String },
}

/// Decides the next action from an error and the attempts already sent.
pub trait Decider: Send + Sync {
    /// `attempt_count` already includes the attempt that produced `error`
    /// (unless it failed before dispatch).
    fn decide(&self, error: &UploadError, attempt_count: u32) -> Decision;
}

/// Classification + attempt bound + backoff schedule.
///
/// - terminal errors fail immediately, whatever the attempt count
/// - retryable errors retry until `max_attempts` is reached, then fail
#[derive(Debug, Clone, Default)]
pub struct DefaultDecider {
    retry_policy: RetryPolicy,
}

impl DefaultDecider {
    pub fn new(retry_policy: RetryPolicy) -> Self {
        Self { retry_policy }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }
}

impl Decider for DefaultDecider {
    fn decide(&self, error: &UploadError, attempt_count: u32) -> Decision {
        if error.class() == ErrorClass::Terminal {
            return Decision::Terminal {
                reason: format!("terminal error: {}", error.kind),
            };
        }

        if attempt_count >= self.retry_policy.max_attempts {
            return Decision::Terminal {
                reason: format!(
                    "max attempts reached: {}/{}",
                    attempt_count, self.retry_policy.max_attempts
                ),
            };
        }

        let delay = self.retry_policy.next_delay(attempt_count);
        if delay.is_zero() {
            Decision::RetryNow
        } else {
            Decision::RetryAfter(delay)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::outcome::UploadErrorKind;
    use rstest::rstest;

    fn err(kind: UploadErrorKind) -> UploadError {
        UploadError::new(kind, "test")
    }

    #[rstest]
    #[case::unauthorized(UploadErrorKind::Unauthorized)]
    #[case::invalid(UploadErrorKind::InvalidPayload)]
    #[case::closed(UploadErrorKind::CaptureClosed)]
    #[case::quota(UploadErrorKind::QuotaExceeded)]
    fn terminal_errors_short_circuit_on_first_attempt(#[case] kind: UploadErrorKind) {
        let decider = DefaultDecider::default();
        assert!(matches!(
            decider.decide(&err(kind), 1),
            Decision::Terminal { .. }
        ));
    }

    #[test]
    fn retryable_errors_back_off_until_bound() {
        let decider = DefaultDecider::default();
        let e = err(UploadErrorKind::NoConnectivity);

        assert_eq!(
            decider.decide(&e, 1),
            Decision::RetryAfter(Duration::from_secs(2))
        );
        assert_eq!(
            decider.decide(&e, 2),
            Decision::RetryAfter(Duration::from_secs(4))
        );
        match decider.decide(&e, 3) {
            Decision::Terminal { reason } => assert!(reason.contains("3/3")),
            other => panic!("expected terminal, got {other:?}"),
        }
    }

    #[test]
    fn zero_backoff_retries_now() {
        let decider = DefaultDecider::new(RetryPolicy::fixed(3, Duration::ZERO));
        assert_eq!(
            decider.decide(&err(UploadErrorKind::Timeout), 1),
            Decision::RetryNow
        );
    }
}
