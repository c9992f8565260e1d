//! Retry classification and backoff for provider calls.

use std::time::Duration;

use crate::error::LlmError;

/// How a failed attempt should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Rate or quota limited: exponential backoff.
    RateLimited,
    /// The attempt timed out: fixed short backoff.
    Timeout,
    /// The backend could not be reached: fixed backoff, then service unavailable.
    Unreachable,
    /// Malformed request, bad credentials, unknown model: never retried.
    Permanent,
    /// Anything else: one immediate retry, then terminal.
    Other,
}

impl LlmError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            LlmError::RateLimited { .. } => FailureKind::RateLimited,
            LlmError::Timeout { .. } => FailureKind::Timeout,
            LlmError::Unreachable { .. } => FailureKind::Unreachable,
            LlmError::AuthFailed { .. } | LlmError::ModelNotAvailable { .. } => {
                FailureKind::Permanent
            }
            LlmError::Http { status, .. } if matches!(status, 400 | 404 | 413 | 422) => {
                FailureKind::Permanent
            }
            LlmError::Http { .. }
            | LlmError::RequestFailed { .. }
            | LlmError::InvalidResponse { .. } => FailureKind::Other,
        }
    }
}

/// Attempt budget and backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, first one included.
    pub max_attempts: u32,
    /// Base unit every backoff is expressed in (1s in production).
    pub backoff_unit: Duration,
    /// How many `Other` failures are retried before giving up.
    pub other_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_unit: Duration::from_secs(1),
            other_retries: 1,
        }
    }
}

/// What the client does after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep, then try again.
    RetryAfter(Duration),
    /// Stop and report service unavailable.
    Unavailable,
    /// Stop and report a generic failure.
    GiveUp,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_unit: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_unit,
            ..Self::default()
        }
    }

    /// Decide what follows a failure on `attempt` (counted from 0).
    /// `others_so_far` counts earlier `Other` failures of the same call.
    pub fn decide(&self, kind: FailureKind, attempt: u32, others_so_far: u32) -> RetryDecision {
        let last = attempt + 1 >= self.max_attempts;
        match kind {
            FailureKind::Permanent => RetryDecision::GiveUp,
            FailureKind::Other if others_so_far >= self.other_retries || last => {
                RetryDecision::GiveUp
            }
            FailureKind::Other => RetryDecision::RetryAfter(Duration::ZERO),
            FailureKind::Unreachable if last => RetryDecision::Unavailable,
            _ if last => RetryDecision::GiveUp,
            FailureKind::RateLimited => {
                let factor = 2u32.saturating_pow(attempt);
                RetryDecision::RetryAfter(self.backoff_unit.saturating_mul(factor))
            }
            FailureKind::Timeout => RetryDecision::RetryAfter(self.backoff_unit),
            FailureKind::Unreachable => RetryDecision::RetryAfter(self.backoff_unit * 2),
        }
    }

    /// Like [`decide`](Self::decide), but a server-sent `Retry-After` is the
    /// minimum wait for a rate-limited attempt.
    pub fn decide_for(&self, err: &LlmError, attempt: u32, others_so_far: u32) -> RetryDecision {
        let decision = self.decide(err.failure_kind(), attempt, others_so_far);
        match (decision, err) {
            (
                RetryDecision::RetryAfter(delay),
                LlmError::RateLimited {
                    retry_after: Some(floor),
                    ..
                },
            ) => RetryDecision::RetryAfter(delay.max(*floor)),
            _ => decision,
        }
    }
}
