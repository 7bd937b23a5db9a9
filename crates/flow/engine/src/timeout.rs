//! What to do about client calls that have not been answered.
//!
//! A missed deadline is not a failure by itself: the call is resent with a
//! longer deadline each time, and only running out of resends fails the
//! flow.

use crate::config::EngineConfig;
use chrono::{DateTime, Duration, Utc};
use warden_flow_types::OutstandingRequest;

/// Upper bound on any single reply deadline.
const MAX_REPLY_TIMEOUT_MS: f64 = 7.0 * 24.0 * 3600.0 * 1000.0;

/// Recommended action for one outstanding call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TimeoutDecision {
    /// Deadline not reached yet.
    Wait,
    /// Resend the request and wait until `deadline`.
    Retry { deadline: DateTime<Utc> },
    /// Out of resends. Fail the flow.
    Abandon,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TimeoutPolicy {
    reply_timeout: std::time::Duration,
    max_retries: u32,
    backoff_multiplier: f64,
}

impl TimeoutPolicy {
    pub fn new(reply_timeout: std::time::Duration, max_retries: u32, backoff_multiplier: f64) -> Self {
        Self {
            reply_timeout,
            max_retries,
            backoff_multiplier: backoff_multiplier.max(1.0),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            config.reply_timeout(),
            config.max_retries,
            config.backoff_multiplier,
        )
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// How long to wait for the `attempt`-th send (1-based).
    pub fn timeout_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let millis = self.reply_timeout.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        Duration::milliseconds(millis.min(MAX_REPLY_TIMEOUT_MS) as i64)
    }

    /// Deadline for the `attempt`-th send made at `sent_at`.
    pub fn deadline_for(&self, attempt: u32, sent_at: DateTime<Utc>) -> DateTime<Utc> {
        sent_at + self.timeout_for(attempt)
    }

    pub fn decide(&self, outstanding: &OutstandingRequest, now: DateTime<Utc>) -> TimeoutDecision {
        if !outstanding.is_overdue(now) {
            return TimeoutDecision::Wait;
        }
        if outstanding.attempts > self.max_retries {
            return TimeoutDecision::Abandon;
        }
        TimeoutDecision::Retry {
            deadline: self.deadline_for(outstanding.attempts + 1, now),
        }
    }
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}
