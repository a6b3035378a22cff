//! Quota policies attached to protected routes.
//!
//! A [`QuotaPolicy`] is validated once, at registration time. Per-request
//! evaluation never sees an invalid limit or window, which keeps the hot
//! path free of error handling for programmer mistakes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Quota algorithm selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Burst-friendly: permits up to `limit` at once, refilled at a constant rate.
    TokenBucket,
    /// Exact trailing-interval count, no fixed-window boundary artifacts.
    SlidingWindow,
}

impl Strategy {
    /// Wire name, used in decision records and response headers.
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::TokenBucket => "token_bucket",
            Strategy::SlidingWindow => "sliding_window",
        }
    }

    /// Storage-key prefix. Keeps the two strategies from colliding when the
    /// same client/endpoint pair is governed by both.
    pub(crate) fn key_prefix(&self) -> &'static str {
        match self {
            Strategy::TokenBucket => "bucket",
            Strategy::SlidingWindow => "window",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced when validating policy or breaker configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Limit must be > 0; a zero limit would make the refill rate divide by zero.
    #[error("limit must be > 0 (got {provided})")]
    InvalidLimit {
        /// Value provided by caller.
        provided: u32,
    },
    /// Quota window must be > 0.
    #[error("window must be > 0 (got {provided:?})")]
    InvalidWindow {
        /// Value provided by caller.
        provided: Duration,
    },
    /// Breaker failure threshold must be > 0.
    #[error("failure_threshold must be > 0")]
    InvalidFailureThreshold,
    /// Breaker cooldown must be > 0.
    #[error("cooldown must be > 0 (got {provided:?})")]
    InvalidCooldown {
        /// Value provided by caller.
        provided: Duration,
    },
    /// Half-open probe limit must be > 0.
    #[error("half_open_max_calls must be > 0")]
    InvalidProbeLimit,
}

/// Validated per-route quota: `limit` requests per `window`, enforced by `strategy`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaPolicy {
    limit: u32,
    window: Duration,
    strategy: Strategy,
}

impl QuotaPolicy {
    /// Create a policy, rejecting zero limits and zero windows.
    ///
    /// # Examples
    /// ```
    /// use rategate::{QuotaPolicy, Strategy};
    /// use std::time::Duration;
    /// let policy = QuotaPolicy::new(100, Duration::from_secs(60), Strategy::SlidingWindow).unwrap();
    /// assert_eq!(policy.limit(), 100);
    /// ```
    pub fn new(limit: u32, window: Duration, strategy: Strategy) -> Result<Self, ConfigError> {
        if limit == 0 {
            return Err(ConfigError::InvalidLimit { provided: limit });
        }
        if window.is_zero() {
            return Err(ConfigError::InvalidWindow { provided: window });
        }
        Ok(Self { limit, window, strategy })
    }

    /// Maximum admitted requests per window.
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Trailing interval over which the limit applies.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Quota algorithm enforcing this policy.
    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Token bucket refill rate, in tokens per second.
    pub(crate) fn refill_rate(&self) -> f64 {
        f64::from(self.limit) / self.window.as_secs_f64()
    }
}

/// Admission behavior when the state store is unreachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FallbackMode {
    /// Admit every request while degraded. Protects availability of the backend's callers.
    #[default]
    FailOpen,
    /// Deny every request while degraded. Protects the backend itself.
    FailClosed,
}
