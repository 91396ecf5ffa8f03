//! Throttling handling for the Graph and SharePoint REST APIs
//!
//! Both APIs signal throttling with HTTP 429 (Too Many Requests) or 503
//! (Service Unavailable), usually with a `Retry-After` header telling the
//! client how long to back off. [`ThrottlePolicy`] bounds how often a single
//! call is retried and what delay applies when the header is absent.

use std::time::Duration;

use reqwest::{header::HeaderMap, StatusCode};
use tracing::warn;

/// Backoff applied when a throttled response carries no `Retry-After` header
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(30);

/// Attempts per call before a throttled call gives up
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

// ============================================================================
// ThrottlePolicy
// ============================================================================

/// Retry budget for throttled calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottlePolicy {
    /// Total attempts per call, including the first one
    pub max_attempts: u32,
    /// Delay used when the server gives no `Retry-After`
    pub default_retry_after: Duration,
}

impl Default for ThrottlePolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            default_retry_after: DEFAULT_RETRY_AFTER,
        }
    }
}

impl ThrottlePolicy {
    /// Creates a policy
    pub fn new(max_attempts: u32, default_retry_after: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            default_retry_after,
        }
    }

    /// Delay before retrying a throttled response with the given headers
    pub fn delay_for(&self, headers: &HeaderMap) -> Duration {
        headers
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(|v| parse_retry_after(v, self.default_retry_after))
            .unwrap_or(self.default_retry_after)
    }
}

/// Whether a status means "slow down and retry"
pub fn is_throttled(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE
    )
}

// ============================================================================
// Retry-After parsing
// ============================================================================

/// Parses a `Retry-After` header value into a Duration.
///
/// The header can contain either:
/// - An integer number of seconds (e.g., "120")
/// - An HTTP-date (e.g., "Wed, 21 Oct 2015 07:28:00 GMT")
///
/// Falls back to `default` if the value cannot be parsed or the date is
/// more than an hour away.
pub fn parse_retry_after(value: &str, default: Duration) -> Duration {
    if let Ok(seconds) = value.trim().parse::<u64>() {
        return Duration::from_secs(seconds);
    }

    if let Ok(date) = chrono::DateTime::parse_from_rfc2822(value.trim()) {
        let now = chrono::Utc::now();
        let target = date.with_timezone(&chrono::Utc);
        if target > now {
            let diff = target - now;
            if let Some(secs) = diff
                .num_seconds()
                .try_into()
                .ok()
                .filter(|&s: &u64| s <= 3600)
            {
                return Duration::from_secs(secs);
            }
        }
    }

    warn!(value, "Could not parse Retry-After header, using default");
    default
}
