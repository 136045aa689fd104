//! Rate-limit metadata extracted from Databricks responses.
//!
//! The connector never sleeps or retries on its own. It reads whatever the
//! server reports (`Retry-After`, `X-RateLimit-*`) and hands it back to the
//! caller, whose backoff policy decides what to do.

use chrono::{DateTime, Duration, Utc};
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

const RETRY_AFTER: &str = "retry-after";
const RATE_LIMIT_LIMIT: &str = "x-ratelimit-limit";
const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";
const RATE_LIMIT_RESET: &str = "x-ratelimit-reset";

/// Whether the caller is currently within its quota.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitStatus {
    /// No rate-limit information was returned.
    #[default]
    Unknown,
    /// Request was served within the quota.
    Ok,
    /// Quota exhausted; the caller should back off until `reset_at`.
    Overlimit,
}

/// Rate-limit metadata for a single response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitInfo {
    pub status: RateLimitStatus,
    /// Requests allowed in the current window.
    pub limit: Option<u64>,
    /// Requests left in the current window.
    pub remaining: Option<u64>,
    /// When the caller may retry (from `Retry-After` or `X-RateLimit-Reset`).
    pub reset_at: Option<DateTime<Utc>>,
}

impl RateLimitInfo {
    /// Builds rate-limit metadata from a response status and its headers.
    #[must_use]
    pub fn from_response(status: StatusCode, headers: &HeaderMap) -> Self {
        Self::from_headers_at(status, headers, Utc::now())
    }

    fn from_headers_at(status: StatusCode, headers: &HeaderMap, now: DateTime<Utc>) -> Self {
        let limit = header_u64(headers, RATE_LIMIT_LIMIT);
        let remaining = header_u64(headers, RATE_LIMIT_REMAINING);

        let retry_after = headers
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        let reset = header_u64(headers, RATE_LIMIT_RESET)
            .and_then(|secs| i64::try_from(secs).ok())
            .map(Duration::seconds);
        let reset_at = retry_after.or(reset).map(|delay| now + delay);

        let status = if status == StatusCode::TOO_MANY_REQUESTS || remaining == Some(0) {
            RateLimitStatus::Overlimit
        } else if limit.is_some() || remaining.is_some() || reset_at.is_some() {
            RateLimitStatus::Ok
        } else {
            RateLimitStatus::Unknown
        };

        Self {
            status,
            limit,
            remaining,
            reset_at,
        }
    }

    /// Returns true if the server reported that the quota is exhausted.
    #[must_use]
    pub fn is_overlimit(&self) -> bool {
        self.status == RateLimitStatus::Overlimit
    }
}

/// Parses a `Retry-After` header given in seconds.
///
/// HTTP-date values are not supported and yield `None`.
#[must_use]
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value
        .trim()
        .parse::<i64>()
        .ok()
        .filter(|secs| *secs >= 0)
        .map(Duration::seconds)
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}
