//! Honoring server-issued rate-limit signals.
//!
//! A `429 Too Many Requests` response may carry a `Retry-After` header in one
//! of two forms: a delay in (possibly fractional) seconds, or an HTTP-date.
//! Anything else is treated as if the header were absent, and the retry
//! coordinator falls back to its standard exponential backoff.

use http::{header::RETRY_AFTER, HeaderMap};
use std::time::{Duration, SystemTime};

/// Rate-limit information extracted from a `429` response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimitInfo {
    /// How long the server asked us to wait, if it said so in a form we understand.
    pub retry_after: Option<Duration>,
}

impl RateLimitInfo {
    /// Extracts rate-limit information from response headers.
    ///
    /// # Examples
    ///
    /// ```
    /// use steadfast::rate_limit::RateLimitInfo;
    /// use http::HeaderMap;
    /// use std::time::Duration;
    ///
    /// let mut headers = HeaderMap::new();
    /// headers.insert("retry-after", "2.5".parse().unwrap());
    ///
    /// let info = RateLimitInfo::from_headers(&headers);
    /// assert_eq!(info.retry_after, Some(Duration::from_millis(2500)));
    /// ```
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            retry_after: extract_retry_after(headers),
        }
    }
}

/// Parses the `Retry-After` header relative to the current wall-clock time.
pub fn extract_retry_after(headers: &HeaderMap) -> Option<Duration> {
    extract_retry_after_at(headers, SystemTime::now())
}

/// Parses the `Retry-After` header relative to `now`.
///
/// HTTP-dates in the past yield a zero wait.
pub fn extract_retry_after_at(headers: &HeaderMap, now: SystemTime) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();

    if let Ok(seconds) = value.parse::<f64>() {
        // Negative, NaN and overflowing values are rejected here.
        return Duration::try_from_secs_f64(seconds).ok();
    }

    let date = httpdate::parse_http_date(value).ok()?;
    Some(date.duration_since(now).unwrap_or(Duration::ZERO))
}
