use crate::error::HttpError;
use crate::policy::RetryPolicy;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Header carrying the per-request identifier
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// `Accept-Encoding` sent by the response decompression decorator
pub const ACCEPT_ENCODING_VALUE: &str = "zstd, br, gzip";

/// Default drain limit for response bodies before retry (64 KiB)
pub const DEFAULT_RETRY_RESPONSE_DRAIN_LIMIT: usize = 64 * 1024;

/// Exponential backoff retry policy
///
/// Backoff for attempt `n` (0-indexed) is `exponent_base^n` seconds, without
/// jitter. Retries stop after `max_attempts` retries or once `max_elapsed`
/// has passed since the first attempt.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Maximum number of retries after the initial attempt (default: 3)
    pub max_attempts: usize,

    /// Stop retrying once this much time elapsed since the first attempt (default: 10s)
    pub max_elapsed: Duration,

    /// Base of the exponential backoff, in seconds (default: 2.0)
    pub exponent_base: f64,

    /// Also retry transport errors classified as transient (default: false)
    ///
    /// By default only received responses with a retriable status are
    /// retried; an unanswered request may or may not have reached the server.
    pub retry_transport_errors: bool,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            // 2^0 + 2^1 + 2^2 = 7s of waiting fits under the ceiling
            max_elapsed: Duration::from_secs(10),
            exponent_base: 2.0,
            retry_transport_errors: false,
        }
    }
}

impl ExponentialBackoff {
    /// Create a policy with a custom attempt budget, keeping the other defaults
    #[must_use]
    pub fn with_max_attempts(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }
}

/// Retry decorator configuration
#[derive(Clone)]
pub struct RetryConfig {
    /// Policy deciding whether and when to retry
    /// (default: [`ExponentialBackoff::default()`])
    pub policy: Arc<dyn RetryPolicy>,

    /// Maximum bytes to drain from a discarded response before retrying.
    /// Draining allows connection reuse. Default: 64 KiB.
    pub drain_limit: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::with_policy(ExponentialBackoff::default())
    }
}

impl fmt::Debug for RetryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryConfig")
            .field("policy", &self.policy)
            .field("drain_limit", &self.drain_limit)
            .finish()
    }
}

impl RetryConfig {
    /// Create config with a custom policy
    #[must_use]
    pub fn with_policy(policy: impl RetryPolicy + 'static) -> Self {
        Self {
            policy: Arc::new(policy),
            drain_limit: DEFAULT_RETRY_RESPONSE_DRAIN_LIMIT,
        }
    }

    /// Create config with no retries
    #[must_use]
    pub fn disabled() -> Self {
        Self::with_policy(ExponentialBackoff::with_max_attempts(0))
    }
}

/// Upper bound on any single wait: backoff, `Retry-After` or throttle window
pub const MAX_WAIT: Duration = Duration::from_secs(86_400);

/// Client-side pacing configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThrottleConfig {
    /// Maximum requests per second; `0` or negative disables throttling
    pub qps: f64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self::disabled()
    }
}

impl ThrottleConfig {
    /// Pace requests to at most `qps` per second
    #[must_use]
    pub fn new(qps: f64) -> Self {
        Self { qps }
    }

    /// No pacing
    #[must_use]
    pub fn disabled() -> Self {
        Self { qps: 0.0 }
    }

    /// Minimum spacing between two requests, or `None` when disabled
    ///
    /// Rates slower than one request per [`MAX_WAIT`] are paced at that
    /// bound.
    #[must_use]
    pub fn window(&self) -> Option<Duration> {
        if self.qps.is_nan() || self.qps <= 0.0 {
            return None;
        }
        let window = Duration::try_from_secs_f64(1.0 / self.qps).unwrap_or(MAX_WAIT);
        Some(window.min(MAX_WAIT))
    }
}

/// Logging decorator configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Level of the request/response events; failures are always `ERROR` (default: `INFO`)
    pub level: tracing::Level,

    /// Log the response body text instead of its size (default: false)
    pub include_response_body: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: tracing::Level::INFO,
            include_response_body: false,
        }
    }
}

/// Content coding used for request body compression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ContentCoding {
    /// `gzip` (levels 1-9)
    Gzip,
    /// `br` (qualities 1-11)
    Brotli,
    /// `zstd` (levels 1-22)
    Zstd,
}

impl ContentCoding {
    /// Token used in `Content-Encoding`
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentCoding::Gzip => "gzip",
            ContentCoding::Brotli => "br",
            ContentCoding::Zstd => "zstd",
        }
    }

    /// Level used when none is configured (fast compression)
    #[must_use]
    pub fn default_level(&self) -> u32 {
        match self {
            ContentCoding::Gzip | ContentCoding::Brotli => 3,
            ContentCoding::Zstd => 1,
        }
    }
}

impl fmt::Display for ContentCoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentCoding {
    type Err = HttpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gzip" => Ok(ContentCoding::Gzip),
            "br" | "brotli" => Ok(ContentCoding::Brotli),
            "zstd" => Ok(ContentCoding::Zstd),
            _ => Err(HttpError::UnsupportedContentEncoding {
                encoding: s.to_owned(),
            }),
        }
    }
}

/// Request body compression configuration
///
/// **Note**: most servers do not accept compressed request bodies; enable only
/// for endpoints known to support the chosen coding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionConfig {
    /// Coding applied to request bodies
    pub coding: ContentCoding,

    /// Compression level; `None` uses [`ContentCoding::default_level`]
    pub level: Option<u32>,
}

impl CompressionConfig {
    /// Compress with `coding` at its default level
    #[must_use]
    pub fn new(coding: ContentCoding) -> Self {
        Self {
            coding,
            level: None,
        }
    }

    /// Effective compression level
    #[must_use]
    pub fn effective_level(&self) -> u32 {
        self.level.unwrap_or_else(|| self.coding.default_level())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff_default() {
        let policy = ExponentialBackoff::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.max_elapsed, Duration::from_secs(10));
        assert!((policy.exponent_base - 2.0).abs() < f64::EPSILON);
        assert!(!policy.retry_transport_errors);
    }

    #[test]
    fn test_retry_config_default_and_disabled() {
        let config = RetryConfig::default();
        assert_eq!(config.drain_limit, DEFAULT_RETRY_RESPONSE_DRAIN_LIMIT);
        assert!(format!("{config:?}").contains("max_attempts: 3"));

        let disabled = RetryConfig::disabled();
        assert!(format!("{disabled:?}").contains("max_attempts: 0"));
    }

    #[test]
    fn test_throttle_window() {
        assert_eq!(
            ThrottleConfig::new(10.0).window(),
            Some(Duration::from_millis(100))
        );
        assert_eq!(ThrottleConfig::new(0.5).window(), Some(Duration::from_secs(2)));
        assert_eq!(ThrottleConfig::new(0.0).window(), None);
        assert_eq!(ThrottleConfig::new(-3.0).window(), None);
        assert_eq!(ThrottleConfig::new(f64::NAN).window(), None);
        assert_eq!(ThrottleConfig::default().window(), None);
    }

    #[test]
    fn test_tiny_qps_paces_at_max_wait() {
        assert_eq!(ThrottleConfig::new(1e-30).window(), Some(MAX_WAIT));
        assert_eq!(ThrottleConfig::new(1e-19).window(), Some(MAX_WAIT));
        assert_eq!(ThrottleConfig::new(f64::MIN_POSITIVE).window(), Some(MAX_WAIT));
        assert_eq!(ThrottleConfig::new(f64::INFINITY).window(), Some(Duration::ZERO));
    }

    #[test]
    fn test_content_coding_parse() {
        assert_eq!("gzip".parse::<ContentCoding>().unwrap(), ContentCoding::Gzip);
        assert_eq!("BR".parse::<ContentCoding>().unwrap(), ContentCoding::Brotli);
        assert_eq!(" zstd ".parse::<ContentCoding>().unwrap(), ContentCoding::Zstd);

        let err = "deflate".parse::<ContentCoding>().unwrap_err();
        assert!(
            matches!(err, HttpError::UnsupportedContentEncoding { ref encoding } if encoding == "deflate")
        );
        assert!("".parse::<ContentCoding>().is_err());
    }

    #[test]
    fn test_compression_levels() {
        assert_eq!(CompressionConfig::new(ContentCoding::Gzip).effective_level(), 3);
        assert_eq!(CompressionConfig::new(ContentCoding::Brotli).effective_level(), 3);
        assert_eq!(CompressionConfig::new(ContentCoding::Zstd).effective_level(), 1);

        let config = CompressionConfig {
            coding: ContentCoding::Gzip,
            level: Some(9),
        };
        assert_eq!(config.effective_level(), 9);
        assert_eq!(ContentCoding::Brotli.to_string(), "br");
    }
}
