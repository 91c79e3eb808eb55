//! Retry policies: when to retry and how long to wait.

use crate::classify::is_retriable_error;
use crate::config::{ExponentialBackoff, MAX_WAIT};
use crate::error::HttpError;
use crate::response::ResponseBody;
use http::{Response, StatusCode};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Status codes retried by [`ExponentialBackoff`]: 429, 502, 503, 504 and the
/// non-standard 529 ("site is overloaded").
pub const RETRIABLE_STATUS_CODES: [u16; 5] = [429, 502, 503, 504, 529];

/// Decides whether the retry decorator should retry and after how long.
///
/// Policies are stateless: the decorator owns the attempt counter and passes
/// it in. Both methods are total functions.
pub trait RetryPolicy: fmt::Debug + Send + Sync {
    /// Whether to retry after the attempt `attempt` (0-indexed) produced `outcome`.
    ///
    /// `start` is the time the first attempt was issued; `cancel` is the
    /// request's cancellation token.
    fn should_retry(
        &self,
        cancel: &CancellationToken,
        start: Instant,
        attempt: usize,
        outcome: Result<&Response<ResponseBody>, &HttpError>,
    ) -> bool;

    /// Wait before retrying after attempt `attempt`.
    ///
    /// Only used when the response carries no usable `Retry-After` header.
    fn backoff(&self, start: Instant, attempt: usize) -> Duration;
}

/// Returns `true` for statuses in [`RETRIABLE_STATUS_CODES`].
#[must_use]
pub fn is_retriable_status(status: StatusCode) -> bool {
    RETRIABLE_STATUS_CODES.contains(&status.as_u16())
}

impl RetryPolicy for ExponentialBackoff {
    fn should_retry(
        &self,
        cancel: &CancellationToken,
        start: Instant,
        attempt: usize,
        outcome: Result<&Response<ResponseBody>, &HttpError>,
    ) -> bool {
        if attempt >= self.max_attempts
            || start.elapsed() > self.max_elapsed
            || cancel.is_cancelled()
        {
            return false;
        }

        match outcome {
            Ok(response) => is_retriable_status(response.status()),
            // No response: the request may or may not have reached the server
            Err(err) => self.retry_transport_errors && is_retriable_error(err),
        }
    }

    fn backoff(&self, _start: Instant, attempt: usize) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);

        // Sanitize base: must be finite and >= 0, default to 1.0
        let base = if self.exponent_base.is_finite() && self.exponent_base >= 0.0 {
            self.exponent_base
        } else {
            1.0
        };

        let secs = base.powi(exponent);
        let clamped = if secs.is_finite() {
            secs.clamp(0.0, MAX_WAIT.as_secs_f64())
        } else {
            MAX_WAIT.as_secs_f64()
        };
        Duration::from_secs_f64(clamped)
    }
}
