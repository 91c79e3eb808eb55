use crate::config::MAX_WAIT;
use crate::error::{BoxError, HttpError};
use bytes::Bytes;
use http::{HeaderMap, Response};
use http_body_util::BodyExt;
use std::time::{Duration, SystemTime};

/// Type alias for the boxed response body returned by every transport.
///
/// The body is type-erased so decorators can wrap it (decompression, logging,
/// capture) without changing the transport contract.
pub type ResponseBody = http_body_util::combinators::BoxBody<Bytes, BoxError>;

/// Parse the `Retry-After` header into a wait duration.
///
/// Accepts either a non-negative integer number of seconds or an HTTP-date
/// (RFC 1123). Only positive durations are returned: zero, negative, past
/// dates and unparseable values yield `None` so the caller falls back to its
/// own backoff. Waits are capped at [`MAX_WAIT`].
#[must_use]
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(http::header::RETRY_AFTER)?.to_str().ok()?;
    let trimmed = value.trim();

    // Seconds first (most common format)
    let wait = match trimmed.parse::<u64>() {
        Ok(seconds) => (seconds > 0).then_some(Duration::from_secs(seconds)),
        Err(_) => parse_http_date(trimmed),
    };
    wait.map(|wait| wait.min(MAX_WAIT))
}

/// Parse HTTP-date (RFC 1123) and return duration until that time.
/// Returns `None` if the date is not in the future or cannot be parsed.
fn parse_http_date(value: &str) -> Option<Duration> {
    let parsed = httpdate::parse_http_date(value).ok()?;
    let until = parsed.duration_since(SystemTime::now()).ok()?;
    (!until.is_zero()).then_some(until)
}

/// Box any response body into [`ResponseBody`].
pub fn box_response<B>(response: Response<B>) -> Response<ResponseBody>
where
    B: http_body::Body<Data = Bytes> + Send + Sync + 'static,
    B::Error: Into<BoxError>,
{
    let (parts, body) = response.into_parts();
    Response::from_parts(parts, body.map_err(Into::into).boxed())
}

/// Drain response body up to `limit` bytes, then drop it.
///
/// For HTTP/1.1 the body must be fully consumed before the connection can be
/// reused. Bodies larger than `limit` are dropped early and the connection
/// may be closed instead of returned to the pool.
///
/// # Errors
/// Returns `HttpError::Transport` if reading a frame fails.
pub async fn drain_response_body(
    response: Response<ResponseBody>,
    limit: usize,
) -> Result<(), HttpError> {
    let (_parts, body) = response.into_parts();
    let mut body = std::pin::pin!(body);
    let mut drained = 0usize;

    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(HttpError::Transport)?;
        if let Some(chunk) = frame.data_ref() {
            drained += chunk.len();
            if drained >= limit {
                break;
            }
        }
    }

    Ok(())
}
