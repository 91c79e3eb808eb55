//! Request-side types shared by all decorators.
//!
//! A body stream can only be consumed once, so any decorator that sends a
//! request more than once (retry) or needs to look at the body (capture,
//! compression) relies on a [`BodyReplay`] factory stored in the request
//! extensions. [`ensure_replayable`] buffers the body and installs one when
//! the caller did not.

use crate::error::{BoxError, HttpError};
use bytes::Bytes;
use http::Request;
use http_body::{Body, Frame, SizeHint};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full};
use std::convert::Infallible;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio_util::sync::CancellationToken;

/// Request body accepted by every transport in this crate.
///
/// Wraps either buffered bytes or an arbitrary streaming body. An empty body
/// reports end-of-stream immediately and is treated as "no body".
pub struct RequestBody {
    inner: UnsyncBoxBody<Bytes, BoxError>,
}

impl RequestBody {
    /// Body with no content
    #[must_use]
    pub fn empty() -> Self {
        Self {
            inner: Empty::<Bytes>::new()
                .map_err(|never: Infallible| match never {})
                .boxed_unsync(),
        }
    }

    /// Wrap a streaming body.
    ///
    /// Streaming bodies are not replayable on their own; decorators that need
    /// to resend them buffer the stream on first use unless a [`BodyReplay`]
    /// is attached to the request.
    #[must_use]
    pub fn from_stream<B>(body: B) -> Self
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        Self {
            inner: body.map_err(Into::into).boxed_unsync(),
        }
    }
}

impl Default for RequestBody {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestBody")
            .field("size_hint", &self.inner.size_hint())
            .finish_non_exhaustive()
    }
}

impl From<Bytes> for RequestBody {
    fn from(bytes: Bytes) -> Self {
        Self {
            inner: Full::new(bytes)
                .map_err(|never: Infallible| match never {})
                .boxed_unsync(),
        }
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(bytes: Vec<u8>) -> Self {
        Self::from(Bytes::from(bytes))
    }
}

impl From<String> for RequestBody {
    fn from(s: String) -> Self {
        Self::from(Bytes::from(s))
    }
}

impl From<&'static str> for RequestBody {
    fn from(s: &'static str) -> Self {
        Self::from(Bytes::from_static(s.as_bytes()))
    }
}

impl Body for RequestBody {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        Pin::new(&mut self.inner).poll_frame(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

type ReplayFn = dyn Fn() -> Result<RequestBody, BoxError> + Send + Sync;

/// Factory producing fresh, independently consumable copies of a request body.
///
/// Stored in the request extensions. The factory must be free of side
/// effects: it may be called once per attempt.
#[derive(Clone)]
pub struct BodyReplay(Arc<ReplayFn>);

impl BodyReplay {
    /// Create a replay factory from a closure
    #[must_use]
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> Result<RequestBody, BoxError> + Send + Sync + 'static,
    {
        Self(Arc::new(factory))
    }

    /// Replay factory over buffered bytes (cheap: `Bytes` clones are refcounted)
    #[must_use]
    pub fn from_bytes(bytes: Bytes) -> Self {
        Self::new(move || Ok(RequestBody::from(bytes.clone())))
    }

    /// Produce a fresh body
    ///
    /// # Errors
    /// Returns the factory's error if the body cannot be recreated.
    pub fn replay(&self) -> Result<RequestBody, BoxError> {
        (self.0)()
    }
}

impl fmt::Debug for BodyReplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BodyReplay")
    }
}

/// Build a request whose body can be replayed without buffering.
///
/// # Errors
/// Returns `HttpError::RequestBuild` if the builder holds an invalid method,
/// URI or header.
///
/// # Example
///
/// ```ignore
/// let req = replayable_request(
///     Request::post("https://example.com/upload").header("content-type", "text/plain"),
///     "hello",
/// )?;
/// ```
pub fn replayable_request(
    builder: http::request::Builder,
    body: impl Into<Bytes>,
) -> Result<Request<RequestBody>, HttpError> {
    let bytes = body.into();
    Ok(builder
        .extension(BodyReplay::from_bytes(bytes.clone()))
        .body(RequestBody::from(bytes))?)
}

/// Make sure the request carries a [`BodyReplay`].
///
/// Requests without a body or with a replay factory are returned unchanged.
/// Otherwise the body is buffered in memory once and a factory over the
/// buffered bytes is installed.
///
/// # Errors
/// Returns `HttpError::BodyReplay` if reading the body fails.
pub async fn ensure_replayable(
    req: Request<RequestBody>,
) -> Result<Request<RequestBody>, HttpError> {
    if req.body().is_end_stream() || req.extensions().get::<BodyReplay>().is_some() {
        return Ok(req);
    }

    let (mut parts, body) = req.into_parts();
    let bytes = body
        .collect()
        .await
        .map_err(HttpError::BodyReplay)?
        .to_bytes();
    parts
        .extensions
        .insert(BodyReplay::from_bytes(bytes.clone()));
    Ok(Request::from_parts(parts, RequestBody::from(bytes)))
}

/// Read a full copy of the request body through its replay factory.
///
/// Returns empty bytes for requests without a replay factory. The returned
/// future does not borrow the request.
pub fn replayed_bytes<B>(
    req: &Request<B>,
) -> impl Future<Output = Result<Bytes, HttpError>> + Send + 'static {
    let replay = req.extensions().get::<BodyReplay>().cloned();
    async move {
        let Some(replay) = replay else {
            return Ok(Bytes::new());
        };
        let body = replay.replay().map_err(HttpError::BodyReplay)?;
        Ok(body
            .collect()
            .await
            .map_err(HttpError::BodyReplay)?
            .to_bytes())
    }
}

/// Cancellation token attached to the request.
///
/// Callers attach a [`CancellationToken`] via `req.extensions_mut().insert(token)`;
/// deadlines are expressed by cancelling the token. Requests without one get a
/// token that is never cancelled.
#[must_use]
pub fn cancellation_token<B>(req: &Request<B>) -> CancellationToken {
    req.extensions()
        .get::<CancellationToken>()
        .cloned()
        .unwrap_or_default()
}
