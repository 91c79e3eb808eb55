#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! Composable HTTP transport decorators for `ModKit`
//!
//! Every decorator is a tower [`Layer`](tower::Layer) over a round-trip
//! transport: a `Service<Request<RequestBody>, Response =
//! Response<ResponseBody>, Error = HttpError>`. Decorators can wrap each
//! other or any transport with that shape:
//! - Retries with exponential backoff and `Retry-After` support
//! - Fixed-rate throttling
//! - Request ids, static header rules and structured logging
//! - Compressed responses (zstd, br, gzip) and compressed request bodies
//! - Exchange capture for tests and debugging
//!
//! [`HyperTransport`] is the terminal transport: a pooled hyper client over
//! rustls (HTTPS only by default) with a bounded redirect policy.
//!
//! # Retriable responses are not errors
//!
//! A 503 that survives all retries comes back as `Ok(Response)`; errors are
//! reserved for requests that produced no usable response.
//!
//! # Cancellation
//!
//! Attach a [`CancellationToken`](tokio_util::sync::CancellationToken) to
//! the request extensions to abort retry and throttle waits.
//!
//! # Example
//!
//! ```ignore
//! use modkit_roundtrip::{HyperTransport, RoundTripBuilder, ThrottleConfig, replayable_request};
//! use tower::ServiceExt;
//!
//! let transport = HyperTransport::builder().build()?;
//! let client = RoundTripBuilder::new()
//!     .throttle(ThrottleConfig::new(10.0))
//!     .request_id()
//!     .accept_compressed()
//!     .build(transport);
//!
//! let request = replayable_request(http::Request::post("https://example.com/api"), "{}")?;
//! let response = client.oneshot(request).await?;
//! ```

mod builder;
mod classify;
mod config;
mod error;
mod layers;
mod policy;
mod request;
mod response;
mod sleep;
mod tls;
mod transport;

#[cfg(test)]
mod testing;

pub use builder::{BoxTransport, RoundTripBuilder};
pub use classify::{find_in_chain, is_retriable_error};
pub use config::{
    ACCEPT_ENCODING_VALUE, CompressionConfig, ContentCoding, DEFAULT_RETRY_RESPONSE_DRAIN_LIMIT,
    ExponentialBackoff, LogConfig, MAX_WAIT, REQUEST_ID_HEADER, RetryConfig, ThrottleConfig,
};
pub use error::{BoxError, HttpError};
pub use layers::{
    AcceptCompressedLayer, AcceptCompressedService, CaptureLayer, CaptureService, HeaderLayer,
    HeaderRule, HeaderService, LogLayer, LogService, PostCompressedLayer, PostCompressedService,
    Record, RedirectLimitPolicy, RequestIdLayer, RequestIdService, RetryLayer, RetryService,
    ThrottleLayer, ThrottleService, Unwrapper, check_scheme, new_request_id,
};
pub use policy::{RETRIABLE_STATUS_CODES, RetryPolicy, is_retriable_status};
pub use request::{BodyReplay, RequestBody, cancellation_token, replayable_request};
pub use response::{ResponseBody, parse_retry_after};
pub use sleep::{Sleeper, TokioSleeper};
pub use transport::{
    DEFAULT_MAX_REDIRECTS, DEFAULT_POOL_IDLE_TIMEOUT, HyperTransport, HyperTransportBuilder,
};
