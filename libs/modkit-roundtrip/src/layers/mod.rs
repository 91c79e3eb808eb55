//! Tower layers decorating a round-trip transport
//!
//! Every layer wraps any `Service<Request<RequestBody>, Response =
//! Response<ResponseBody>, Error = HttpError>` and yields a service of the
//! same shape, so they compose in any order.
//!
//! ## Available Layers
//!
//! - [`RetryLayer`] - Re-sends retriable failures with policy backoff and `Retry-After`
//! - [`ThrottleLayer`] - Spaces requests to a fixed rate
//! - [`RequestIdLayer`] - Sets a fresh `X-Request-ID` header
//! - [`HeaderLayer`] - Applies static header rules
//! - [`LogLayer`] - Emits tracing events for requests, responses and bodies
//! - [`AcceptCompressedLayer`] - Negotiates and decodes compressed responses
//! - [`PostCompressedLayer`] - Compresses request bodies
//! - [`CaptureLayer`] - Records exchanges on a channel
//! - [`RedirectLimitPolicy`] - Redirect policy for the hyper transport

mod accept_compressed;
mod capture;
mod header;
mod log;
mod post_compressed;
mod redirect;
mod request_id;
mod retry;
mod throttle;

pub use accept_compressed::{AcceptCompressedLayer, AcceptCompressedService};
pub use capture::{CaptureLayer, CaptureService, Record};
pub use header::{HeaderLayer, HeaderRule, HeaderService};
pub use log::{LogLayer, LogService};
pub use post_compressed::{PostCompressedLayer, PostCompressedService};
pub use redirect::{RedirectLimitPolicy, check_scheme};
pub use request_id::{RequestIdLayer, RequestIdService, new_request_id};
pub use retry::{RetryLayer, RetryService};
pub use throttle::{ThrottleLayer, ThrottleService};

/// Access to the transport a decorator wraps
pub trait Unwrapper {
    /// The wrapped service
    type Inner;

    /// The wrapped transport
    fn inner(&self) -> &Self::Inner;
}
