use thiserror::Error;

/// Boxed error type used for body and transport sources.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Error type shared by every transport decorator.
///
/// Retriable HTTP statuses (429, 5xx) are not errors: they come back as
/// `Ok(Response)` and the caller sees the last response after retries.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpError {
    /// `http::request::Builder` rejected the method, URI or a header
    #[error("Failed to build request: {0}")]
    RequestBuild(#[from] http::Error),

    /// Header name rejected while building a request or rule
    #[error("Invalid header name: {0}")]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),

    /// Header value rejected while building a request or rule
    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    /// Connection-level failure reported by the transport
    #[error("Transport error: {0}")]
    Transport(#[source] BoxError),

    /// TLS setup or handshake failure
    #[error("TLS error: {0}")]
    Tls(#[source] BoxError),

    /// Redirect limit reached while following `Location` headers
    #[error("stopped after {max} redirects")]
    TooManyRedirects { max: usize },

    /// URL scheme not supported by the transport
    #[error("unsupported protocol scheme '{scheme}'")]
    UnsupportedScheme { scheme: String },

    /// The request's cancellation token fired before the operation completed
    #[error("Request cancelled")]
    Cancelled,

    /// The request body could not be buffered or replayed for another attempt
    #[error("Failed to replay request body: {0}")]
    BodyReplay(#[source] BoxError),

    /// Request body compression failed
    #[error("Request body compression failed: {0}")]
    Compression(#[source] std::io::Error),

    /// `Content-Encoding` that no decorator knows how to handle
    #[error("unsupported Content-Encoding '{encoding}'")]
    UnsupportedContentEncoding { encoding: String },

    /// Logging decorator used without a request id decorator in front of it
    #[error("request has no X-Request-ID header; add RequestIdLayer before LogLayer")]
    MissingRequestId,
}

impl HttpError {
    /// Returns `true` if this error reports a cancelled request.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, HttpError::Cancelled)
    }
}
