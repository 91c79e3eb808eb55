use crate::config::ACCEPT_ENCODING_VALUE;
use crate::error::HttpError;
use crate::layers::Unwrapper;
use crate::response::{ResponseBody, box_response};
use futures::future::BoxFuture;
use http::header::{ACCEPT_ENCODING, CONTENT_ENCODING};
use http::{HeaderValue, Request, Response};
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tower_http::decompression::Decompression;

/// Tower layer advertising and transparently decoding compressed responses
///
/// Sends `Accept-Encoding: zstd, br, gzip` and decodes those codings,
/// removing `Content-Encoding` and `Content-Length` from decoded responses.
/// Responses in any other coding (except `identity`) are rejected with
/// [`HttpError::UnsupportedContentEncoding`].
#[derive(Clone, Copy, Debug, Default)]
pub struct AcceptCompressedLayer;

impl AcceptCompressedLayer {
    /// Create the layer
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for AcceptCompressedLayer {
    type Service = AcceptCompressedService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AcceptCompressedService {
            inner: Decompression::new(inner),
        }
    }
}

/// Service wrapping tower-http [`Decompression`] with a strict encoding check
#[derive(Clone)]
pub struct AcceptCompressedService<S> {
    inner: Decompression<S>,
}

impl<S> Unwrapper for AcceptCompressedService<S> {
    type Inner = S;

    fn inner(&self) -> &S {
        self.inner.get_ref()
    }
}

impl<S, ReqBody> Service<Request<ReqBody>> for AcceptCompressedService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResponseBody>, Error = HttpError>,
    S::Future: Send + 'static,
{
    type Response = Response<ResponseBody>;
    type Error = HttpError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        req.headers_mut().insert(
            ACCEPT_ENCODING,
            HeaderValue::from_static(ACCEPT_ENCODING_VALUE),
        );
        let fut = self.inner.call(req);

        Box::pin(async move {
            let resp = fut.await?;

            // Decoded responses no longer carry Content-Encoding
            if let Some(value) = resp.headers().get(CONTENT_ENCODING) {
                let encoding = String::from_utf8_lossy(value.as_bytes()).trim().to_owned();
                if !encoding.is_empty() && !encoding.eq_ignore_ascii_case("identity") {
                    tracing::debug!(
                        encoding = %encoding,
                        "Rejecting response with unsupported Content-Encoding"
                    );
                    return Err(HttpError::UnsupportedContentEncoding { encoding });
                }
            }

            Ok(box_response(resp))
        })
    }
}
