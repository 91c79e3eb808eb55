use crate::config::{CompressionConfig, ContentCoding};
use crate::error::HttpError;
use crate::layers::Unwrapper;
use crate::request::{BodyReplay, RequestBody};
use crate::response::ResponseBody;
use bytes::Bytes;
use futures::future::BoxFuture;
use http::header::{CONTENT_ENCODING, CONTENT_LENGTH};
use http::{HeaderValue, Request, Response};
use http_body::Body;
use http_body_util::BodyExt;
use std::io::{self, Write};
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// Brotli window size (log2), the encoder's default
const BROTLI_LGWIN: u32 = 22;

/// Compress `data` with `coding` at `level` (clamped to the coding's range).
///
/// # Errors
/// Returns the encoder's I/O error if compression fails.
pub fn compress(coding: ContentCoding, level: u32, data: &[u8]) -> io::Result<Vec<u8>> {
    match coding {
        ContentCoding::Gzip => {
            let mut encoder =
                flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::new(level.min(9)));
            encoder.write_all(data)?;
            encoder.finish()
        }
        ContentCoding::Brotli => {
            let mut writer =
                brotli::CompressorWriter::new(Vec::new(), 4096, level.min(11), BROTLI_LGWIN);
            writer.write_all(data)?;
            writer.flush()?;
            Ok(writer.into_inner())
        }
        ContentCoding::Zstd => {
            let level = i32::try_from(level.clamp(1, 22)).unwrap_or(1);
            zstd::stream::encode_all(data, level)
        }
    }
}

/// Tower layer compressing request bodies
///
/// Requests without a body, or already carrying `Content-Encoding`, pass
/// through unchanged.
#[derive(Clone, Copy, Debug)]
pub struct PostCompressedLayer {
    config: CompressionConfig,
}

impl PostCompressedLayer {
    #[must_use]
    pub fn new(config: CompressionConfig) -> Self {
        Self { config }
    }

    /// Layer for a coding given by its `Content-Encoding` token
    ///
    /// # Errors
    /// Returns `HttpError::UnsupportedContentEncoding` for anything but
    /// `gzip`, `br` and `zstd`.
    pub fn from_encoding(encoding: &str, level: Option<u32>) -> Result<Self, HttpError> {
        Ok(Self::new(CompressionConfig {
            coding: encoding.parse()?,
            level,
        }))
    }
}

impl<S> Layer<S> for PostCompressedLayer {
    type Service = PostCompressedService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        PostCompressedService {
            inner,
            config: self.config,
        }
    }
}

/// Service that buffers, compresses and re-labels request bodies
///
/// The body replay factory is replaced by one yielding the compressed bytes,
/// so inner decorators see exactly what goes on the wire.
#[derive(Clone, Debug)]
pub struct PostCompressedService<S> {
    inner: S,
    config: CompressionConfig,
}

impl<S> Unwrapper for PostCompressedService<S> {
    type Inner = S;

    fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S> Service<Request<RequestBody>> for PostCompressedService<S>
where
    S: Service<Request<RequestBody>, Response = Response<ResponseBody>, Error = HttpError>
        + Clone
        + Send
        + 'static,
    S::Future: Send,
{
    type Response = S::Response;
    type Error = HttpError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<RequestBody>) -> Self::Future {
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        if req.body().is_end_stream() || req.headers().contains_key(CONTENT_ENCODING) {
            return Box::pin(inner.call(req));
        }

        let config = self.config;
        Box::pin(async move {
            let (mut parts, body) = req.into_parts();
            let plain = body
                .collect()
                .await
                .map_err(HttpError::BodyReplay)?
                .to_bytes();

            let compressed = compress(config.coding, config.effective_level(), &plain)
                .map(Bytes::from)
                .map_err(HttpError::Compression)?;
            tracing::trace!(
                coding = %config.coding,
                plain = plain.len(),
                compressed = compressed.len(),
                "Compressed request body"
            );

            parts.headers.insert(
                CONTENT_ENCODING,
                HeaderValue::from_static(config.coding.as_str()),
            );
            parts.headers.remove(CONTENT_LENGTH);
            parts
                .extensions
                .insert(BodyReplay::from_bytes(compressed.clone()));

            inner
                .call(Request::from_parts(parts, RequestBody::from(compressed)))
                .await
        })
    }
}
