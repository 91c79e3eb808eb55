use crate::config::{LogConfig, REQUEST_ID_HEADER};
use crate::error::{BoxError, HttpError};
use crate::layers::Unwrapper;
use crate::response::ResponseBody;
use bytes::{Bytes, BytesMut};
use futures::future::BoxFuture;
use http::header::{CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, HeaderName, Request, Response};
use http_body::{Body, Frame, SizeHint};
use http_body_util::BodyExt;
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::time::Instant;
use tower::{Layer, Service};
use tracing::Level;

/// `tracing::event!` needs a constant level; dispatch on the configured one.
macro_rules! event_at {
    ($level:expr, $($arg:tt)+) => {
        match $level {
            Level::ERROR => tracing::event!(Level::ERROR, $($arg)+),
            Level::WARN => tracing::event!(Level::WARN, $($arg)+),
            Level::INFO => tracing::event!(Level::INFO, $($arg)+),
            Level::DEBUG => tracing::event!(Level::DEBUG, $($arg)+),
            _ => tracing::event!(Level::TRACE, $($arg)+),
        }
    };
}

fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

/// Tower layer logging every exchange through `tracing`
///
/// Requires an `X-Request-ID` header on each request (add
/// [`RequestIdLayer`](crate::RequestIdLayer) in front of it) so request,
/// response and body events can be correlated.
#[derive(Clone, Debug, Default)]
pub struct LogLayer {
    config: LogConfig,
}

impl LogLayer {
    /// Layer logging at `config.level`
    #[must_use]
    pub fn new(config: LogConfig) -> Self {
        Self { config }
    }
}

impl<S> Layer<S> for LogLayer {
    type Service = LogService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        LogService {
            inner,
            config: self.config.clone(),
        }
    }
}

/// Service emitting request, response and body-completion events
#[derive(Clone, Debug)]
pub struct LogService<S> {
    inner: S,
    config: LogConfig,
}

impl<S> Unwrapper for LogService<S> {
    type Inner = S;

    fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S, ReqBody> Service<Request<ReqBody>> for LogService<S>
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

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let Some(request_id) = req
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
        else {
            return Box::pin(futures::future::ready(Err(HttpError::MissingRequestId)));
        };

        let level = self.config.level;
        let include_body = self.config.include_response_body;

        event_at!(
            level,
            request_id = %request_id,
            method = %req.method(),
            url = %req.uri(),
            content_encoding = header_str(req.headers(), &CONTENT_ENCODING),
            "HTTP request"
        );

        let started = Instant::now();
        let fut = self.inner.call(req);

        Box::pin(async move {
            match fut.await {
                Err(err) => {
                    tracing::error!(
                        request_id = %request_id,
                        elapsed_ms = started.elapsed().as_millis(),
                        error = %err,
                        "HTTP request failed"
                    );
                    Err(err)
                }
                Ok(resp) => {
                    let headers = resp.headers();
                    event_at!(
                        level,
                        request_id = %request_id,
                        status = resp.status().as_u16(),
                        content_encoding = header_str(headers, &CONTENT_ENCODING),
                        content_length = header_str(headers, &CONTENT_LENGTH),
                        content_type = header_str(headers, &CONTENT_TYPE),
                        "HTTP response"
                    );

                    let (parts, body) = resp.into_parts();
                    let body = LogBody {
                        inner: body,
                        request_id,
                        level,
                        started,
                        bytes: 0,
                        captured: include_body.then(BytesMut::new),
                        error: None,
                    };
                    Ok(Response::from_parts(parts, body.boxed()))
                }
            }
        })
    }
}

pin_project! {
    /// Response body that logs its outcome when dropped.
    struct LogBody {
        #[pin]
        inner: ResponseBody,
        request_id: String,
        level: Level,
        started: Instant,
        bytes: usize,
        captured: Option<BytesMut>,
        error: Option<String>,
    }

    impl PinnedDrop for LogBody {
        fn drop(this: Pin<&mut Self>) {
            let this = this.project();
            let elapsed_ms = this.started.elapsed().as_millis();
            let body = this
                .captured
                .as_ref()
                .map(|b| String::from_utf8_lossy(b).into_owned());

            if let Some(error) = this.error.as_ref() {
                tracing::error!(
                    request_id = %this.request_id,
                    elapsed_ms,
                    bytes = *this.bytes,
                    body = body.as_deref(),
                    error = %error,
                    "HTTP response body failed"
                );
            } else if let Some(body) = body {
                event_at!(
                    *this.level,
                    request_id = %this.request_id,
                    elapsed_ms,
                    body = %body,
                    "HTTP response body"
                );
            } else {
                event_at!(
                    *this.level,
                    request_id = %this.request_id,
                    elapsed_ms,
                    bytes = *this.bytes,
                    "HTTP response body"
                );
            }
        }
    }
}

impl Body for LogBody {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.project();

        match this.inner.poll_frame(cx) {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    *this.bytes += data.len();
                    if let Some(captured) = this.captured.as_mut() {
                        captured.extend_from_slice(data);
                    }
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Ready(Some(Err(e))) => {
                *this.error = Some(e.to_string());
                Poll::Ready(Some(Err(e)))
            }
            other => other,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::request::RequestBody;
    use crate::testing::{ScriptedTransport, read_body, response_with};
    use futures::stream;
    use http_body_util::StreamBody;
    use tower::ServiceExt;
    use tracing_test::traced_test;

    fn request(id: Option<&str>) -> Request<RequestBody> {
        let mut builder = Request::post("http://example.com/upload").header("content-encoding", "gzip");
        if let Some(id) = id {
            builder = builder.header(REQUEST_ID_HEADER, id);
        }
        builder.body(RequestBody::from("payload")).unwrap()
    }

    #[tokio::test]
    async fn test_missing_request_id_rejected() {
        let transport = ScriptedTransport::ok();
        let mut svc = LogLayer::default().layer(transport.clone());

        let err = svc.ready().await.unwrap().call(request(None)).await.unwrap_err();
        assert!(matches!(err, HttpError::MissingRequestId));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_exchange_is_logged() {
        let transport = ScriptedTransport::new(vec![Ok(response_with(
            201,
            &[("content-type", "text/plain"), ("content-length", "5")],
            "hello",
        ))]);
        let mut svc = LogLayer::default().layer(transport);

        let resp = svc
            .ready()
            .await
            .unwrap()
            .call(request(Some("req-abc")))
            .await
            .unwrap();
        assert_eq!(read_body(resp).await, Bytes::from_static(b"hello"));

        assert!(logs_contain("HTTP request"));
        assert!(logs_contain("request_id=req-abc"));
        assert!(logs_contain("method=POST"));
        assert!(logs_contain("content_encoding=\"gzip\""));
        assert!(logs_contain("status=201"));
        assert!(logs_contain("content_type=\"text/plain\""));
        assert!(logs_contain("bytes=5"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_response_body_text_logged_when_enabled() {
        let transport =
            ScriptedTransport::new(vec![Ok(response_with(400, &[], "field missing"))]);
        let config = LogConfig {
            level: Level::DEBUG,
            include_response_body: true,
        };
        let mut svc = LogLayer::new(config).layer(transport);

        let resp = svc
            .ready()
            .await
            .unwrap()
            .call(request(Some("req-body")))
            .await
            .unwrap();
        drop(read_body(resp).await);

        assert!(logs_contain("DEBUG"));
        assert!(logs_contain("body=field missing"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_transport_error_logged_at_error() {
        let transport =
            ScriptedTransport::new(vec![Err(HttpError::Transport("connection refused".into()))]);
        let mut svc = LogLayer::default().layer(transport);

        let err = svc
            .ready()
            .await
            .unwrap()
            .call(request(Some("req-err")))
            .await
            .unwrap_err();
        assert!(matches!(err, HttpError::Transport(_)));
        assert!(logs_contain("HTTP request failed"));
        assert!(logs_contain("connection refused"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_body_error_logged_on_drop() {
        let frames: Vec<Result<Frame<Bytes>, BoxError>> = vec![
            Ok(Frame::data(Bytes::from_static(b"par"))),
            Err("stream reset".into()),
        ];
        let broken: ResponseBody = StreamBody::new(stream::iter(frames)).boxed();
        let transport = ScriptedTransport::new(vec![Ok(Response::new(broken))]);
        let mut svc = LogLayer::default().layer(transport);

        let resp = svc
            .ready()
            .await
            .unwrap()
            .call(request(Some("req-broken")))
            .await
            .unwrap();
        assert!(resp.into_body().collect().await.is_err());

        assert!(logs_contain("HTTP response body failed"));
        assert!(logs_contain("stream reset"));
        assert!(logs_contain("bytes=3"));
    }
}
