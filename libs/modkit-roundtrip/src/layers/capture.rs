use crate::error::{BoxError, HttpError};
use crate::layers::Unwrapper;
use crate::request::{RequestBody, ensure_replayable, replayed_bytes};
use crate::response::ResponseBody;
use bytes::{Bytes, BytesMut};
use futures::future::BoxFuture;
use http::{Request, Response};
use http_body::{Body, Frame, SizeHint};
use http_body_util::BodyExt;
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tower::{Layer, Service};

/// One completed exchange with both bodies materialized
#[derive(Debug)]
pub struct Record {
    /// The request as sent, with its full body
    pub request: Request<Bytes>,
    /// The response with the bytes the caller read, if a response arrived
    pub response: Option<Response<Bytes>>,
    /// Transport error, or the error that ended the response body
    pub error: Option<String>,
}

/// Tower layer recording every exchange on an unbounded channel
///
/// Errors are delivered immediately; responses when the caller drops the
/// response body. A closed receiver is ignored.
#[derive(Clone, Debug)]
pub struct CaptureLayer {
    sender: mpsc::UnboundedSender<Record>,
}

impl CaptureLayer {
    /// Layer delivering records on `sender`
    #[must_use]
    pub fn new(sender: mpsc::UnboundedSender<Record>) -> Self {
        Self { sender }
    }

    /// Layer plus the receiving end of its record channel
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Record>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self::new(sender), receiver)
    }
}

impl<S> Layer<S> for CaptureLayer {
    type Service = CaptureService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CaptureService {
            inner,
            sender: self.sender.clone(),
        }
    }
}

/// Service recording each exchange it forwards
#[derive(Clone, Debug)]
pub struct CaptureService<S> {
    inner: S,
    sender: mpsc::UnboundedSender<Record>,
}

impl<S> Unwrapper for CaptureService<S> {
    type Inner = S;

    fn inner(&self) -> &S {
        &self.inner
    }
}

fn deliver(sender: &mpsc::UnboundedSender<Record>, record: Record) {
    if sender.send(record).is_err() {
        tracing::trace!("Capture receiver closed; dropping record");
    }
}

impl<S> Service<Request<RequestBody>> for CaptureService<S>
where
    S: Service<Request<RequestBody>, Response = Response<ResponseBody>, Error = HttpError>
        + Clone
        + Send
        + 'static,
    S::Future: Send,
{
    type Response = Response<ResponseBody>;
    type Error = HttpError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<RequestBody>) -> Self::Future {
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let sender = self.sender.clone();

        Box::pin(async move {
            let req = ensure_replayable(req).await?;
            let body = replayed_bytes(&req);
            let body = body.await?;

            let mut request = Request::new(body);
            *request.method_mut() = req.method().clone();
            *request.uri_mut() = req.uri().clone();
            *request.version_mut() = req.version();
            *request.headers_mut() = req.headers().clone();

            match inner.call(req).await {
                Err(err) => {
                    deliver(
                        &sender,
                        Record {
                            request,
                            response: None,
                            error: Some(err.to_string()),
                        },
                    );
                    Err(err)
                }
                Ok(resp) => {
                    let (parts, body) = resp.into_parts();
                    let body = CaptureBody {
                        inner: body,
                        buffer: BytesMut::new(),
                        error: None,
                        pending: Some(Pending {
                            sender,
                            request,
                            head: parts.clone(),
                        }),
                    };
                    Ok(Response::from_parts(parts, body.boxed()))
                }
            }
        })
    }
}

/// Everything needed to emit the record once the body is dropped.
struct Pending {
    sender: mpsc::UnboundedSender<Record>,
    request: Request<Bytes>,
    head: http::response::Parts,
}

pin_project! {
    struct CaptureBody {
        #[pin]
        inner: ResponseBody,
        buffer: BytesMut,
        error: Option<String>,
        pending: Option<Pending>,
    }

    impl PinnedDrop for CaptureBody {
        fn drop(this: Pin<&mut Self>) {
            let this = this.project();
            if let Some(pending) = this.pending.take() {
                let body = std::mem::take(this.buffer).freeze();
                deliver(
                    &pending.sender,
                    Record {
                        request: pending.request,
                        response: Some(Response::from_parts(pending.head, body)),
                        error: this.error.take(),
                    },
                );
            }
        }
    }
}

impl Body for CaptureBody {
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
                    this.buffer.extend_from_slice(data);
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
