//! Test doubles shared by the decorator test modules.

use crate::error::HttpError;
use crate::request::RequestBody;
use crate::response::ResponseBody;
use crate::sleep::Sleeper;
use bytes::Bytes;
use futures::future::BoxFuture;
use http::{HeaderMap, Method, Request, Response, StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::Instant;
use tower::Service;

pub type Outcome = Result<Response<ResponseBody>, HttpError>;

pub fn body(data: impl Into<Bytes>) -> ResponseBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed()
}

pub fn response(status: u16) -> Response<ResponseBody> {
    response_with(status, &[], "")
}

pub fn response_with(
    status: u16,
    headers: &[(&'static str, &str)],
    data: impl Into<Bytes>,
) -> Response<ResponseBody> {
    let mut builder = Response::builder().status(StatusCode::from_u16(status).unwrap());
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(body(data)).unwrap()
}

pub async fn read_body(response: Response<ResponseBody>) -> Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

/// A request as observed by [`ScriptedTransport`].
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub at: Instant,
}

/// Fake transport returning scripted outcomes in order, then `fallback`.
#[derive(Clone)]
pub struct ScriptedTransport {
    script: Arc<Mutex<VecDeque<Outcome>>>,
    seen: Arc<Mutex<Vec<SeenRequest>>>,
    fallback: u16,
}

impl ScriptedTransport {
    pub fn new(script: Vec<Outcome>) -> Self {
        Self {
            script: Arc::new(Mutex::new(script.into())),
            seen: Arc::new(Mutex::new(Vec::new())),
            fallback: 200,
        }
    }

    pub fn ok() -> Self {
        Self::new(Vec::new())
    }

    pub fn always(status: u16) -> Self {
        Self {
            fallback: status,
            ..Self::ok()
        }
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn seen(&self) -> Vec<SeenRequest> {
        self.seen.lock().clone()
    }
}

impl Service<Request<RequestBody>> for ScriptedTransport {
    type Response = Response<ResponseBody>;
    type Error = HttpError;
    type Future = BoxFuture<'static, Outcome>;

    fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<RequestBody>) -> Self::Future {
        let this = self.clone();
        Box::pin(async move {
            let (parts, body) = req.into_parts();
            let body = body
                .collect()
                .await
                .map_err(HttpError::Transport)?
                .to_bytes();
            this.seen.lock().push(SeenRequest {
                method: parts.method,
                uri: parts.uri,
                headers: parts.headers,
                body,
                at: Instant::now(),
            });
            let next = this.script.lock().pop_front();
            next.unwrap_or_else(|| Ok(response(this.fallback)))
        })
    }
}

/// Sleeper that records requested durations and returns immediately.
#[derive(Clone, Default)]
pub struct RecordingSleeper {
    sleeps: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleeper {
    pub fn recorded(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        self.sleeps.lock().push(duration);
        Box::pin(futures::future::ready(()))
    }
}

/// Sleeper whose waits never complete.
#[derive(Clone, Copy, Default)]
pub struct PendingSleeper;

impl Sleeper for PendingSleeper {
    fn sleep(&self, _duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(futures::future::pending())
    }
}
