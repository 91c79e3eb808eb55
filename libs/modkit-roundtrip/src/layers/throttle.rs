use crate::config::ThrottleConfig;
use crate::error::HttpError;
use crate::layers::Unwrapper;
use crate::request::{RequestBody, cancellation_token};
use crate::response::ResponseBody;
use crate::sleep::{Sleeper, TokioSleeper, sleep_or_cancel};
use futures::future::BoxFuture;
use http::{Request, Response};
use parking_lot::Mutex;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::Instant;
use tower::{Layer, Service};

/// Slot reservation shared by every service built from one [`ThrottleLayer`].
#[derive(Debug, Default)]
struct Schedule {
    last_request: Mutex<Option<Instant>>,
}

impl Schedule {
    /// Reserve the next free slot and return how long to wait for it.
    fn reserve(&self, window: Duration) -> Duration {
        let mut last = self.last_request.lock();
        let now = Instant::now();
        let wait = last.map_or(Duration::ZERO, |last| {
            last.checked_add(window)
                .map_or(window, |next| next.saturating_duration_since(now))
        });
        *last = Some(now.checked_add(wait).unwrap_or(now));
        wait
    }
}

/// Tower layer pacing requests to at most `qps` per second
///
/// Fixed-rate spacing without bursts: consecutive requests through the same
/// layer are at least `1 / qps` seconds apart, including concurrent ones.
#[derive(Clone)]
pub struct ThrottleLayer {
    window: Option<Duration>,
    schedule: Arc<Schedule>,
    sleeper: Arc<dyn Sleeper>,
}

impl ThrottleLayer {
    /// Layer pacing at `config.qps`; one schedule is shared by every service it builds
    #[must_use]
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            window: config.window(),
            schedule: Arc::new(Schedule::default()),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Use `sleeper` for pacing waits instead of the tokio timer
    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }
}

impl<S> Layer<S> for ThrottleLayer {
    type Service = ThrottleService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ThrottleService {
            inner,
            window: self.window,
            schedule: Arc::clone(&self.schedule),
            sleeper: Arc::clone(&self.sleeper),
        }
    }
}

/// Service that delays each request until its reserved slot
#[derive(Clone)]
pub struct ThrottleService<S> {
    inner: S,
    window: Option<Duration>,
    schedule: Arc<Schedule>,
    sleeper: Arc<dyn Sleeper>,
}

impl<S> Unwrapper for ThrottleService<S> {
    type Inner = S;

    fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S> Service<Request<RequestBody>> for ThrottleService<S>
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

        let Some(window) = self.window else {
            return Box::pin(inner.call(req));
        };

        let wait = self.schedule.reserve(window);
        let sleeper = Arc::clone(&self.sleeper);

        Box::pin(async move {
            if !wait.is_zero() {
                tracing::trace!(wait_ms = wait.as_millis(), "Throttling request");
                let cancel = cancellation_token(&req);
                sleep_or_cancel(sleeper.as_ref(), wait, &cancel).await?;
            }
            inner.call(req).await
        })
    }
}
