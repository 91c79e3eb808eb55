use crate::config::RetryConfig;
use crate::error::HttpError;
use crate::layers::Unwrapper;
use crate::request::{BodyReplay, RequestBody, cancellation_token, ensure_replayable};
use crate::response::{ResponseBody, drain_response_body, parse_retry_after};
use crate::sleep::{Sleeper, TokioSleeper, sleep_or_cancel};
use futures::future::BoxFuture;
use http::{Request, Response};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::time::Instant;
use tower::{Layer, Service, ServiceExt};

/// Tower layer that retries requests according to a [`RetryPolicy`](crate::RetryPolicy)
///
/// Bodies are buffered once and replayed on every attempt. Retriable statuses
/// are not errors: when retries are exhausted the last response is returned.
#[derive(Clone)]
pub struct RetryLayer {
    config: RetryConfig,
    sleeper: Arc<dyn Sleeper>,
}

impl RetryLayer {
    /// Retry layer driven by `config.policy`
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Use `sleeper` for backoff waits instead of the tokio timer
    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }
}

impl<S> Layer<S> for RetryLayer {
    type Service = RetryService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RetryService {
            inner,
            config: self.config.clone(),
            sleeper: Arc::clone(&self.sleeper),
        }
    }
}

/// Service that reissues requests while the policy allows it
///
/// Before each retry the wait is taken from a positive `Retry-After` header
/// or the policy backoff, raced against the request's cancellation token.
/// A cancelled wait returns the previous outcome untouched; otherwise the
/// previous response body is drained (up to the configured limit) so the
/// connection can be reused.
#[derive(Clone)]
pub struct RetryService<S> {
    inner: S,
    config: RetryConfig,
    sleeper: Arc<dyn Sleeper>,
}

impl<S> Unwrapper for RetryService<S> {
    type Inner = S;

    fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S> Service<Request<RequestBody>> for RetryService<S>
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
        // `self.inner` is the instance `poll_ready` reserved
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let policy = Arc::clone(&self.config.policy);
        let drain_limit = self.config.drain_limit;
        let sleeper = Arc::clone(&self.sleeper);

        Box::pin(async move {
            let start = Instant::now();
            let req = ensure_replayable(req).await?;
            let cancel = cancellation_token(&req);

            // Parts carry version and extensions (cancellation token, replay
            // factory) onto every attempt
            let (parts, body) = req.into_parts();
            let replay = parts.extensions.get::<BodyReplay>().cloned();

            let host = parts
                .uri
                .authority()
                .map_or_else(|| "unknown".to_owned(), ToString::to_string);
            let request_id = parts
                .headers
                .get(crate::config::REQUEST_ID_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(String::from);

            let mut outcome = inner.call(Request::from_parts(parts.clone(), body)).await;

            let mut attempt = 0usize;
            while policy.should_retry(&cancel, start, attempt, outcome.as_ref()) {
                let body = match &replay {
                    Some(replay) => replay.replay().map_err(HttpError::BodyReplay)?,
                    None => RequestBody::empty(),
                };

                let retry_after = outcome
                    .as_ref()
                    .ok()
                    .and_then(|resp| parse_retry_after(resp.headers()));
                let wait = retry_after.unwrap_or_else(|| policy.backoff(start, attempt));

                match &outcome {
                    Ok(resp) => tracing::debug!(
                        retry = attempt + 1,
                        status = resp.status().as_u16(),
                        method = %parts.method,
                        host = %host,
                        request_id = ?request_id,
                        backoff_ms = wait.as_millis(),
                        retry_after_used = retry_after.is_some(),
                        "retrying retriable response"
                    ),
                    Err(err) => tracing::debug!(
                        retry = attempt + 1,
                        error = %err,
                        method = %parts.method,
                        host = %host,
                        request_id = ?request_id,
                        backoff_ms = wait.as_millis(),
                        "retrying transport error"
                    ),
                }

                if sleep_or_cancel(sleeper.as_ref(), wait, &cancel)
                    .await
                    .is_err()
                {
                    tracing::debug!(
                        retry = attempt + 1,
                        request_id = ?request_id,
                        "Request cancelled during backoff; returning previous outcome"
                    );
                    return outcome;
                }

                if let Ok(resp) = outcome
                    && let Err(e) = drain_response_body(resp, drain_limit).await
                {
                    tracing::debug!(
                        error = %e,
                        "could not drain discarded response body"
                    );
                }

                attempt += 1;
                let mut svc = inner.clone();
                svc.ready().await?;
                outcome = svc.call(Request::from_parts(parts.clone(), body)).await;
            }

            outcome
        })
    }
}
