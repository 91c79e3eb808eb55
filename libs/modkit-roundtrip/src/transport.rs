//! Terminal transport over a pooled hyper-util client.

use crate::classify::find_in_chain;
use crate::error::HttpError;
use crate::layers::{RedirectLimitPolicy, check_scheme};
use crate::request::{RequestBody, ensure_replayable};
use crate::response::{ResponseBody, box_response};
use crate::tls;
use futures::future::BoxFuture;
use http::{Request, Response};
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use std::fmt;
use std::task::{Context, Poll};
use std::time::Duration;
use tower::util::BoxCloneService;
use tower::{Layer, Service, ServiceExt};
use tower_http::follow_redirect::FollowRedirectLayer;

/// Default cap on redirect responses per request
pub const DEFAULT_MAX_REDIRECTS: usize = 10;

/// Default idle connection lifetime in the pool
pub const DEFAULT_POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

type Inner = BoxCloneService<Request<RequestBody>, Response<ResponseBody>, HttpError>;

/// Builder for [`HyperTransport`]
#[derive(Debug, Clone)]
pub struct HyperTransportBuilder {
    max_redirects: usize,
    allow_http: bool,
    pool_idle_timeout: Option<Duration>,
}

impl Default for HyperTransportBuilder {
    fn default() -> Self {
        Self {
            max_redirects: DEFAULT_MAX_REDIRECTS,
            allow_http: false,
            pool_idle_timeout: Some(DEFAULT_POOL_IDLE_TIMEOUT),
        }
    }
}

impl HyperTransportBuilder {
    /// Fail with `TooManyRedirects` once `max` redirect responses were received
    ///
    /// `0` disables following; the redirect response is returned as is.
    #[must_use]
    pub fn max_redirects(mut self, max: usize) -> Self {
        self.max_redirects = max;
        self
    }

    /// Accept plain `http://` URIs, for local test servers
    ///
    /// Only available in debug builds or with the `allow-insecure-http`
    /// feature.
    #[cfg(any(debug_assertions, feature = "allow-insecure-http"))]
    #[must_use]
    pub fn allow_insecure_http(mut self) -> Self {
        self.allow_http = true;
        self
    }

    /// Set how long idle pooled connections are kept; `None` keeps them forever
    #[must_use]
    pub fn pool_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.pool_idle_timeout = timeout;
        self
    }

    /// Build the transport
    ///
    /// # Errors
    /// Returns `HttpError::Tls` if the TLS connector cannot be initialized.
    pub fn build(self) -> Result<HyperTransport, HttpError> {
        if self.allow_http {
            tracing::warn!("Insecure HTTP enabled; plain http:// requests will be sent");
        }

        let https = tls::build_https_connector(self.allow_http)?;

        let mut client_builder = Client::builder(TokioExecutor::new());
        // pool_idle_timeout needs a timer to take effect
        client_builder.pool_timer(TokioTimer::new());
        if let Some(idle_timeout) = self.pool_idle_timeout {
            client_builder.pool_idle_timeout(idle_timeout);
        }
        let client = client_builder.build::<_, RequestBody>(https);

        let service = client
            .map_err(map_client_error)
            .map_response(box_response);
        let service = FollowRedirectLayer::with_policy(RedirectLimitPolicy::new(
            self.max_redirects,
            self.allow_http,
        ))
        .layer(service);

        Ok(HyperTransport {
            inner: service.boxed_clone(),
            allow_http: self.allow_http,
        })
    }
}

/// Map a hyper-util client error, telling TLS failures apart from the rest
fn map_client_error(err: hyper_util::client::legacy::Error) -> HttpError {
    if find_in_chain::<rustls::Error>(&err).is_some() {
        HttpError::Tls(Box::new(err))
    } else {
        HttpError::Transport(Box::new(err))
    }
}

/// Transport sending requests over a pooled HTTPS client
///
/// Follows redirects up to the configured limit and rejects unsupported
/// schemes before any I/O. Cloning shares the connection pool.
#[derive(Clone)]
pub struct HyperTransport {
    inner: Inner,
    allow_http: bool,
}

impl HyperTransport {
    /// Start configuring a transport
    #[must_use]
    pub fn builder() -> HyperTransportBuilder {
        HyperTransportBuilder::default()
    }
}

impl fmt::Debug for HyperTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HyperTransport")
            .field("allow_http", &self.allow_http)
            .finish_non_exhaustive()
    }
}

impl Service<Request<RequestBody>> for HyperTransport {
    type Response = Response<ResponseBody>;
    type Error = HttpError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<RequestBody>) -> Self::Future {
        if let Err(e) = check_scheme(req.uri(), self.allow_http) {
            return Box::pin(std::future::ready(Err(e)));
        }

        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            // Redirects resend the body from its replay factory
            let req = ensure_replayable(req).await?;
            inner.call(req).await
        })
    }
}
