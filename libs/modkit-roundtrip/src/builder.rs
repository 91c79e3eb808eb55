use crate::config::{CompressionConfig, LogConfig, RetryConfig, ThrottleConfig};
use crate::error::HttpError;
use crate::layers::{
    AcceptCompressedLayer, CaptureLayer, HeaderLayer, HeaderRule, LogLayer, PostCompressedLayer,
    RequestIdLayer, RetryLayer, ThrottleLayer,
};
use crate::request::RequestBody;
use crate::response::ResponseBody;
use crate::sleep::Sleeper;
use http::{Request, Response};
use std::sync::Arc;
use tower::util::BoxCloneService;
use tower::{Service, ServiceBuilder, ServiceExt};

/// Type-erased decorated transport returned by [`RoundTripBuilder::build`].
pub type BoxTransport = BoxCloneService<Request<RequestBody>, Response<ResponseBody>, HttpError>;

/// Builder composing the decorator stack around a transport.
///
/// Stages are applied in a fixed order regardless of the order the builder
/// methods are called in. Retry is enabled by default; everything else is
/// opt-in.
#[derive(Clone)]
pub struct RoundTripBuilder {
    retry: Option<RetryConfig>,
    throttle: Option<ThrottleConfig>,
    request_id: bool,
    post_compressed: Option<CompressionConfig>,
    accept_compressed: bool,
    log: Option<LogConfig>,
    capture: Option<CaptureLayer>,
    headers: Vec<HeaderRule>,
    sleeper: Option<Arc<dyn Sleeper>>,
}

impl RoundTripBuilder {
    /// Create a new builder with retry enabled and no other stage
    #[must_use]
    pub fn new() -> Self {
        Self {
            retry: Some(RetryConfig::default()),
            throttle: None,
            request_id: false,
            post_compressed: None,
            accept_compressed: false,
            log: None,
            capture: None,
            headers: Vec::new(),
            sleeper: None,
        }
    }

    /// Set the retry configuration
    #[must_use]
    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.retry = Some(config);
        self
    }

    /// Remove the retry stage
    #[must_use]
    pub fn without_retry(mut self) -> Self {
        self.retry = None;
        self
    }

    /// Pace requests; `qps <= 0` passes requests through undelayed
    #[must_use]
    pub fn throttle(mut self, config: ThrottleConfig) -> Self {
        self.throttle = Some(config);
        self
    }

    /// Set a fresh `X-Request-ID` on every attempt
    #[must_use]
    pub fn request_id(mut self) -> Self {
        self.request_id = true;
        self
    }

    /// Compress request bodies
    #[must_use]
    pub fn post_compressed(mut self, config: CompressionConfig) -> Self {
        self.post_compressed = Some(config);
        self
    }

    /// Advertise and decode compressed responses
    #[must_use]
    pub fn accept_compressed(mut self) -> Self {
        self.accept_compressed = true;
        self
    }

    /// Log every attempt
    ///
    /// Requires [`request_id`](Self::request_id); without it every request
    /// fails with `HttpError::MissingRequestId`.
    #[must_use]
    pub fn log(mut self, config: LogConfig) -> Self {
        self.log = Some(config);
        self
    }

    /// Record every attempt on the layer's channel
    #[must_use]
    pub fn capture(mut self, layer: CaptureLayer) -> Self {
        self.capture = Some(layer);
        self
    }

    /// Append a header rule; rules run in the order they were added
    #[must_use]
    pub fn header(mut self, rule: HeaderRule) -> Self {
        self.headers.push(rule);
        self
    }

    /// Wait provider shared by the retry and throttle stages
    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = Some(sleeper);
        self
    }

    /// Wrap `transport` in the configured decorators
    ///
    /// Request flow (outer → inner):
    ///   Retry → Throttle → RequestId → PostCompressed → AcceptCompressed →
    ///   Log → Capture → Header → transport
    ///
    /// Throttle sits inside Retry so every attempt takes a slot; RequestId,
    /// Log and Capture see each attempt separately.
    #[must_use]
    pub fn build<T>(self, transport: T) -> BoxTransport
    where
        T: Service<Request<RequestBody>, Response = Response<ResponseBody>, Error = HttpError>
            + Clone
            + Send
            + 'static,
        T::Future: Send + 'static,
    {
        let mut service = transport.boxed_clone();

        if !self.headers.is_empty() {
            service = ServiceBuilder::new()
                .layer(HeaderLayer::new(self.headers))
                .service(service)
                .boxed_clone();
        }

        if let Some(capture) = self.capture {
            service = ServiceBuilder::new()
                .layer(capture)
                .service(service)
                .boxed_clone();
        }

        if let Some(log) = self.log {
            service = ServiceBuilder::new()
                .layer(LogLayer::new(log))
                .service(service)
                .boxed_clone();
        }

        if self.accept_compressed {
            service = ServiceBuilder::new()
                .layer(AcceptCompressedLayer::new())
                .service(service)
                .boxed_clone();
        }

        if let Some(compression) = self.post_compressed {
            service = ServiceBuilder::new()
                .layer(PostCompressedLayer::new(compression))
                .service(service)
                .boxed_clone();
        }

        if self.request_id {
            service = ServiceBuilder::new()
                .layer(RequestIdLayer::new())
                .service(service)
                .boxed_clone();
        }

        if let Some(throttle) = self.throttle {
            let mut layer = ThrottleLayer::new(throttle);
            if let Some(sleeper) = &self.sleeper {
                layer = layer.with_sleeper(Arc::clone(sleeper));
            }
            service = ServiceBuilder::new()
                .layer(layer)
                .service(service)
                .boxed_clone();
        }

        if let Some(retry) = self.retry {
            let mut layer = RetryLayer::new(retry);
            if let Some(sleeper) = self.sleeper {
                layer = layer.with_sleeper(sleeper);
            }
            service = ServiceBuilder::new()
                .layer(layer)
                .service(service)
                .boxed_clone();
        }

        service
    }
}

impl Default for RoundTripBuilder {
    fn default() -> Self {
        Self::new()
    }
}
