use crate::config::REQUEST_ID_HEADER;
use crate::layers::Unwrapper;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use http::{HeaderName, HeaderValue, Request};
use rand::Rng;
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// Random bytes per identifier; encodes to 16 base64 characters
const REQUEST_ID_BYTES: usize = 12;

/// Generate a fresh URL-safe request identifier.
#[must_use]
pub fn new_request_id() -> String {
    let mut bytes = [0u8; REQUEST_ID_BYTES];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Tower layer that stamps every request with a fresh `X-Request-ID`
#[derive(Clone, Copy, Debug, Default)]
pub struct RequestIdLayer;

impl RequestIdLayer {
    /// Create the layer
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for RequestIdLayer {
    type Service = RequestIdService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestIdService { inner }
    }
}

/// Service that replaces any `X-Request-ID` with a new identifier
#[derive(Clone, Debug)]
pub struct RequestIdService<S> {
    inner: S,
}

impl<S> Unwrapper for RequestIdService<S> {
    type Inner = S;

    fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S, ReqBody> Service<Request<ReqBody>> for RequestIdService<S>
where
    S: Service<Request<ReqBody>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let id = new_request_id();
        // Base64 output is always a valid header value
        if let Ok(value) = HeaderValue::from_str(&id) {
            req.headers_mut()
                .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
        }
        self.inner.call(req)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::request::RequestBody;
    use crate::testing::ScriptedTransport;
    use std::collections::HashSet;
    use tower::ServiceExt;

    #[test]
    fn test_request_id_shape() {
        let id = new_request_id();
        assert_eq!(id.len(), 16);
        assert!(
            id.chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
            "unexpected character in {id}"
        );
    }

    #[test]
    fn test_request_ids_are_unique() {
        let ids: HashSet<_> = (0..1000).map(|_| new_request_id()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[tokio::test]
    async fn test_request_id_set_and_replaced() {
        let transport = ScriptedTransport::ok();
        let mut svc = RequestIdLayer::new().layer(transport.clone());

        let first = Request::get("http://example.com")
            .body(RequestBody::empty())
            .unwrap();
        let second = Request::get("http://example.com")
            .header(REQUEST_ID_HEADER, "caller-supplied")
            .body(RequestBody::empty())
            .unwrap();

        svc.ready().await.unwrap().call(first).await.unwrap();
        svc.ready().await.unwrap().call(second).await.unwrap();

        let seen = transport.seen();
        let ids: Vec<_> = seen
            .iter()
            .map(|r| r.headers.get_all(REQUEST_ID_HEADER).iter().count())
            .collect();
        assert_eq!(ids, vec![1, 1]);
        assert_ne!(seen[1].headers[REQUEST_ID_HEADER], "caller-supplied");
        assert_ne!(
            seen[0].headers[REQUEST_ID_HEADER],
            seen[1].headers[REQUEST_ID_HEADER]
        );
    }
}
