use crate::error::HttpError;
use crate::layers::Unwrapper;
use http::{HeaderMap, HeaderName, HeaderValue, Request};
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// A single header mutation applied by [`HeaderLayer`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderRule {
    /// Remove every value of the header
    Remove(HeaderName),
    /// Replace any prior values with one value
    Set(HeaderName, HeaderValue),
    /// Add values after any prior ones
    Append(HeaderName, Vec<HeaderValue>),
}

impl HeaderRule {
    /// # Errors
    /// Returns `HttpError::InvalidHeaderName` if `name` is not a valid header name
    pub fn remove(name: &str) -> Result<Self, HttpError> {
        Ok(Self::Remove(HeaderName::try_from(name)?))
    }

    /// # Errors
    /// Returns `HttpError::InvalidHeaderName` or `HttpError::InvalidHeaderValue`
    pub fn set(name: &str, value: &str) -> Result<Self, HttpError> {
        Ok(Self::Set(
            HeaderName::try_from(name)?,
            HeaderValue::from_str(value)?,
        ))
    }

    /// # Errors
    /// Returns `HttpError::InvalidHeaderName` or `HttpError::InvalidHeaderValue`
    pub fn append<I, V>(name: &str, values: I) -> Result<Self, HttpError>
    where
        I: IntoIterator<Item = V>,
        V: AsRef<str>,
    {
        let values = values
            .into_iter()
            .map(|v| HeaderValue::from_str(v.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::Append(HeaderName::try_from(name)?, values))
    }

    /// `Authorization: Bearer <token>`, marked sensitive
    ///
    /// # Errors
    /// Returns `HttpError::InvalidHeaderValue` if the token contains invalid characters
    pub fn bearer(token: &str) -> Result<Self, HttpError> {
        let mut value = HeaderValue::from_str(&format!("Bearer {token}"))?;
        value.set_sensitive(true);
        Ok(Self::Set(http::header::AUTHORIZATION, value))
    }

    fn apply(&self, headers: &mut HeaderMap) {
        match self {
            HeaderRule::Remove(name) => {
                headers.remove(name);
            }
            HeaderRule::Set(name, value) => {
                headers.insert(name.clone(), value.clone());
            }
            HeaderRule::Append(name, values) => {
                for value in values {
                    headers.append(name.clone(), value.clone());
                }
            }
        }
    }
}

/// Tower layer applying an ordered list of [`HeaderRule`]s to every request
#[derive(Clone, Debug, Default)]
pub struct HeaderLayer {
    rules: Arc<[HeaderRule]>,
}

impl HeaderLayer {
    /// Layer applying `rules` in order
    #[must_use]
    pub fn new(rules: impl IntoIterator<Item = HeaderRule>) -> Self {
        Self {
            rules: rules.into_iter().collect(),
        }
    }
}

impl<S> Layer<S> for HeaderLayer {
    type Service = HeaderService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        HeaderService {
            inner,
            rules: Arc::clone(&self.rules),
        }
    }
}

/// Service that rewrites request headers
#[derive(Clone, Debug)]
pub struct HeaderService<S> {
    inner: S,
    rules: Arc<[HeaderRule]>,
}

impl<S> Unwrapper for HeaderService<S> {
    type Inner = S;

    fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S, ReqBody> Service<Request<ReqBody>> for HeaderService<S>
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
        for rule in &*self.rules {
            rule.apply(req.headers_mut());
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
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_rules_apply_in_order() {
        let transport = ScriptedTransport::ok();
        let layer = HeaderLayer::new([
            HeaderRule::remove("x-debug").unwrap(),
            HeaderRule::set("accept", "application/json").unwrap(),
            HeaderRule::append("x-tag", ["a", "b"]).unwrap(),
            HeaderRule::bearer("s3cret").unwrap(),
        ]);
        let mut svc = layer.layer(transport.clone());

        let req = Request::get("http://example.com")
            .header("x-debug", "1")
            .header("accept", "text/html")
            .header("accept", "text/plain")
            .header("x-tag", "z")
            .body(RequestBody::empty())
            .unwrap();
        svc.ready().await.unwrap().call(req).await.unwrap();

        let headers = &transport.seen()[0].headers;
        assert!(!headers.contains_key("x-debug"));
        let accept: Vec<_> = headers.get_all("accept").iter().collect();
        assert_eq!(accept, vec!["application/json"]);
        let tags: Vec<_> = headers.get_all("x-tag").iter().collect();
        assert_eq!(tags, vec!["z", "a", "b"]);
        assert_eq!(headers["authorization"], "Bearer s3cret");
        assert!(headers["authorization"].is_sensitive());
    }

    #[test]
    fn test_invalid_rules_rejected() {
        assert!(matches!(
            HeaderRule::set("bad header", "v"),
            Err(HttpError::InvalidHeaderName(_))
        ));
        assert!(matches!(
            HeaderRule::set("x-ok", "line\nbreak"),
            Err(HttpError::InvalidHeaderValue(_))
        ));
        assert!(matches!(
            HeaderRule::append("x-ok", ["fine", "not\rfine"]),
            Err(HttpError::InvalidHeaderValue(_))
        ));
        assert!(HeaderRule::remove("").is_err());
    }

    #[test]
    fn test_later_rules_see_earlier_changes() {
        let mut headers = HeaderMap::new();
        for rule in [
            HeaderRule::set("x-a", "1").unwrap(),
            HeaderRule::remove("x-a").unwrap(),
            HeaderRule::append("x-a", ["2"]).unwrap(),
        ] {
            rule.apply(&mut headers);
        }
        assert_eq!(headers.get_all("x-a").iter().count(), 1);
        assert_eq!(headers["x-a"], "2");
    }
}
