//! Redirect policy for the hyper transport
//!
//! [`RedirectLimitPolicy`] plugs into tower-http's `FollowRedirect` and:
//! - fails with [`HttpError::TooManyRedirects`] once `max_redirects`
//!   redirect responses were received, so exactly `max_redirects` requests
//!   reach the server
//! - rejects redirects to schemes the transport does not speak
//! - strips sensitive headers (`Authorization`, `Cookie`,
//!   `Proxy-Authorization`) once the chain leaves the original origin
//! - resends the request body on 307/308 redirects from the request's
//!   [`BodyReplay`]; a failing factory fails the request, and a body with no
//!   factory leaves the redirect unfollowed

use crate::error::HttpError;
use crate::request::{BodyReplay, RequestBody};
use http::{Request, StatusCode, Uri, header};
use http_body::Body;
use tower_http::follow_redirect::policy::{Action, Attempt, Policy};

/// Credentials that never follow a redirect to another origin
const CREDENTIAL_HEADERS: [header::HeaderName; 3] = [
    header::AUTHORIZATION,
    header::PROXY_AUTHORIZATION,
    header::COOKIE,
];

/// Counting redirect policy; cloned per request by `FollowRedirect`
#[derive(Debug)]
pub struct RedirectLimitPolicy {
    max_redirects: usize,
    allow_http: bool,
    /// Redirect responses seen for the current request
    redirect_count: usize,
    cross_origin_detected: bool,
    has_body: bool,
    replay: Option<BodyReplay>,
    /// Body for the next hop, produced in `redirect` and installed in `on_request`
    staged: Option<RequestBody>,
}

impl Clone for RedirectLimitPolicy {
    fn clone(&self) -> Self {
        Self {
            max_redirects: self.max_redirects,
            allow_http: self.allow_http,
            redirect_count: self.redirect_count,
            cross_origin_detected: self.cross_origin_detected,
            has_body: self.has_body,
            replay: self.replay.clone(),
            staged: None,
        }
    }
}

impl RedirectLimitPolicy {
    /// Policy failing on the `max_redirects`-th redirect; `0` disables following
    #[must_use]
    pub fn new(max_redirects: usize, allow_http: bool) -> Self {
        Self {
            max_redirects,
            allow_http,
            redirect_count: 0,
            cross_origin_detected: false,
            has_body: false,
            replay: None,
            staged: None,
        }
    }
}

/// `(scheme, host, port)` with scheme-implied ports filled in; a missing
/// scheme counts as `https`.
fn origin(uri: &Uri) -> (&str, &str, Option<u16>) {
    let scheme = uri.scheme_str().unwrap_or("https");
    let port = uri.port_u16().or(match scheme {
        "https" => Some(443),
        "http" => Some(80),
        _ => None,
    });
    (scheme, uri.host().unwrap_or_default(), port)
}

/// Validate a URI scheme against what the transport speaks.
///
/// # Errors
/// Returns `HttpError::UnsupportedScheme` for anything but `https`, or
/// `http` when `allow_http` is set.
pub fn check_scheme(uri: &Uri, allow_http: bool) -> Result<(), HttpError> {
    match uri.scheme_str() {
        Some("https") => Ok(()),
        Some("http") if allow_http => Ok(()),
        other => Err(HttpError::UnsupportedScheme {
            scheme: other.unwrap_or_default().to_owned(),
        }),
    }
}

impl Policy<RequestBody, HttpError> for RedirectLimitPolicy {
    fn redirect(&mut self, attempt: &Attempt<'_>) -> Result<Action, HttpError> {
        if self.max_redirects == 0 {
            return Ok(Action::Stop);
        }

        self.redirect_count += 1;
        if self.redirect_count >= self.max_redirects {
            tracing::debug!(
                count = self.redirect_count,
                max = self.max_redirects,
                "redirect cap hit"
            );
            return Err(HttpError::TooManyRedirects {
                max: self.max_redirects,
            });
        }

        let from = attempt.previous();
        let to = attempt.location();
        check_scheme(to, self.allow_http)?;

        if origin(from) != origin(to) {
            self.cross_origin_detected = true;
            tracing::debug!(from = %from, to = %to, "redirect leaves the original origin");
        }

        // 307/308 keep the method, so the next hop needs the body again
        let keeps_body = matches!(
            attempt.status(),
            StatusCode::TEMPORARY_REDIRECT | StatusCode::PERMANENT_REDIRECT
        );
        if keeps_body && self.has_body {
            let Some(replay) = &self.replay else {
                tracing::debug!(to = %to, "no body replay factory; returning redirect response");
                return Ok(Action::Stop);
            };
            self.staged = Some(replay.replay().map_err(HttpError::BodyReplay)?);
        }

        Ok(Action::Follow)
    }

    fn on_request(&mut self, request: &mut Request<RequestBody>) {
        // First call sees the original request, extensions included
        if self.redirect_count == 0 {
            self.has_body = !request.body().is_end_stream();
            self.replay = request.extensions().get::<BodyReplay>().cloned();
            return;
        }

        if self.cross_origin_detected {
            for name in &CREDENTIAL_HEADERS {
                if request.headers_mut().remove(name).is_some() {
                    tracing::debug!(header = %name, "dropped credential header after redirect");
                }
            }
        }

        if let Some(body) = self.staged.take() {
            *request.body_mut() = body;
        }
    }

    fn clone_body(&self, _body: &RequestBody) -> Option<RequestBody> {
        // Runs before the first `on_request`; `redirect` stages the real copy
        Some(RequestBody::empty())
    }
}
