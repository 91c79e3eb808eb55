//! End-to-end tests of the decorator stack over `HyperTransport` against a
//! local mock server.

use futures::future::BoxFuture;
use http::{Method as HttpMethod, Request, StatusCode};
use http_body_util::BodyExt;
use httpmock::prelude::*;
use modkit_roundtrip::{
    ExponentialBackoff, HttpError, HyperTransport, RequestBody, RetryConfig, RoundTripBuilder,
    Sleeper, replayable_request,
};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

/// Skips every wait so retry tests run at full speed
struct NoWait;

impl Sleeper for NoWait {
    fn sleep(&self, _duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(futures::future::ready(()))
    }
}

fn transport() -> HyperTransport {
    HyperTransport::builder()
        .allow_insecure_http()
        .build()
        .unwrap()
}

fn get(url: &str) -> Request<RequestBody> {
    Request::get(url).body(RequestBody::empty()).unwrap()
}

fn gzip_compress(data: &[u8]) -> Vec<u8> {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

#[tokio::test]
async fn test_retriable_status_exhausts_attempts() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET).path("/busy");
        then.status(503).body("try later");
    });

    let client = RoundTripBuilder::new()
        .with_sleeper(Arc::new(NoWait))
        .build(transport());

    let resp = client
        .oneshot(get(&format!("{}/busy", server.base_url())))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(mock.calls(), 4, "initial attempt plus 3 retries");
}

#[tokio::test]
async fn test_post_body_resent_on_every_attempt() {
    let server = MockServer::start();
    // Only matches when the full body arrives
    let mock = server.mock(|when, then| {
        when.method(POST).path("/items").body("name=widget");
        then.status(502);
    });

    let client = RoundTripBuilder::new()
        .with_sleeper(Arc::new(NoWait))
        .build(transport());

    let req = replayable_request(
        Request::post(format!("{}/items", server.base_url())),
        "name=widget",
    )
    .unwrap();
    let resp = client.oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(mock.calls(), 4);
}

#[tokio::test]
async fn test_redirect_loop_not_retried() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET).path("/loop");
        then.status(302).header("location", "/loop");
    });

    let policy = ExponentialBackoff {
        max_attempts: 10,
        retry_transport_errors: true,
        ..Default::default()
    };
    let client = RoundTripBuilder::new()
        .retry(RetryConfig::with_policy(policy))
        .with_sleeper(Arc::new(NoWait))
        .build(transport());

    let err = client
        .oneshot(get(&format!("{}/loop", server.base_url())))
        .await
        .unwrap_err();

    assert!(matches!(err, HttpError::TooManyRedirects { max: 10 }), "got {err:?}");
    assert_eq!(mock.calls(), 10);
}

#[tokio::test]
async fn test_temporary_redirect_keeps_method_and_body() {
    let server = MockServer::start();
    let old = server.mock(|when, then| {
        when.method(POST).path("/v1/items");
        then.status(307).header("location", "/v2/items");
    });
    let new = server.mock(|when, then| {
        when.method(POST).path("/v2/items").body("payload");
        then.status(201).body("created");
    });

    let req = Request::post(format!("{}/v1/items", server.base_url()))
        .body(RequestBody::from("payload"))
        .unwrap();
    let resp = transport().oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::CREATED);
    assert_eq!(old.calls(), 1);
    assert_eq!(new.calls(), 1);
}

#[tokio::test]
async fn test_gzip_response_decoded() {
    let server = MockServer::start();
    let original = b"Hello, this is a test body that will be gzip compressed!";
    let mock = server.mock(|when, then| {
        when.method(GET)
            .path("/gzip")
            .header("accept-encoding", "zstd, br, gzip");
        then.status(200)
            .header("content-encoding", "gzip")
            .body(gzip_compress(original));
    });

    let client = RoundTripBuilder::new()
        .accept_compressed()
        .build(transport());

    let resp = client
        .oneshot(get(&format!("{}/gzip", server.base_url())))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert!(!resp.headers().contains_key("content-encoding"));
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], original);
    assert_eq!(mock.calls(), 1);
}

#[tokio::test]
async fn test_unknown_response_encoding_rejected() {
    let server = MockServer::start();
    let _m = server.mock(|when, then| {
        when.method(GET).path("/deflate");
        then.status(200)
            .header("content-encoding", "deflate")
            .body("not really deflate");
    });

    let client = RoundTripBuilder::new()
        .without_retry()
        .accept_compressed()
        .build(transport());

    let err = client
        .oneshot(get(&format!("{}/deflate", server.base_url())))
        .await
        .unwrap_err();

    assert!(
        matches!(err, HttpError::UnsupportedContentEncoding { ref encoding } if encoding == "deflate")
    );
}

#[tokio::test]
async fn test_unsupported_scheme_fails_without_retry() {
    let policy = ExponentialBackoff {
        retry_transport_errors: true,
        ..Default::default()
    };
    let sleeper = Arc::new(NoWait);
    let client = RoundTripBuilder::new()
        .retry(RetryConfig::with_policy(policy))
        .with_sleeper(sleeper)
        .build(transport());

    let req = Request::builder()
        .method(HttpMethod::GET)
        .uri("ftp://127.0.0.1/file")
        .body(RequestBody::empty())
        .unwrap();
    let err = client.oneshot(req).await.unwrap_err();

    assert!(matches!(err, HttpError::UnsupportedScheme { ref scheme } if scheme == "ftp"));
}
