//! Injectable wait provider used by the retry and throttle decorators.

use crate::error::HttpError;
use futures::future::BoxFuture;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Source of delays for backoff and pacing.
///
/// Injected per decorator instance so tests can observe or skip waits
/// without touching the clock of other components.
pub trait Sleeper: Send + Sync + 'static {
    /// Future that completes after `duration`
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// Default [`Sleeper`] backed by `tokio::time::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Wait for `duration` unless `cancel` fires first.
///
/// # Errors
/// Returns `HttpError::Cancelled` if the token is (or becomes) cancelled
/// before the wait completes.
pub async fn sleep_or_cancel(
    sleeper: &dyn Sleeper,
    duration: Duration,
    cancel: &CancellationToken,
) -> Result<(), HttpError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(HttpError::Cancelled),
        () = sleeper.sleep(duration) => Ok(()),
    }
}
