//! Retriable vs. fatal error classification.

use crate::error::HttpError;
use regex::Regex;
use std::error::Error as StdError;
use std::sync::LazyLock;

/// Messages of errors that repeat identically on every attempt.
///
/// Only consulted for opaque sources the typed checks cannot see through.
static FATAL_MESSAGE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?i)",
        r"stopped after \d+ redirects",
        r"|unsupported (protocol )?scheme",
        r"|invalid header",
        r"|certificate is not trusted",
        r"|invalid peer certificate",
        r"|scheme is not https?\b",
    ))
    .ok()
});

/// Returns `false` for errors where repeating the identical request can
/// never succeed, `true` for potentially transient failures.
///
/// Typed variants are checked first; `Transport` and `Tls` sources are then
/// searched for certificate validation failures, and finally their rendered
/// message chain is matched against known fatal messages.
#[must_use]
pub fn is_retriable_error(err: &HttpError) -> bool {
    match err {
        HttpError::TooManyRedirects { .. }
        | HttpError::UnsupportedScheme { .. }
        | HttpError::InvalidHeaderName(_)
        | HttpError::InvalidHeaderValue(_)
        | HttpError::RequestBuild(_)
        | HttpError::Cancelled
        | HttpError::BodyReplay(_)
        | HttpError::Compression(_)
        | HttpError::UnsupportedContentEncoding { .. }
        | HttpError::MissingRequestId => false,
        HttpError::Transport(source) | HttpError::Tls(source) => {
            let source: &(dyn StdError + 'static) = source.as_ref();
            !has_fatal_source(source) && !has_fatal_message(source)
        }
    }
}

/// Find the first error of type `T` in the source chain of `err`.
///
/// `io::Error::source()` skips the error it wraps, so `io::Error` payloads
/// are inspected explicitly.
pub fn find_in_chain<'a, T>(err: &'a (dyn StdError + 'static)) -> Option<&'a T>
where
    T: StdError + 'static,
{
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(found) = e.downcast_ref::<T>() {
            return Some(found);
        }
        if let Some(io) = e.downcast_ref::<std::io::Error>()
            && let Some(found) = io.get_ref().and_then(|inner| inner.downcast_ref::<T>())
        {
            return Some(found);
        }
        current = e.source();
    }
    None
}

/// Look for typed fatal errors in the source chain.
fn has_fatal_source(source: &(dyn StdError + 'static)) -> bool {
    if let Some(rustls::Error::InvalidCertificate(_)) = find_in_chain::<rustls::Error>(source) {
        return true;
    }
    if let Some(inner) = find_in_chain::<HttpError>(source)
        && !is_retriable_error(inner)
    {
        return true;
    }
    find_in_chain::<http::header::InvalidHeaderName>(source).is_some()
        || find_in_chain::<http::header::InvalidHeaderValue>(source).is_some()
}

fn has_fatal_message(source: &(dyn StdError + 'static)) -> bool {
    let Some(pattern) = FATAL_MESSAGE.as_ref() else {
        return false;
    };

    let mut rendered = source.to_string();
    let mut current = source.source();
    while let Some(err) = current {
        rendered.push_str(": ");
        rendered.push_str(&err.to_string());
        current = err.source();
    }
    pattern.is_match(&rendered)
}
