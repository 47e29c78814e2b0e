//! Provider error normalization
//!
//! Every non-success provider response funnels through [`normalize_response`]
//! so the rest of the system only ever sees the stable machine tags. The
//! provider's own message travels along for `details.providerError`.

use objectdeck_common::{Error, ErrorCode};
use reqwest::StatusCode;

pub(crate) fn normalize_status(status: StatusCode, context: &str, body: String) -> Error {
    let provider_error = extract_message(&body);
    let code = match status.as_u16() {
        404 | 410 => ErrorCode::NotFound,
        401 | 403 => ErrorCode::AccessDenied,
        409 | 412 => ErrorCode::Conflict,
        429 => ErrorCode::RateLimited,
        400 | 411 | 416 => ErrorCode::InvalidArgument,
        501 => ErrorCode::NotSupported,
        503 if looks_throttled(&body) => ErrorCode::RateLimited,
        _ => ErrorCode::Internal,
    };
    Error::provider(
        code,
        format!("{context} failed with status {}", status.as_u16()),
        provider_error,
    )
}

pub(crate) fn transport_error(context: &str, err: &reqwest::Error) -> Error {
    Error::provider(
        ErrorCode::Internal,
        format!("{context}: {err}"),
        None,
    )
}

/// Take a bounded, single-line excerpt of the provider body. XML/JSON error
/// documents vary per dialect; the raw text is informative enough.
fn extract_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    let mut excerpt: String = trimmed.chars().take(512).collect();
    excerpt.retain(|c| c != '\n' && c != '\r');
    Some(excerpt)
}

fn looks_throttled(body: &str) -> bool {
    body.contains("SlowDown") || body.contains("RequestLimitExceeded") || body.contains("Throttl")
}

/// Check a response, returning the body on success and a normalized error
/// otherwise.
pub(crate) async fn check_response(
    context: &str,
    response: reqwest::Response,
) -> objectdeck_common::Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(normalize_status(status, context, body))
}
