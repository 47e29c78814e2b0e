//! REST error envelope
//!
//! Every failed request answers `{error: {code, message, details?}}` with
//! the machine tag from the common error type.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use objectdeck_common::Error;

/// Result alias for handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Wrapper turning the common error into the wire envelope.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut error = serde_json::json!({
            "code": self.0.code().as_str(),
            "message": self.0.to_string(),
        });
        if let Some(provider_error) = self.0.provider_detail() {
            error["details"] = serde_json::json!({"providerError": provider_error});
        }
        if status.is_server_error() {
            tracing::error!("request failed: {}", self.0);
        }
        (status, axum::Json(serde_json::json!({"error": error}))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use objectdeck_common::ErrorCode;

    #[test]
    fn test_envelope_shape() {
        let response = ApiError(Error::provider(
            ErrorCode::NotSupported,
            "azure_blob does not support presigned upload",
            Some("upstream says no".into()),
        ))
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
