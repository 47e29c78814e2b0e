//! Error types for ObjectDeck
//!
//! Every error that crosses a component boundary carries one of the stable
//! machine tags in [`ErrorCode`]. Provider failures are normalized into the
//! `Provider` variant at the adapter boundary, preserving the provider's
//! original message for diagnostics.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Common result type for ObjectDeck operations
pub type Result<T> = std::result::Result<T, Error>;

/// Stable machine tags exposed in the REST error envelope and on job rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NotFound,
    InvalidArgument,
    NotSupported,
    EncryptionRequired,
    Unauthorized,
    Forbidden,
    RateLimited,
    AccessDenied,
    Conflict,
    ObjectIndexNotFound,
    Internal,
}

impl ErrorCode {
    /// Wire representation of the tag.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::InvalidArgument => "invalid_argument",
            Self::NotSupported => "not_supported",
            Self::EncryptionRequired => "encryption_required",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::RateLimited => "rate_limited",
            Self::AccessDenied => "access_denied",
            Self::Conflict => "conflict",
            Self::ObjectIndexNotFound => "object_index_not_found",
            Self::Internal => "internal",
        }
    }

    /// Parse a stored tag back into the enum. Unknown tags map to `Internal`.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "not_found" => Self::NotFound,
            "invalid_argument" => Self::InvalidArgument,
            "not_supported" => Self::NotSupported,
            "encryption_required" => Self::EncryptionRequired,
            "unauthorized" => Self::Unauthorized,
            "forbidden" => Self::Forbidden,
            "rate_limited" => Self::RateLimited,
            "access_denied" => Self::AccessDenied,
            "conflict" => Self::Conflict,
            "object_index_not_found" => Self::ObjectIndexNotFound,
            _ => Self::Internal,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Common error type for ObjectDeck
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    NotSupported(String),

    #[error("value is encrypted but no encryption key is configured")]
    EncryptionRequired,

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Conflict(String),

    #[error("no object index for {profile}/{bucket}")]
    ObjectIndexNotFound { profile: String, bucket: String },

    /// A storage-provider failure normalized to a stable tag. The provider's
    /// own message is kept verbatim for the `details.providerError` field.
    #[error("{message}")]
    Provider {
        code: ErrorCode,
        message: String,
        provider_error: Option<String>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Internal(String),
}

impl Error {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn not_supported(msg: impl Into<String>) -> Self {
        Self::NotSupported(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Normalized provider error carrying the provider's original message.
    pub fn provider(
        code: ErrorCode,
        msg: impl Into<String>,
        provider_error: Option<String>,
    ) -> Self {
        Self::Provider {
            code,
            message: msg.into(),
            provider_error,
        }
    }

    /// The stable machine tag for this error.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::NotSupported(_) => ErrorCode::NotSupported,
            Self::EncryptionRequired => ErrorCode::EncryptionRequired,
            Self::Unauthorized(_) => ErrorCode::Unauthorized,
            Self::Forbidden(_) => ErrorCode::Forbidden,
            Self::ObjectIndexNotFound { .. } => ErrorCode::ObjectIndexNotFound,
            Self::Conflict(_) => ErrorCode::Conflict,
            Self::Provider { code, .. } => *code,
            Self::Io(_) | Self::Internal(_) => ErrorCode::Internal,
        }
    }

    /// The provider's original message, when this error crossed an adapter.
    #[must_use]
    pub fn provider_detail(&self) -> Option<&str> {
        match self {
            Self::Provider { provider_error, .. } => provider_error.as_deref(),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.code() == ErrorCode::NotFound
    }

    /// HTTP status for the REST envelope.
    #[must_use]
    pub fn http_status_code(&self) -> u16 {
        match self.code() {
            ErrorCode::NotFound | ErrorCode::ObjectIndexNotFound => 404,
            ErrorCode::InvalidArgument | ErrorCode::NotSupported => 400,
            ErrorCode::Unauthorized => 401,
            ErrorCode::Forbidden | ErrorCode::AccessDenied => 403,
            ErrorCode::Conflict => 409,
            ErrorCode::RateLimited => 429,
            ErrorCode::EncryptionRequired | ErrorCode::Internal => 500,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Internal(format!("JSON error: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_round_trip() {
        for code in [
            ErrorCode::NotFound,
            ErrorCode::InvalidArgument,
            ErrorCode::NotSupported,
            ErrorCode::EncryptionRequired,
            ErrorCode::Unauthorized,
            ErrorCode::Forbidden,
            ErrorCode::RateLimited,
            ErrorCode::AccessDenied,
            ErrorCode::Conflict,
            ErrorCode::ObjectIndexNotFound,
            ErrorCode::Internal,
        ] {
            assert_eq!(ErrorCode::parse(code.as_str()), code);
        }
    }

    #[test]
    fn test_http_status() {
        assert_eq!(Error::not_found("x").http_status_code(), 404);
        assert_eq!(Error::invalid_argument("x").http_status_code(), 400);
        assert_eq!(Error::EncryptionRequired.http_status_code(), 500);
        assert_eq!(
            Error::provider(ErrorCode::RateLimited, "throttled", None).http_status_code(),
            429
        );
    }

    #[test]
    fn test_provider_detail_preserved() {
        let err = Error::provider(
            ErrorCode::AccessDenied,
            "provider rejected request",
            Some("SignatureDoesNotMatch".into()),
        );
        assert_eq!(err.provider_detail(), Some("SignatureDoesNotMatch"));
        assert_eq!(err.code(), ErrorCode::AccessDenied);
    }
}
