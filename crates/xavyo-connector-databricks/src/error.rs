//! Error types for the Databricks connector.

use thiserror::Error;

use crate::rate_limit::RateLimitInfo;

/// Result type alias using `DatabricksError`.
pub type DatabricksResult<T> = Result<T, DatabricksError>;

/// Message returned by workspaces that do not expose the permission assignment API.
const PERMISSION_API_UNAVAILABLE: &str =
    "Permission assignment APIs are not available for this workspace";

/// Structured error returned by the Databricks REST API for non-2xx responses.
///
/// Databricks sends `{"detail": ..., "message": ...}` bodies, frequently with a
/// `text/plain` content type, so the body is decoded without looking at the
/// declared content type.
#[derive(Debug, Clone, Error)]
#[error("unexpected status code {status}: {detail} {message}")]
pub struct ApiError {
    /// HTTP status code of the response.
    pub status: u16,
    /// `detail` field of the error body.
    pub detail: String,
    /// `message` field of the error body (raw body text when it is not JSON).
    pub message: String,
    /// Rate-limit metadata read from the failing response.
    pub rate_limit: RateLimitInfo,
}

impl ApiError {
    /// Returns true for 404 responses.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }

    /// Returns true when the platform rejected a write because of a stale etag.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        self.status == 409
    }

    /// Returns true for 429 responses.
    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        self.status == 429
    }

    /// Returns true when the workspace has no permission assignment API.
    ///
    /// Callers treat this as an empty result rather than a failure.
    #[must_use]
    pub fn is_permission_api_unavailable(&self) -> bool {
        self.status == 400 && self.message.contains(PERMISSION_API_UNAVAILABLE)
    }
}

/// Errors that can occur when interacting with Databricks.
#[derive(Debug, Error)]
pub enum DatabricksError {
    /// Configuration validation error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Authentication error (token acquisition or missing credentials).
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Databricks API returned a non-2xx response.
    #[error("Databricks API error: {0}")]
    Api(ApiError),

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parsing error.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// The endpoint has no route for the requested scope.
    #[error("unknown endpoint: {endpoint} ({scope} scope)")]
    UnknownEndpoint { endpoint: String, scope: String },

    /// Operation called with a scope it does not support.
    #[error("Invalid scope: {0}")]
    InvalidScope(String),

    /// Resource identifier could not be parsed.
    #[error("invalid resource ID: {0}")]
    InvalidResourceId(String),

    /// Principal reference is malformed or of an unsupported kind.
    #[error("invalid principal: {0}")]
    InvalidPrincipal(String),

    /// Pagination token could not be decoded.
    #[error("invalid page token: {0}")]
    InvalidPageToken(String),

    /// Operation is not supported by this resource type.
    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

impl DatabricksError {
    /// Returns the structured API error, if this is one.
    #[must_use]
    pub fn as_api(&self) -> Option<&ApiError> {
        match self {
            Self::Api(e) => Some(e),
            _ => None,
        }
    }

    /// Rate-limit metadata attached to the error, if the server responded.
    #[must_use]
    pub fn rate_limit(&self) -> Option<&RateLimitInfo> {
        self.as_api().map(|e| &e.rate_limit)
    }

    /// Returns true when a rule-set write failed on a stale etag.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        self.as_api().is_some_and(ApiError::is_conflict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(status: u16, message: &str) -> ApiError {
        ApiError {
            status,
            detail: String::new(),
            message: message.to_string(),
            rate_limit: RateLimitInfo::default(),
        }
    }

    #[test]
    fn test_permission_api_unavailable_requires_400() {
        let msg = "Permission assignment APIs are not available for this workspace.";
        assert!(api_error(400, msg).is_permission_api_unavailable());
        assert!(!api_error(403, msg).is_permission_api_unavailable());
        assert!(!api_error(400, "bad filter").is_permission_api_unavailable());
    }

    #[test]
    fn test_api_error_display() {
        let err = ApiError {
            status: 400,
            detail: "x".to_string(),
            message: "y".to_string(),
            rate_limit: RateLimitInfo::default(),
        };
        assert_eq!(err.to_string(), "unexpected status code 400: x y");
    }

    #[test]
    fn test_conflict_classification() {
        let err = DatabricksError::Api(api_error(409, "etag mismatch"));
        assert!(err.is_conflict());
        assert!(err.rate_limit().is_some());

        let err = DatabricksError::Config("missing".into());
        assert!(!err.is_conflict());
        assert!(err.rate_limit().is_none());
    }
}
