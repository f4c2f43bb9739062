//! Cluster gateway errors

use thiserror::Error;

/// Errors returned by cluster API calls.
///
/// Every variant maps to an HTTP-like status class so callers can branch on
/// business outcomes (not found, conflict) without inspecting raw API errors.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Object does not exist (404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Optimistic-concurrency conflict or name collision (409)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Permission denied (403)
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Request rejected by the API server (other 4xx)
    #[error("Request rejected ({code}): {message}")]
    Rejected {
        /// HTTP status code
        code: u16,
        /// Server message
        message: String,
    },

    /// Network failure, timeout, throttling or 5xx
    #[error("Transient error: {message}")]
    Transient {
        /// HTTP status code, absent for network failures
        code: Option<u16>,
        /// Error description
        message: String,
    },

    /// Object could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl GatewayError {
    /// Builds an error from an HTTP status code and message.
    pub fn from_status(code: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            404 => GatewayError::NotFound(message),
            409 => GatewayError::Conflict(message),
            401 | 403 => GatewayError::Forbidden(message),
            429 | 500..=599 => GatewayError::Transient { code: Some(code), message },
            _ => GatewayError::Rejected { code, message },
        }
    }

    /// HTTP-like status code of the error, if any
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        match self {
            GatewayError::NotFound(_) => Some(404),
            GatewayError::Conflict(_) => Some(409),
            GatewayError::Forbidden(_) => Some(403),
            GatewayError::Rejected { code, .. } => Some(*code),
            GatewayError::Transient { code, .. } => *code,
            GatewayError::Serialization(_) => None,
        }
    }

    /// Whether the call may succeed if retried unchanged
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Transient { .. })
    }

    /// Whether the object does not exist
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, GatewayError::NotFound(_))
    }

    /// Whether the call lost an optimistic-concurrency race
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, GatewayError::Conflict(_))
    }
}

impl From<kube::Error> for GatewayError {
    fn from(error: kube::Error) -> Self {
        match error {
            kube::Error::Api(status) => GatewayError::from_status(status.code, status.message.clone()),
            kube::Error::SerdeError(e) => GatewayError::Serialization(e),
            other => GatewayError::Transient {
                code: None,
                message: other.to_string(),
            },
        }
    }
}
