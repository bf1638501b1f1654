//! Error types for the REST API.
//!
//! Failures inside the middleware pipeline are [`StorageError`]s and are turned
//! into error responses by the error middleware. [`RestError`] covers what
//! escapes the pipeline plus transport-level failures such as unmatched routes.
//!
//! Every error reaches the client as the same body:
//!
//! ```json
//! {"code": 403, "message": "An unexpected error occurred. Please try again.", "developerMessage": "'created' not in chats allowed order bys"}
//! ```
//!
//! | Error | HTTP Status |
//! |-------|-------------|
//! | Validation / InvalidQuery | 400 |
//! | Unauthenticated | 401 |
//! | Unauthorized | 403 |
//! | NotFound / RouteNotFound | 404 |
//! | MethodNotAllowed | 405 |
//! | anything else | 500 |

use std::fmt;

use apisvc_persistence::StorageError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::error;

/// User message used when an error carries none of its own.
pub const DEFAULT_USER_MESSAGE: &str = "An unexpected error occurred. Please try again.";

/// Developer message of errors outside the taxonomy.
pub const INTERNAL_ERROR_MESSAGE: &str = "internal error";

/// The wire error body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// HTTP status code.
    pub code: u16,
    /// Message safe to show to end users.
    pub message: String,
    /// Machine message for API developers.
    #[serde(rename = "developerMessage")]
    pub developer_message: String,
}

impl ErrorBody {
    /// Creates a body with the default user message.
    pub fn new(code: u16, developer_message: impl Into<String>) -> Self {
        Self {
            code,
            message: DEFAULT_USER_MESSAGE.to_string(),
            developer_message: developer_message.into(),
        }
    }

    /// The body for a storage error. Errors outside the request taxonomy are
    /// logged and reduced to a generic 500 without internal detail.
    pub fn from_storage(err: &StorageError) -> Self {
        if err.is_client_error() {
            Self {
                code: err.status_code(),
                message: err
                    .user_message()
                    .unwrap_or(DEFAULT_USER_MESSAGE)
                    .to_string(),
                developer_message: err.to_string(),
            }
        } else {
            error!(code = err.code(), error = %err, "Unhandled error");
            Self::new(500, INTERNAL_ERROR_MESSAGE)
        }
    }
}

/// The primary error type for REST API operations.
#[derive(Debug)]
pub enum RestError {
    /// No resource route matches the path (HTTP 404).
    RouteNotFound {
        /// The request path.
        path: String,
    },

    /// HTTP method outside GET/POST/PUT/DELETE (HTTP 405).
    MethodNotAllowed {
        /// The method that was attempted.
        method: String,
    },

    /// A failure surviving the middleware pipeline.
    Storage(StorageError),

    /// Internal server error (HTTP 500).
    Internal {
        /// Error message, logged but never sent.
        message: String,
    },
}

impl fmt::Display for RestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestError::RouteNotFound { path } => write!(f, "no route for '{}'", path),
            RestError::MethodNotAllowed { method } => {
                write!(f, "method '{}' not allowed", method)
            }
            RestError::Storage(err) => write!(f, "{}", err),
            RestError::Internal { message } => write!(f, "internal error: {}", message),
        }
    }
}

impl std::error::Error for RestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RestError::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StorageError> for RestError {
    fn from(err: StorageError) -> Self {
        RestError::Storage(err)
    }
}

impl RestError {
    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            RestError::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            RestError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            RestError::Storage(err) => StatusCode::from_u16(err.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            RestError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The wire body for this error.
    pub fn body(&self) -> ErrorBody {
        match self {
            RestError::RouteNotFound { .. } | RestError::MethodNotAllowed { .. } => {
                ErrorBody::new(self.status_code().as_u16(), self.to_string())
            }
            RestError::Storage(err) => ErrorBody::from_storage(err),
            RestError::Internal { message } => {
                error!(message = %message, "Internal error");
                ErrorBody::new(500, INTERNAL_ERROR_MESSAGE)
            }
        }
    }
}

impl IntoResponse for RestError {
    fn into_response(self) -> Response {
        let body = self.body();
        let status =
            StatusCode::from_u16(body.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(body)).into_response()
    }
}

/// Result type for REST operations.
pub type RestResult<T> = Result<T, RestError>;

#[cfg(test)]
mod tests {
    use super::*;
    use apisvc_persistence::error::{BackendError, TransactionError};

    #[test]
    fn test_storage_error_body() {
        let err = StorageError::unauthorized("'created' not in chats allowed order bys");
        let body = ErrorBody::from_storage(&err);
        assert_eq!(body.code, 403);
        assert_eq!(body.message, DEFAULT_USER_MESSAGE);
        assert_eq!(
            body.developer_message,
            "'created' not in chats allowed order bys"
        );
    }

    #[test]
    fn test_internal_errors_hide_detail() {
        let err: StorageError = BackendError::QueryFailed {
            message: "no such column: secret".to_string(),
        }
        .into();
        let body = ErrorBody::from_storage(&err);
        assert_eq!(body.code, 500);
        assert_eq!(body.developer_message, INTERNAL_ERROR_MESSAGE);

        let body = RestError::from(StorageError::from(TransactionError::NotActive)).body();
        assert_eq!(body.code, 500);
    }

    #[test]
    fn test_body_wire_names() {
        let json = serde_json::to_value(ErrorBody::new(404, "no route for '/x'")).unwrap();
        assert_eq!(json["developerMessage"], "no route for '/x'");
        assert_eq!(json["code"], 404);
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            RestError::RouteNotFound {
                path: "/nope".to_string()
            }
            .status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            RestError::MethodNotAllowed {
                method: "PATCH".to_string()
            }
            .status_code(),
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert_eq!(
            RestError::from(StorageError::unauthenticated("invalid session")).status_code(),
            StatusCode::UNAUTHORIZED
        );
    }
}
