//! Error types for the persistence layer.
//!
//! Every failure raised while declaring schemas, parsing query paths, executing
//! backend queries or enforcing policy is a [`StorageError`]. The variants follow
//! one category per concern so callers can map them onto status codes:
//!
//! | Category | Status | Raised by |
//! |----------|--------|-----------|
//! | [`ValidationError`] | 400 | field coercion, operand validation |
//! | [`QueryError`] | 400 | path parser, slice limits, bulk cardinality checks, constraint violations |
//! | [`AccessError::Unauthenticated`] | 401 | authenticators |
//! | [`AccessError::Unauthorized`] | 403 | authorizers |
//! | [`ResourceError`] | 404 | `get`/`one` with zero rows |
//! | [`SchemaError`] | 500 | schema registration |
//! | [`TransactionError`] | 500 | transaction scopes |
//! | [`BackendError`] | 500 | connection pools, engines |

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use thiserror::Error;

/// The primary error type for all resource operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Field or operand validation errors
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Structurally illegal queries
    #[error(transparent)]
    Query(#[from] QueryError),

    /// Resource lookup errors
    #[error(transparent)]
    Resource(#[from] ResourceError),

    /// Authentication and authorization errors
    #[error(transparent)]
    Access(#[from] AccessError),

    /// Schema declaration errors
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Transaction errors
    #[error(transparent)]
    Transaction(#[from] TransactionError),

    /// Backend-specific errors
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl StorageError {
    /// Returns the HTTP-style status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            StorageError::Validation(_) | StorageError::Query(_) => 400,
            StorageError::Access(AccessError::Unauthenticated { .. }) => 401,
            StorageError::Access(AccessError::Unauthorized { .. }) => 403,
            StorageError::Resource(_) => 404,
            StorageError::Schema(_) | StorageError::Transaction(_) | StorageError::Backend(_) => {
                500
            }
        }
    }

    /// Returns a short machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            StorageError::Validation(_) => "validation_error",
            StorageError::Query(_) => "invalid_query",
            StorageError::Resource(_) => "not_found",
            StorageError::Access(AccessError::Unauthenticated { .. }) => "authentication_error",
            StorageError::Access(AccessError::Unauthorized { .. }) => "authorization_error",
            StorageError::Schema(_) => "schema_error",
            StorageError::Transaction(_) => "transaction_error",
            StorageError::Backend(_) => "backend_error",
        }
    }

    /// Returns the message meant for end users, if one was attached.
    pub fn user_message(&self) -> Option<&str> {
        match self {
            StorageError::Validation(e) => e.user_message.as_deref(),
            StorageError::Access(AccessError::Unauthorized { user_message, .. }) => {
                user_message.as_deref()
            }
            _ => None,
        }
    }

    /// Returns true when the error belongs to the request-level taxonomy
    /// (anything a caller can fix) rather than an internal failure.
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }

    /// Shorthand for an authorization failure.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        StorageError::Access(AccessError::Unauthorized {
            message: message.into(),
            user_message: None,
        })
    }

    /// Shorthand for an authentication failure.
    pub fn unauthenticated(message: impl Into<String>) -> Self {
        StorageError::Access(AccessError::Unauthenticated {
            message: message.into(),
        })
    }

    /// Shorthand for a generic invalid query.
    pub fn invalid_query(message: impl Into<String>) -> Self {
        StorageError::Query(QueryError::Invalid {
            message: message.into(),
        })
    }
}

/// A value failed coercion or a non-nullable field resolved to absence.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct ValidationError {
    /// The field that failed, when known.
    pub field: Option<String>,
    /// Machine message, e.g. `'title' not nullable`.
    pub message: String,
    /// Optional message safe to show to end users.
    pub user_message: Option<String>,
}

impl ValidationError {
    /// Creates a validation error without a field name.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            field: None,
            message: message.into(),
            user_message: None,
        }
    }

    /// Creates a validation error naming the failing field.
    pub fn for_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: Some(field.into()),
            message: message.into(),
            user_message: None,
        }
    }

    /// The `'<field>' not nullable` error.
    pub fn not_nullable(field: &str) -> Self {
        Self::for_field(field, format!("'{}' not nullable", field))
    }

    /// Attaches a user-facing message.
    pub fn with_user_message(mut self, message: impl Into<String>) -> Self {
        self.user_message = Some(message.into());
        self
    }
}

/// Structurally illegal filters, orderings, relations or data.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    #[error("invalid filter '{expression}'")]
    InvalidFilter { expression: String },

    #[error("invalid order by '{expression}'")]
    InvalidOrderBy { expression: String },

    #[error("invalid with relation '{expression}'")]
    InvalidWithRelation { expression: String },

    #[error("invalid option '{name}'")]
    InvalidOption { name: String },

    #[error("invalid slice '{value}'")]
    InvalidSlice { value: String },

    #[error("max limit exceeded")]
    MaxLimitExceeded { requested: usize, limit: usize },

    #[error("resources provided does not match filter results")]
    CardinalityMismatch { expected: usize, actual: usize },

    #[error("create query must be empty")]
    CreateQueryNotEmpty,

    #[error("invalid data")]
    InvalidData { message: String },

    #[error("'{operation}' not supported by {backend_name}")]
    Unsupported {
        backend_name: String,
        operation: String,
    },

    #[error("{message}")]
    Invalid { message: String },
}

/// Resource lookup errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResourceError {
    /// Zero rows where exactly one was required.
    #[error("{resource_name} resource not found")]
    NotFound { resource_name: String },
}

/// Authentication and authorization failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AccessError {
    /// Missing or invalid session.
    #[error("{message}")]
    Unauthenticated { message: String },

    /// Policy violation at any pipeline stage.
    #[error("{message}")]
    Unauthorized {
        message: String,
        user_message: Option<String>,
    },
}

/// Errors raised while registering resource schemas.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("resource '{name}' registered twice")]
    DuplicateResource { name: String },

    #[error("unknown resource '{name}'")]
    UnknownResource { name: String },

    #[error("resource '{resource}' has no primary key")]
    MissingPrimaryKey { resource: String },

    #[error("resource '{resource}' declares '{name}' twice")]
    DuplicateField { resource: String, name: String },

    #[error("resource '{resource}' has no relation '{name}'")]
    UnknownRelation { resource: String, name: String },

    #[error("invalid pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("invalid declaration on '{resource}': {message}")]
    InvalidDeclaration { resource: String, message: String },
}

/// Errors related to transaction scopes.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransactionError {
    /// A scope was closed without a matching begin.
    #[error("no active transaction")]
    NotActive,

    /// The outermost scope rolled back because a nested scope failed.
    #[error("transaction rolled back: {reason}")]
    RolledBack { reason: String },

    /// The backend refused to begin, commit or roll back.
    #[error("transaction failed in {backend_name}: {message}")]
    Failed {
        backend_name: String,
        message: String,
    },
}

/// Errors originating from a storage or search engine.
#[derive(Error, Debug)]
pub enum BackendError {
    /// Connection to the backend failed.
    #[error("connection failed to {backend_name}: {message}")]
    ConnectionFailed {
        backend_name: String,
        message: String,
    },

    /// Internal backend error.
    #[error("internal error in {backend_name}: {message}")]
    Internal {
        backend_name: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Query execution error.
    #[error("query execution failed: {message}")]
    QueryFailed { message: String },

    /// Serialization/deserialization error.
    #[error("serialization error: {message}")]
    SerializationError { message: String },
}

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(failure, message) = &err
            && failure.code == rusqlite::ErrorCode::ConstraintViolation
        {
            return StorageError::Query(QueryError::InvalidData {
                message: message.clone().unwrap_or_else(|| failure.to_string()),
            });
        }
        StorageError::Backend(BackendError::Internal {
            backend_name: "sqlite".to_string(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        })
    }
}

#[cfg(feature = "sqlite")]
impl From<r2d2::Error> for StorageError {
    fn from(err: r2d2::Error) -> Self {
        StorageError::Backend(BackendError::ConnectionFailed {
            backend_name: "sqlite".to_string(),
            message: err.to_string(),
        })
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Backend(BackendError::SerializationError {
            message: err.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            StorageError::from(ValidationError::new("bad")).status_code(),
            400
        );
        assert_eq!(
            StorageError::from(QueryError::CreateQueryNotEmpty).status_code(),
            400
        );
        assert_eq!(StorageError::unauthenticated("invalid session").status_code(), 401);
        assert_eq!(StorageError::unauthorized("nope").status_code(), 403);
        assert_eq!(
            StorageError::from(ResourceError::NotFound {
                resource_name: "chats".to_string()
            })
            .status_code(),
            404
        );
        assert_eq!(
            StorageError::from(TransactionError::NotActive).status_code(),
            500
        );
    }

    #[test]
    fn test_not_nullable_message() {
        let err = ValidationError::not_nullable("title");
        assert_eq!(err.to_string(), "'title' not nullable");
        assert_eq!(err.field.as_deref(), Some("title"));
    }

    #[test]
    fn test_user_message() {
        let err: StorageError = ValidationError::new("invalid integer 'x'")
            .with_user_message("Please enter a number.")
            .into();
        assert_eq!(err.user_message(), Some("Please enter a number."));
        assert!(err.is_client_error());

        let err = StorageError::invalid_query("nope");
        assert_eq!(err.user_message(), None);
        assert_eq!(err.code(), "invalid_query");
    }

    #[test]
    fn test_query_error_messages() {
        assert_eq!(
            QueryError::InvalidFilter {
                expression: "foo__bar".to_string()
            }
            .to_string(),
            "invalid filter 'foo__bar'"
        );
        assert_eq!(
            QueryError::CardinalityMismatch {
                expected: 2,
                actual: 1
            }
            .to_string(),
            "resources provided does not match filter results"
        );
    }
}
