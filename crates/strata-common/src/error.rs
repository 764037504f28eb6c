//! Error types for strata

use thiserror::Error;

/// Result type alias for strata operations
pub type Result<T> = std::result::Result<T, StrataError>;

/// Unified error type for all strata operations
#[derive(Error, Debug, Clone)]
pub enum StrataError {
    #[error("MongoDB error: {0}")]
    MongoDB(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// The caller broke a structural rule of the API, e.g. filtering a
    /// sliced queryset. Not recoverable by retrying.
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// A lookup names a field the model does not declare and that cannot be
    /// resolved as a nested document path.
    #[error("Cannot resolve keyword '{field}' into a field of model {model}")]
    UnknownField { model: String, field: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl StrataError {
    /// Returns true if this error signals a programmer error
    pub fn is_precondition(&self) -> bool {
        matches!(self, StrataError::Precondition(_))
    }

    /// Returns true if this error was raised by the driver or the server
    pub fn is_driver_error(&self) -> bool {
        matches!(
            self,
            StrataError::MongoDB(_) | StrataError::Database(_) | StrataError::Connection(_)
        )
    }
}

impl From<serde_json::Error> for StrataError {
    fn from(err: serde_json::Error) -> Self {
        StrataError::Serialization(err.to_string())
    }
}

// MongoDB-specific error conversions (when mongodb-errors feature is enabled)
#[cfg(feature = "mongodb-errors")]
impl From<mongodb::error::Error> for StrataError {
    fn from(err: mongodb::error::Error) -> Self {
        StrataError::MongoDB(err.to_string())
    }
}

#[cfg(feature = "mongodb-errors")]
impl From<bson::ser::Error> for StrataError {
    fn from(err: bson::ser::Error) -> Self {
        StrataError::Serialization(format!("BSON serialization error: {}", err))
    }
}

#[cfg(feature = "mongodb-errors")]
impl From<bson::de::Error> for StrataError {
    fn from(err: bson::de::Error) -> Self {
        StrataError::Deserialization(format!("BSON deserialization error: {}", err))
    }
}

#[cfg(feature = "mongodb-errors")]
impl From<bson::document::ValueAccessError> for StrataError {
    fn from(err: bson::document::ValueAccessError) -> Self {
        StrataError::Deserialization(format!("Unexpected server response: {}", err))
    }
}
