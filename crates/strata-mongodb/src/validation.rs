//! Input validation for names that end up inside MongoDB commands
//!
//! Collection names and field paths reach the server verbatim, so they are
//! checked here before a query document is built.

use crate::Result;
use strata_common::StrataError;
use tracing::warn;

/// Maximum allowed length for collection names (MongoDB limit is 255, we're more conservative)
const MAX_COLLECTION_NAME_LENGTH: usize = 120;

/// Maximum allowed length for field names
const MAX_FIELD_NAME_LENGTH: usize = 1024;

/// Validated collection name
///
/// # Guarantees
/// - Not empty
/// - Maximum 120 characters
/// - No null bytes
/// - No "system." prefix (system collections)
/// - No $ characters (special operators)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ValidatedCollectionName {
    name: String,
}

impl ValidatedCollectionName {
    /// Creates a new validated collection name
    ///
    /// # Errors
    /// Returns `StrataError::Validation` if the name is empty, too long,
    /// contains null bytes or `$`, or targets a system collection.
    pub fn new(name: &str) -> Result<Self> {
        if name.is_empty() {
            return Err(StrataError::Validation(
                "Collection name cannot be empty".to_string(),
            ));
        }

        if name.len() > MAX_COLLECTION_NAME_LENGTH {
            return Err(StrataError::Validation(format!(
                "Collection name exceeds maximum length of {} characters: '{}'",
                MAX_COLLECTION_NAME_LENGTH, name
            )));
        }

        if name.contains('\0') {
            return Err(StrataError::Validation(
                "Collection name cannot contain null bytes".to_string(),
            ));
        }

        if name.starts_with("system.") {
            return Err(StrataError::Validation(format!(
                "Collection name cannot start with 'system.' (reserved): '{}'",
                name
            )));
        }

        if name.contains('$') {
            return Err(StrataError::Validation(format!(
                "Collection name cannot contain '$' character: '{}'",
                name
            )));
        }

        if name.contains("..") || name.contains("//") {
            warn!(collection = name, "Collection name contains suspicious pattern");
        }

        Ok(ValidatedCollectionName {
            name: name.to_string(),
        })
    }

    /// Returns the validated collection name as a string slice
    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// Consumes the ValidatedCollectionName and returns the inner String
    pub fn into_string(self) -> String {
        self.name
    }
}

impl AsRef<str> for ValidatedCollectionName {
    fn as_ref(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Display for ValidatedCollectionName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Validated field name (a single path segment)
///
/// # Guarantees
/// - Not empty
/// - Maximum 1024 characters
/// - No null bytes
/// - No `$` prefix
/// - No `.` (segments are joined into paths by [`ValidatedFieldPath`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ValidatedFieldName {
    name: String,
}

impl ValidatedFieldName {
    /// Creates a new validated field name
    pub fn new(name: &str) -> Result<Self> {
        if name.is_empty() {
            return Err(StrataError::Validation(
                "Field name cannot be empty".to_string(),
            ));
        }

        if name.len() > MAX_FIELD_NAME_LENGTH {
            return Err(StrataError::Validation(format!(
                "Field name exceeds maximum length of {} characters",
                MAX_FIELD_NAME_LENGTH
            )));
        }

        if name.contains('\0') {
            return Err(StrataError::Validation(
                "Field name cannot contain null bytes".to_string(),
            ));
        }

        if name.starts_with('$') {
            return Err(StrataError::Validation(format!(
                "Field name cannot start with '$' (reserved for operators): '{}'",
                name
            )));
        }

        if name.contains('.') {
            return Err(StrataError::Validation(format!(
                "Field name cannot contain '.': '{}'",
                name
            )));
        }

        Ok(ValidatedFieldName {
            name: name.to_string(),
        })
    }

    /// Returns the validated field name as a string slice
    pub fn as_str(&self) -> &str {
        &self.name
    }
}

impl AsRef<str> for ValidatedFieldName {
    fn as_ref(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Display for ValidatedFieldName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Validated dot-notation path into a nested document, e.g. `items.sku`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ValidatedFieldPath {
    segments: Vec<ValidatedFieldName>,
}

impl ValidatedFieldPath {
    /// Validates every `.`-separated segment of `path`
    pub fn new(path: &str) -> Result<Self> {
        let segments = path
            .split('.')
            .map(ValidatedFieldName::new)
            .collect::<Result<Vec<_>>>()
            .map_err(|e| match e {
                StrataError::Validation(msg) => {
                    StrataError::Validation(format!("Invalid field path '{}': {}", path, msg))
                }
                other => other,
            })?;

        Ok(ValidatedFieldPath { segments })
    }

    /// The first segment, i.e. the top-level field the path starts from
    pub fn root(&self) -> &str {
        self.segments[0].as_str()
    }

    /// Number of segments in the path
    pub fn depth(&self) -> usize {
        self.segments.len()
    }
}

impl std::fmt::Display for ValidatedFieldPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let joined: Vec<&str> = self.segments.iter().map(|s| s.as_str()).collect();
        write!(f, "{}", joined.join("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_name_valid() {
        let name = ValidatedCollectionName::new("orders").unwrap();
        assert_eq!(name.as_str(), "orders");
        assert_eq!(name.to_string(), "orders");
    }

    #[test]
    fn test_collection_name_rejects_empty() {
        assert!(ValidatedCollectionName::new("").is_err());
    }

    #[test]
    fn test_collection_name_rejects_system_prefix() {
        let err = ValidatedCollectionName::new("system.users").unwrap_err();
        assert!(matches!(err, StrataError::Validation(_)));
    }

    #[test]
    fn test_collection_name_rejects_dollar() {
        assert!(ValidatedCollectionName::new("orders$tmp").is_err());
    }

    #[test]
    fn test_collection_name_rejects_too_long() {
        let long = "a".repeat(MAX_COLLECTION_NAME_LENGTH + 1);
        assert!(ValidatedCollectionName::new(&long).is_err());
    }

    #[test]
    fn test_field_name_rejects_operator_prefix() {
        assert!(ValidatedFieldName::new("$where").is_err());
        assert!(ValidatedFieldName::new("status").is_ok());
    }

    #[test]
    fn test_field_name_rejects_null_byte() {
        assert!(ValidatedFieldName::new("na\0me").is_err());
    }

    #[test]
    fn test_field_path_segments() {
        let path = ValidatedFieldPath::new("items.sku").unwrap();
        assert_eq!(path.root(), "items");
        assert_eq!(path.depth(), 2);
        assert_eq!(path.to_string(), "items.sku");
    }

    #[test]
    fn test_field_path_rejects_empty_segment() {
        let err = ValidatedFieldPath::new("items..sku").unwrap_err();
        assert!(err.to_string().contains("items..sku"));
    }

    #[test]
    fn test_field_path_rejects_operator_segment() {
        assert!(ValidatedFieldPath::new("items.$gt").is_err());
    }
}
