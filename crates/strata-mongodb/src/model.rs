//! Model metadata and the `Model` trait
//!
//! A model declares its collection and its fields. Fields whose values are
//! nested structures (mappings, sequences, sets, embedded records) are
//! "document-like": lookups may address paths below them with dot notation.

use bson::Document as BsonDocument;
use serde::{de::DeserializeOwned, Serialize};
use strata_common::{Result, StrataError};

use crate::validation::{ValidatedCollectionName, ValidatedFieldName, ValidatedFieldPath};

/// Column the primary key is stored under
pub const PK_COLUMN: &str = "_id";

/// Storage kind of a model field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    ObjectId,
    String,
    Integer,
    Float,
    Boolean,
    DateTime,
    /// Mapping of string keys to values
    Dict,
    /// Ordered sequence
    List,
    /// Sequence without duplicates
    Set,
    /// A nested record of another model
    EmbeddedModel(&'static str),
}

impl FieldKind {
    /// Whether sub-paths of this field can be addressed with dot notation
    pub fn is_document_like(&self) -> bool {
        matches!(
            self,
            FieldKind::Dict | FieldKind::List | FieldKind::Set | FieldKind::EmbeddedModel(_)
        )
    }

    pub fn internal_type(&self) -> &'static str {
        match self {
            FieldKind::ObjectId => "ObjectIdField",
            FieldKind::String => "CharField",
            FieldKind::Integer => "IntegerField",
            FieldKind::Float => "FloatField",
            FieldKind::Boolean => "BooleanField",
            FieldKind::DateTime => "DateTimeField",
            FieldKind::Dict => "DictField",
            FieldKind::List => "ListField",
            FieldKind::Set => "SetField",
            FieldKind::EmbeddedModel(_) => "EmbeddedModelField",
        }
    }
}

/// A declared model field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    name: String,
    kind: FieldKind,
    column: String,
    primary_key: bool,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        let name = name.into();
        Self {
            column: name.clone(),
            name,
            kind,
            primary_key: false,
        }
    }

    /// Store the field under a different document key
    pub fn db_column(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }

    /// Mark the field as the model's primary key (stored as `_id`)
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.column = PK_COLUMN.to_string();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn is_primary_key(&self) -> bool {
        self.primary_key
    }

    pub fn is_document_like(&self) -> bool {
        self.kind.is_document_like()
    }
}

/// Outcome of resolving a lookup's field segment against a model
#[derive(Debug)]
pub enum FieldResolution<'a> {
    /// A field declared on the model (or `pk`)
    Declared(&'a FieldDescriptor),
    /// A dot-notation path into nested data that the model does not declare
    AdHocNested(ValidatedFieldPath),
    /// Neither declared nor a valid nested path
    Unknown(StrataError),
}

/// Static description of a model: its name, collection and fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelMeta {
    name: &'static str,
    collection: String,
    fields: Vec<FieldDescriptor>,
}

impl ModelMeta {
    /// Create metadata with an implicit `id` primary key stored as `_id`
    pub fn new(name: &'static str, collection: impl Into<String>) -> Self {
        Self {
            name,
            collection: collection.into(),
            fields: vec![FieldDescriptor::new("id", FieldKind::ObjectId).primary_key()],
        }
    }

    /// Declare a field. Declaring a primary key replaces the implicit `id`.
    pub fn field(mut self, field: FieldDescriptor) -> Self {
        if field.is_primary_key() {
            self.fields.retain(|f| !f.is_primary_key());
        }
        self.fields.retain(|f| f.name() != field.name());
        self.fields.push(field);
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn get_field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name() == name)
    }

    pub fn pk(&self) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.is_primary_key())
    }

    /// Names of top-level fields that hold nested structures
    pub fn document_like_fields(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(|f| f.is_document_like())
            .map(|f| f.name())
    }

    pub fn is_document_like(&self, name: &str) -> bool {
        self.get_field(name).is_some_and(|f| f.is_document_like())
    }

    /// Check the collection name and every declared field name
    pub fn validate(&self) -> Result<()> {
        ValidatedCollectionName::new(&self.collection)?;
        for field in &self.fields {
            ValidatedFieldName::new(field.name())?;
        }
        Ok(())
    }

    /// Resolve the field segment of a lookup key.
    ///
    /// Declared fields win; `pk` is an alias for the primary key; a dotted
    /// name that is not declared addresses nested data.
    pub fn resolve(&self, name: &str) -> FieldResolution<'_> {
        let declared = if name == "pk" {
            self.pk()
        } else {
            self.get_field(name)
        };

        if let Some(field) = declared {
            return FieldResolution::Declared(field);
        }

        if name.contains('.') {
            return match ValidatedFieldPath::new(name) {
                Ok(path) => FieldResolution::AdHocNested(path),
                Err(e) => FieldResolution::Unknown(e),
            };
        }

        FieldResolution::Unknown(StrataError::UnknownField {
            model: self.name.to_string(),
            field: name.to_string(),
        })
    }
}

/// Core trait for models stored in MongoDB
///
/// # Example
///
/// ```ignore
/// use serde::{Deserialize, Serialize};
/// use strata_mongodb::{FieldDescriptor, FieldKind, Model, ModelMeta};
///
/// #[derive(Debug, Serialize, Deserialize)]
/// struct Order {
///     status: String,
///     items: bson::Document,
/// }
///
/// impl Model for Order {
///     fn meta() -> ModelMeta {
///         ModelMeta::new("Order", "orders")
///             .field(FieldDescriptor::new("status", FieldKind::String))
///             .field(FieldDescriptor::new("items", FieldKind::Dict))
///     }
/// }
/// ```
pub trait Model: Serialize + DeserializeOwned + Send + Sync + Sized + 'static {
    /// Describe the model's collection and fields
    fn meta() -> ModelMeta;

    /// Convert the model to BSON
    fn to_bson(&self) -> Result<BsonDocument> {
        bson::to_document(self).map_err(|e| StrataError::Serialization(e.to_string()))
    }

    /// Create the model from a stored document
    fn from_bson(doc: BsonDocument) -> Result<Self> {
        bson::from_document(doc).map_err(|e| StrataError::Deserialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Order {
        status: String,
        total: i32,
    }

    impl Model for Order {
        fn meta() -> ModelMeta {
            ModelMeta::new("Order", "orders")
                .field(FieldDescriptor::new("status", FieldKind::String))
                .field(FieldDescriptor::new("total", FieldKind::Integer))
                .field(FieldDescriptor::new("items", FieldKind::Dict))
                .field(FieldDescriptor::new("tags", FieldKind::Set))
                .field(FieldDescriptor::new("customer", FieldKind::EmbeddedModel("Customer")))
        }
    }

    #[test]
    fn test_document_like_kinds() {
        assert!(FieldKind::Dict.is_document_like());
        assert!(FieldKind::List.is_document_like());
        assert!(FieldKind::Set.is_document_like());
        assert!(FieldKind::EmbeddedModel("Address").is_document_like());
        assert!(!FieldKind::String.is_document_like());
        assert!(!FieldKind::ObjectId.is_document_like());
    }

    #[test]
    fn test_document_like_fields() {
        let meta = Order::meta();
        let names: Vec<&str> = meta.document_like_fields().collect();
        assert_eq!(names, vec!["items", "tags", "customer"]);
    }

    #[test]
    fn test_implicit_primary_key() {
        let meta = Order::meta();
        let pk = meta.pk().unwrap();
        assert_eq!(pk.name(), "id");
        assert_eq!(pk.column(), "_id");
    }

    #[test]
    fn test_declared_primary_key_replaces_implicit() {
        let meta = ModelMeta::new("Sku", "skus")
            .field(FieldDescriptor::new("code", FieldKind::String).primary_key());
        assert!(meta.get_field("id").is_none());
        assert_eq!(meta.pk().unwrap().name(), "code");
        assert_eq!(meta.pk().unwrap().column(), "_id");
    }

    #[test]
    fn test_resolve_declared() {
        let meta = Order::meta();
        match meta.resolve("status") {
            FieldResolution::Declared(f) => assert_eq!(f.column(), "status"),
            other => panic!("unexpected resolution: {:?}", other),
        }
        match meta.resolve("pk") {
            FieldResolution::Declared(f) => assert!(f.is_primary_key()),
            other => panic!("unexpected resolution: {:?}", other),
        }
    }

    #[test]
    fn test_resolve_ad_hoc_nested() {
        let meta = Order::meta();
        match meta.resolve("items.sku") {
            FieldResolution::AdHocNested(path) => assert_eq!(path.to_string(), "items.sku"),
            other => panic!("unexpected resolution: {:?}", other),
        }
    }

    #[test]
    fn test_resolve_does_not_mutate_metadata() {
        let meta = Order::meta();
        let before = meta.clone();
        let _ = meta.resolve("extra.nested.key");
        assert_eq!(meta, before);
    }

    #[test]
    fn test_resolve_unknown() {
        let meta = Order::meta();
        match meta.resolve("colour") {
            FieldResolution::Unknown(StrataError::UnknownField { model, field }) => {
                assert_eq!(model, "Order");
                assert_eq!(field, "colour");
            }
            other => panic!("unexpected resolution: {:?}", other),
        }
        assert!(matches!(meta.resolve("items..sku"), FieldResolution::Unknown(_)));
    }

    #[test]
    fn test_validate() {
        assert!(Order::meta().validate().is_ok());
        assert!(ModelMeta::new("Bad", "system.bad").validate().is_err());
    }

    #[test]
    fn test_model_bson_conversion() {
        let order = Order {
            status: "pending".to_string(),
            total: 42,
        };
        let bson = order.to_bson().unwrap();
        assert_eq!(bson.get_str("status").unwrap(), "pending");

        let back = Order::from_bson(doc! { "status": "shipped", "total": 7 }).unwrap();
        assert_eq!(back.status, "shipped");
        assert_eq!(back.total, 7);
    }
}
