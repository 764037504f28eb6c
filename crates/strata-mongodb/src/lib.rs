//! MongoDB query extensions for strata models
//!
//! This crate layers MongoDB-specific querying on top of model metadata.
//!
//! # Features
//! - Dotted-path lookups into document-like fields (`items__sku__in`)
//! - Copy-on-write querysets with predicate (`Q`) composition
//! - Raw queries and updates that bypass predicate translation
//! - Map/Reduce with lazily read, optionally dropped result collections
//! - Distinct values over a filtered queryset

pub mod compiler;
pub mod connection;
pub mod driver;
pub mod lookup;
pub mod manager;
pub mod map_reduce;
pub mod memory;
pub mod model;
pub mod predicate;
pub mod queryset;
pub mod raw;
pub mod rewrite;
pub mod validation;

pub use compiler::{BuiltQuery, QueryCompiler};
pub use connection::{Connection, ConnectionConfig, PoolConfig};
pub use driver::{
    CollectionDriver, DatabaseDriver, DocumentStream, FindSpec, MongoCollection, UpdateAck,
    UpdateOptions,
};
pub use lookup::{Lookup, LOOKUP_SEP};
pub use manager::Manager;
pub use map_reduce::{MapReduceCursor, MapReduceJob, MapReduceOut, MapReduceResult, OutAction};
pub use memory::{MemoryDatabase, RecordedCall};
pub use model::{FieldDescriptor, FieldKind, FieldResolution, Model, ModelMeta};
pub use predicate::Q;
pub use queryset::QuerySet;
pub use raw::UpdateTarget;
pub use rewrite::{FieldPathRewriter, ResolvedLookup};
pub use strata_common::{Result, StrataError};
pub use validation::{ValidatedCollectionName, ValidatedFieldName, ValidatedFieldPath};
