//! Model managers
//!
//! A [`Manager`] is the entry point for querying one model: it hands out
//! querysets and forwards the MongoDB-specific operations to them.

use std::marker::PhantomData;
use std::sync::Arc;

use bson::{Bson, Document as BsonDocument};
use strata_common::Result;

use crate::driver::{DatabaseDriver, UpdateAck, UpdateOptions};
use crate::map_reduce::{MapReduceCursor, MapReduceJob, MapReduceResult};
use crate::model::{Model, ModelMeta};
use crate::predicate::Q;
use crate::queryset::QuerySet;
use crate::raw::UpdateTarget;

/// Query entry point for model `M`
///
/// # Example
///
/// ```ignore
/// let conn = Arc::new(Connection::from_config(ConnectionConfig::from_env()?).await?);
/// let orders = Manager::<Order>::new(conn)?;
///
/// let big = orders.filter(Q::new("items__sku__in", bson!(["A", "B"])))?;
/// orders
///     .raw_update(doc! { "status": "pending" }, doc! { "$set": { "status": "shipped" } }, Default::default())
///     .await?;
/// ```
pub struct Manager<M: Model> {
    meta: Arc<ModelMeta>,
    db: Arc<dyn DatabaseDriver>,
    _model: PhantomData<fn() -> M>,
}

impl<M: Model> Clone for Manager<M> {
    fn clone(&self) -> Self {
        Self {
            meta: Arc::clone(&self.meta),
            db: Arc::clone(&self.db),
            _model: PhantomData,
        }
    }
}

impl<M: Model> Manager<M> {
    /// Bind `M` to a database. Fails if the model metadata is invalid.
    pub fn new(db: Arc<dyn DatabaseDriver>) -> Result<Self> {
        let meta = M::meta();
        meta.validate()?;
        Ok(Self {
            meta: Arc::new(meta),
            db,
            _model: PhantomData,
        })
    }

    pub fn meta(&self) -> &ModelMeta {
        &self.meta
    }

    /// Queryset over every document of the model
    pub fn get_queryset(&self) -> QuerySet<M> {
        QuerySet::from_parts(Arc::clone(&self.meta), Arc::clone(&self.db))
    }

    pub fn all(&self) -> QuerySet<M> {
        self.get_queryset()
    }

    pub fn filter(&self, q: Q) -> Result<QuerySet<M>> {
        self.get_queryset().filter(q)
    }

    pub fn exclude(&self, q: Q) -> Result<QuerySet<M>> {
        self.get_queryset().exclude(q)
    }

    /// Queryset using `query` verbatim as its filter (`None` matches all)
    pub fn raw_query(&self, query: Option<BsonDocument>) -> QuerySet<M> {
        self.get_queryset().raw_query(query)
    }

    /// See [`QuerySet::raw_update`]. Writes to the database.
    pub async fn raw_update(
        &self,
        target: impl Into<UpdateTarget>,
        update: BsonDocument,
        options: UpdateOptions,
    ) -> Result<UpdateAck> {
        self.get_queryset().raw_update(target, update, options).await
    }

    pub async fn map_reduce(
        &self,
        job: MapReduceJob,
        drop_collection: bool,
    ) -> Result<MapReduceCursor> {
        self.get_queryset().map_reduce(job, drop_collection).await
    }

    pub async fn inline_map_reduce(&self, job: MapReduceJob) -> Result<Vec<MapReduceResult>> {
        self.get_queryset().inline_map_reduce(job).await
    }

    pub async fn distinct(&self, field: &str) -> Result<Vec<Bson>> {
        self.get_queryset().distinct(field).await
    }
}
