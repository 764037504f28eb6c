//! Lazily evaluated, copy-on-write querysets
//!
//! Every refinement (`filter`, `exclude`, `order_by`, `slice`) returns a new
//! queryset and leaves the original untouched. Nothing reaches the database
//! until an executing method (`fetch`, `count`, `distinct`, `map_reduce`, ...)
//! is awaited, and each of those performs a single driver round trip.

use std::marker::PhantomData;
use std::sync::Arc;

use bson::{Bson, Document as BsonDocument};
use strata_common::{Result, StrataError};
use tracing::{debug, instrument};

use crate::compiler::{and_filters, BuiltQuery, QueryCompiler};
use crate::driver::DatabaseDriver;
use crate::lookup::Lookup;
use crate::map_reduce::{MapReduceCursor, MapReduceJob, MapReduceResult};
use crate::model::{Model, ModelMeta};
use crate::predicate::Q;
use crate::rewrite::FieldPathRewriter;

pub struct QuerySet<M: Model> {
    pub(crate) meta: Arc<ModelMeta>,
    pub(crate) db: Arc<dyn DatabaseDriver>,
    /// Driver-native filter used verbatim, for raw querysets
    pub(crate) raw_query: Option<BsonDocument>,
    /// Accumulated ORM predicate, keys already rewritten
    pub(crate) predicate: Q,
    sort: Option<BsonDocument>,
    skip: Option<u64>,
    limit: Option<i64>,
    pub(crate) for_write: bool,
    _model: PhantomData<fn() -> M>,
}

impl<M: Model> Clone for QuerySet<M> {
    fn clone(&self) -> Self {
        Self {
            meta: Arc::clone(&self.meta),
            db: Arc::clone(&self.db),
            raw_query: self.raw_query.clone(),
            predicate: self.predicate.clone(),
            sort: self.sort.clone(),
            skip: self.skip,
            limit: self.limit,
            for_write: self.for_write,
            _model: PhantomData,
        }
    }
}

impl<M: Model> std::fmt::Debug for QuerySet<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuerySet")
            .field("model", &self.meta.name())
            .field("raw_query", &self.raw_query)
            .field("predicate", &self.predicate)
            .field("sort", &self.sort)
            .field("skip", &self.skip)
            .field("limit", &self.limit)
            .finish()
    }
}

impl<M: Model> QuerySet<M> {
    /// Queryset over every document of `M`'s collection
    pub fn new(db: Arc<dyn DatabaseDriver>) -> Result<Self> {
        let meta = M::meta();
        meta.validate()?;
        Ok(Self::from_parts(Arc::new(meta), db))
    }

    pub(crate) fn from_parts(meta: Arc<ModelMeta>, db: Arc<dyn DatabaseDriver>) -> Self {
        Self {
            meta,
            db,
            raw_query: None,
            predicate: Q::all(),
            sort: None,
            skip: None,
            limit: None,
            for_write: false,
            _model: PhantomData,
        }
    }

    pub fn meta(&self) -> &ModelMeta {
        &self.meta
    }

    /// False once a slice has been taken
    pub fn can_filter(&self) -> bool {
        self.skip.is_none() && self.limit.is_none()
    }

    /// Whether the queryset has been marked as the target of a write.
    ///
    /// `raw_update` sets this on the queryset it sends to the driver. Layers
    /// that route writes differently from reads (primaries, sessions) read
    /// it here.
    pub fn is_for_write(&self) -> bool {
        self.for_write
    }

    /// Keep documents matching `q`
    pub fn filter(&self, q: Q) -> Result<Self> {
        self.filter_or_exclude(false, q)
    }

    /// Keep documents not matching `q`
    pub fn exclude(&self, q: Q) -> Result<Self> {
        self.filter_or_exclude(true, q)
    }

    /// Shorthand for `filter(Q::new(key, value))`
    pub fn filter_by(&self, key: &str, value: impl Into<Bson>) -> Result<Self> {
        self.filter(Q::new(key, value))
    }

    fn filter_or_exclude(&self, negate: bool, q: Q) -> Result<Self> {
        if q.is_empty() {
            return Ok(self.clone());
        }
        if !self.can_filter() {
            return Err(StrataError::Precondition(
                "Cannot filter a query once a slice has been taken.".to_string(),
            ));
        }

        let q = FieldPathRewriter::new(&self.meta).rewrite(q);
        let q = if negate { !q } else { q };

        let mut clone = self.clone();
        clone.predicate = clone.predicate & q;
        Ok(clone)
    }

    /// Sort by the given fields; a leading `-` sorts descending
    pub fn order_by(&self, fields: &[&str]) -> Result<Self> {
        if !self.can_filter() {
            return Err(StrataError::Precondition(
                "Cannot reorder a query once a slice has been taken.".to_string(),
            ));
        }

        let mut sort = BsonDocument::new();
        for field in fields {
            let (name, direction) = match field.strip_prefix('-') {
                Some(name) => (name, -1),
                None => (*field, 1),
            };
            sort.insert(self.resolve_path(name)?, direction);
        }

        let mut clone = self.clone();
        clone.sort = if sort.is_empty() { None } else { Some(sort) };
        Ok(clone)
    }

    /// Restrict to results `start..end` of the current ordering.
    ///
    /// Slicing a sliced queryset narrows the existing window. `slice(0, None)`
    /// limits nothing and leaves the queryset filterable.
    pub fn slice(&self, start: u64, end: Option<u64>) -> Self {
        let skip = self.skip.unwrap_or(0).saturating_add(start);
        let mut window = end.map(|end| end.saturating_sub(start));
        if let Some(existing) = self.limit {
            let remaining = u64::try_from(existing)
                .unwrap_or(0)
                .saturating_sub(start);
            window = Some(window.map_or(remaining, |w| w.min(remaining)));
        }

        let mut clone = self.clone();
        clone.skip = if skip == 0 { None } else { Some(skip) };
        clone.limit = window.map(|w| i64::try_from(w).unwrap_or(i64::MAX));
        clone
    }

    /// Shorthand for `slice(0, Some(n))`
    pub fn limit(&self, n: u64) -> Self {
        self.slice(0, Some(n))
    }

    /// Document path of a plain field reference (no operator suffix)
    fn resolve_path(&self, field: &str) -> Result<String> {
        let rewriter = FieldPathRewriter::new(&self.meta);
        let resolved = rewriter.resolve(&rewriter.rewrite_key(field))?;
        if resolved.lookup != Lookup::Exact || field.ends_with("__exact") {
            return Err(StrataError::Query(format!(
                "'{}' is a lookup, not a field reference",
                field
            )));
        }
        Ok(resolved.path)
    }

    /// Compile the queryset into the filter and collection the driver needs
    pub fn build_query(&self) -> Result<BuiltQuery> {
        let compiled = QueryCompiler::new(&self.meta).compile(&self.predicate)?;
        let mongo_query = match &self.raw_query {
            Some(raw) => and_filters(raw.clone(), compiled),
            None => compiled,
        };

        Ok(BuiltQuery {
            mongo_query,
            collection: self.db.collection(self.meta.collection()),
            sort: self.sort.clone(),
            skip: self.skip,
            limit: self.limit,
        })
    }

    /// Fetch the matching documents as stored
    #[instrument(skip_all, fields(model = self.meta.name()))]
    pub async fn fetch(&self) -> Result<Vec<BsonDocument>> {
        let query = self.build_query()?;
        let docs = query.fetch_all().await?;
        debug!(count = docs.len(), "Fetched documents");
        Ok(docs)
    }

    /// Fetch the matching documents decoded as `M`
    pub async fn to_list(&self) -> Result<Vec<M>> {
        self.fetch().await?.into_iter().map(M::from_bson).collect()
    }

    /// Number of matching documents, honouring any slice
    #[instrument(skip_all, fields(model = self.meta.name()))]
    pub async fn count(&self) -> Result<u64> {
        let query = self.build_query()?;
        if query.is_empty_window() {
            return Ok(0);
        }
        let total = query.collection.count(query.mongo_query).await?;
        let after_skip = total.saturating_sub(self.skip.unwrap_or(0));
        Ok(match self.limit {
            Some(limit) if limit >= 0 => after_skip.min(limit as u64),
            _ => after_skip,
        })
    }

    /// Distinct values of `field` among the matching documents.
    ///
    /// `field` may address nested data (`items__sku` or `items.sku`).
    #[instrument(skip_all, fields(model = self.meta.name(), field = field))]
    pub async fn distinct(&self, field: &str) -> Result<Vec<Bson>> {
        let path = self.resolve_path(field)?;
        let query = self.build_query()?;
        query.collection.distinct(&path, query.mongo_query).await
    }

    /// Run a map/reduce job over the matching documents.
    ///
    /// The job's `query` defaults to this queryset's filter. Results are read
    /// lazily from the output collection; with `drop_collection` the
    /// collection is dropped once the returned cursor is exhausted, closed or
    /// collected.
    #[instrument(skip_all, fields(model = self.meta.name(), drop_collection = drop_collection))]
    pub async fn map_reduce(
        &self,
        job: MapReduceJob,
        drop_collection: bool,
    ) -> Result<MapReduceCursor> {
        let query = self.build_query()?;
        let job = job.with_default_query(&query.mongo_query);
        let result_collection = query.collection.map_reduce(&job).await?;
        debug!(
            result_collection = result_collection.name(),
            "Map/reduce job finished"
        );
        Ok(MapReduceCursor::new(
            self.meta.name(),
            result_collection,
            drop_collection,
        ))
    }

    /// Run a map/reduce job in memory and return every result, in the order
    /// the server reported them
    #[instrument(skip_all, fields(model = self.meta.name()))]
    pub async fn inline_map_reduce(&self, job: MapReduceJob) -> Result<Vec<MapReduceResult>> {
        let query = self.build_query()?;
        let job = job.with_default_query(&query.mongo_query);
        query
            .collection
            .inline_map_reduce(&job)
            .await?
            .into_iter()
            .map(|entity| MapReduceResult::from_entity(self.meta.name(), entity))
            .collect()
    }
}
