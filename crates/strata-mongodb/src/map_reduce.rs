//! Map/Reduce jobs and their results
//!
//! [`MapReduceJob`] describes a server-side job. Persisted jobs are read back
//! through a [`MapReduceCursor`], which can drop the result collection once
//! the caller is done with it. Cleanup happens at well-defined points: when
//! the cursor runs out, when it fails, on [`MapReduceCursor::close`] and at
//! the end of [`MapReduceCursor::collect`]. Dropping a cursor that still owes
//! a cleanup only schedules a best-effort drop.

use std::fmt;
use std::sync::Arc;

use bson::{doc, Bson, Document as BsonDocument};
use futures::StreamExt;
use strata_common::{Result, StrataError};
use tracing::{debug, warn};

use crate::driver::{CollectionDriver, DocumentStream, FindSpec};
use crate::validation::ValidatedCollectionName;

/// What the server does with an existing output collection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutAction {
    Replace,
    Merge,
    Reduce,
}

impl OutAction {
    fn as_str(&self) -> &'static str {
        match self {
            OutAction::Replace => "replace",
            OutAction::Merge => "merge",
            OutAction::Reduce => "reduce",
        }
    }
}

/// Output collection of a persisted map/reduce job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapReduceOut {
    action: OutAction,
    collection: String,
    db: Option<String>,
}

impl MapReduceOut {
    pub fn replace(collection: impl Into<String>) -> Self {
        Self::new(OutAction::Replace, collection)
    }

    pub fn merge(collection: impl Into<String>) -> Self {
        Self::new(OutAction::Merge, collection)
    }

    pub fn reduce(collection: impl Into<String>) -> Self {
        Self::new(OutAction::Reduce, collection)
    }

    fn new(action: OutAction, collection: impl Into<String>) -> Self {
        Self {
            action,
            collection: collection.into(),
            db: None,
        }
    }

    /// Write the output to another database
    pub fn in_database(mut self, db: impl Into<String>) -> Self {
        self.db = Some(db.into());
        self
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn action(&self) -> OutAction {
        self.action
    }

    fn to_document(&self) -> BsonDocument {
        let mut out = BsonDocument::new();
        out.insert(self.action.as_str(), self.collection.clone());
        if let Some(db) = &self.db {
            out.insert("db", db.clone());
        }
        out
    }
}

/// A map/reduce job
///
/// `map`, `reduce` and `finalize` are JavaScript function sources.
#[derive(Debug, Clone, PartialEq)]
pub struct MapReduceJob {
    pub map: String,
    pub reduce: String,
    pub out: Option<MapReduceOut>,
    /// Filter applied before mapping; filled in from the queryset when unset
    pub query: Option<BsonDocument>,
    pub sort: Option<BsonDocument>,
    pub limit: Option<i64>,
    pub finalize: Option<String>,
    pub scope: Option<BsonDocument>,
    pub js_mode: Option<bool>,
    pub verbose: Option<bool>,
}

impl MapReduceJob {
    pub fn new(map: impl Into<String>, reduce: impl Into<String>) -> Self {
        Self {
            map: map.into(),
            reduce: reduce.into(),
            out: None,
            query: None,
            sort: None,
            limit: None,
            finalize: None,
            scope: None,
            js_mode: None,
            verbose: None,
        }
    }

    pub fn out(mut self, out: MapReduceOut) -> Self {
        self.out = Some(out);
        self
    }

    pub fn query(mut self, query: BsonDocument) -> Self {
        self.query = Some(query);
        self
    }

    pub fn sort(mut self, sort: BsonDocument) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn finalize(mut self, finalize: impl Into<String>) -> Self {
        self.finalize = Some(finalize.into());
        self
    }

    pub fn scope(mut self, scope: BsonDocument) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn js_mode(mut self, js_mode: bool) -> Self {
        self.js_mode = Some(js_mode);
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = Some(verbose);
        self
    }

    /// Use `query` unless the job already carries its own filter
    pub(crate) fn with_default_query(mut self, query: &BsonDocument) -> Self {
        if self.query.is_none() {
            self.query = Some(query.clone());
        }
        self
    }

    /// The `mapReduce` command for a persisted job on `collection`
    pub fn to_command(&self, collection: &str) -> Result<BsonDocument> {
        let out = self.out.as_ref().ok_or_else(|| {
            StrataError::Query("map_reduce requires an output collection".to_string())
        })?;
        ValidatedCollectionName::new(out.collection())?;
        Ok(self.build_command(collection, Bson::Document(out.to_document())))
    }

    /// The `mapReduce` command for an in-memory job on `collection`
    pub fn to_inline_command(&self, collection: &str) -> BsonDocument {
        self.build_command(collection, Bson::Document(doc! { "inline": 1 }))
    }

    fn build_command(&self, collection: &str, out: Bson) -> BsonDocument {
        let mut command = doc! {
            "mapReduce": collection,
            "map": Bson::JavaScriptCode(self.map.clone()),
            "reduce": Bson::JavaScriptCode(self.reduce.clone()),
            "out": out,
        };

        if let Some(query) = &self.query {
            command.insert("query", query.clone());
        }
        if let Some(sort) = &self.sort {
            command.insert("sort", sort.clone());
        }
        if let Some(limit) = self.limit {
            command.insert("limit", limit);
        }
        if let Some(finalize) = &self.finalize {
            command.insert("finalize", Bson::JavaScriptCode(finalize.clone()));
        }
        if let Some(scope) = &self.scope {
            command.insert("scope", scope.clone());
        }
        if let Some(js_mode) = self.js_mode {
            command.insert("jsMode", js_mode);
        }
        if let Some(verbose) = self.verbose {
            command.insert("verbose", verbose);
        }

        command
    }
}

/// One entry of a map/reduce result
#[derive(Debug, Clone, PartialEq)]
pub struct MapReduceResult {
    /// Name of the model the job ran over
    pub model: &'static str,
    pub key: Bson,
    pub value: Bson,
}

impl MapReduceResult {
    pub fn new(model: &'static str, key: Bson, value: Bson) -> Self {
        Self { model, key, value }
    }

    /// Build a result from a `{_id: key, value: value}` output document
    pub fn from_entity(model: &'static str, mut entity: BsonDocument) -> Result<Self> {
        let key = entity.remove("_id").ok_or_else(|| {
            StrataError::Deserialization("map/reduce result has no '_id'".to_string())
        })?;
        let value = entity.remove("value").ok_or_else(|| {
            StrataError::Deserialization("map/reduce result has no 'value'".to_string())
        })?;
        Ok(Self::new(model, key, value))
    }
}

impl fmt::Display for MapReduceResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<MapReduceResult model={:?} key={} value={}>",
            self.model, self.key, self.value
        )
    }
}

/// Single-pass reader over a map/reduce result collection
///
/// The result collection is only queried on the first call to
/// [`next`](Self::next). Once the cursor is exhausted or has failed it yields
/// nothing more.
pub struct MapReduceCursor {
    model: &'static str,
    collection: Arc<dyn CollectionDriver>,
    stream: Option<DocumentStream>,
    drop_collection: bool,
    finished: bool,
    cleaned_up: bool,
}

impl MapReduceCursor {
    pub fn new(
        model: &'static str,
        collection: Arc<dyn CollectionDriver>,
        drop_collection: bool,
    ) -> Self {
        Self {
            model,
            collection,
            stream: None,
            drop_collection,
            finished: false,
            cleaned_up: !drop_collection,
        }
    }

    /// Name of the collection holding the results
    pub fn result_collection(&self) -> &str {
        self.collection.name()
    }

    pub fn is_exhausted(&self) -> bool {
        self.finished
    }

    /// Fetch the next result, or `None` once the results are used up
    pub async fn next(&mut self) -> Result<Option<MapReduceResult>> {
        if self.finished {
            return Ok(None);
        }

        if self.stream.is_none() {
            match self.collection.find(FindSpec::default()).await {
                Ok(stream) => self.stream = Some(stream),
                Err(e) => return self.fail(e).await,
            }
        }

        let item = match self.stream.as_mut() {
            Some(stream) => stream.next().await,
            None => None,
        };

        match item {
            Some(Ok(entity)) => match MapReduceResult::from_entity(self.model, entity) {
                Ok(result) => Ok(Some(result)),
                Err(e) => self.fail(e).await,
            },
            Some(Err(e)) => self.fail(e).await,
            None => {
                self.finish().await?;
                Ok(None)
            }
        }
    }

    /// Read every remaining result, then clean up
    pub async fn collect(mut self) -> Result<Vec<MapReduceResult>> {
        let mut results = Vec::new();
        while let Some(result) = self.next().await? {
            results.push(result);
        }
        Ok(results)
    }

    /// Stop reading and clean up immediately
    pub async fn close(mut self) -> Result<()> {
        self.finish().await
    }

    async fn fail(&mut self, err: StrataError) -> Result<Option<MapReduceResult>> {
        if let Err(cleanup_err) = self.finish().await {
            warn!(
                collection = self.collection.name(),
                error = %cleanup_err,
                "Failed to drop map/reduce result collection after error"
            );
        }
        Err(err)
    }

    async fn finish(&mut self) -> Result<()> {
        self.finished = true;
        self.stream = None;

        if !self.cleaned_up {
            self.cleaned_up = true;
            self.collection.drop_collection().await?;
            debug!(
                collection = self.collection.name(),
                "Dropped map/reduce result collection"
            );
        }
        Ok(())
    }
}

impl fmt::Debug for MapReduceCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapReduceCursor")
            .field("model", &self.model)
            .field("collection", &self.collection.name())
            .field("drop_collection", &self.drop_collection)
            .field("finished", &self.finished)
            .finish()
    }
}

impl Drop for MapReduceCursor {
    fn drop(&mut self) {
        if self.cleaned_up {
            return;
        }

        let name = self.collection.name().to_string();
        warn!(
            collection = %name,
            "MapReduceCursor dropped before its result collection was cleaned up; \
             call close() or collect() to drop it deterministically"
        );

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let collection = Arc::clone(&self.collection);
            handle.spawn(async move {
                if let Err(e) = collection.drop_collection().await {
                    warn!(collection = %name, error = %e, "Best-effort drop failed");
                }
            });
        }
    }
}
