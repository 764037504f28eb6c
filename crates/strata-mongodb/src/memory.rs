//! In-memory driver
//!
//! Keeps named collections in process and records every driver call, so
//! queryset behaviour can be checked without a server. Filters are recorded
//! but not evaluated: `find` returns the whole collection (after skip and
//! limit), `update` reports every stored document as matched.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use bson::{Bson, Document as BsonDocument};
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use strata_common::{Result, StrataError};

use crate::driver::{
    CollectionDriver, DatabaseDriver, DocumentStream, FindSpec, UpdateAck, UpdateOptions,
};
use crate::map_reduce::MapReduceJob;

/// A driver call observed by [`MemoryDatabase`]
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCall {
    Find {
        collection: String,
        spec: FindSpec,
    },
    Count {
        collection: String,
        filter: BsonDocument,
    },
    Update {
        collection: String,
        filter: BsonDocument,
        update: BsonDocument,
        options: UpdateOptions,
    },
    Distinct {
        collection: String,
        field: String,
        filter: BsonDocument,
    },
    MapReduce {
        collection: String,
        command: BsonDocument,
    },
    InlineMapReduce {
        collection: String,
        command: BsonDocument,
    },
    Drop {
        collection: String,
    },
}

#[derive(Default)]
struct State {
    collections: BTreeMap<String, Vec<BsonDocument>>,
    calls: Vec<RecordedCall>,
    map_reduce_output: Vec<BsonDocument>,
    distinct_values: Vec<Bson>,
    fail_next: Option<String>,
}

/// Shared in-memory database; clones see the same data
#[derive(Clone, Default)]
pub struct MemoryDatabase {
    state: Arc<Mutex<State>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append documents to a collection, creating it if needed
    pub fn insert(&self, collection: &str, docs: Vec<BsonDocument>) {
        self.state
            .lock()
            .collections
            .entry(collection.to_string())
            .or_default()
            .extend(docs);
    }

    /// Documents the next map/reduce job will produce
    pub fn set_map_reduce_output(&self, docs: Vec<BsonDocument>) {
        self.state.lock().map_reduce_output = docs;
    }

    /// Values the next distinct call will return
    pub fn set_distinct_values(&self, values: Vec<Bson>) {
        self.state.lock().distinct_values = values;
    }

    /// Make the next driver call fail with a `MongoDB` error
    pub fn fail_next(&self, message: impl Into<String>) {
        self.state.lock().fail_next = Some(message.into());
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().calls.clone()
    }

    pub fn has_collection(&self, name: &str) -> bool {
        self.state.lock().collections.contains_key(name)
    }

    pub fn collection_names(&self) -> Vec<String> {
        self.state.lock().collections.keys().cloned().collect()
    }

    pub fn documents(&self, name: &str) -> Vec<BsonDocument> {
        self.state
            .lock()
            .collections
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    /// Record `call`, failing instead if a failure was armed
    fn record(&self, call: RecordedCall) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(call);
        match state.fail_next.take() {
            Some(message) => Err(StrataError::MongoDB(message)),
            None => Ok(()),
        }
    }
}

impl DatabaseDriver for MemoryDatabase {
    fn collection(&self, name: &str) -> Arc<dyn CollectionDriver> {
        Arc::new(MemoryCollection {
            db: self.clone(),
            name: name.to_string(),
        })
    }
}

/// Collection handle of a [`MemoryDatabase`]
#[derive(Clone)]
pub struct MemoryCollection {
    db: MemoryDatabase,
    name: String,
}

#[async_trait]
impl CollectionDriver for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn find(&self, spec: FindSpec) -> Result<DocumentStream> {
        self.db.record(RecordedCall::Find {
            collection: self.name.clone(),
            spec: spec.clone(),
        })?;

        let docs = self.db.documents(&self.name);
        let skip = spec.skip.unwrap_or(0) as usize;
        let limit = match spec.limit {
            Some(limit) if limit > 0 => limit as usize,
            _ => usize::MAX,
        };
        let docs: Vec<Result<BsonDocument>> =
            docs.into_iter().skip(skip).take(limit).map(Ok).collect();
        Ok(stream::iter(docs).boxed())
    }

    async fn count(&self, filter: BsonDocument) -> Result<u64> {
        self.db.record(RecordedCall::Count {
            collection: self.name.clone(),
            filter,
        })?;
        Ok(self.db.documents(&self.name).len() as u64)
    }

    async fn update(
        &self,
        filter: BsonDocument,
        update: BsonDocument,
        options: UpdateOptions,
    ) -> Result<UpdateAck> {
        let multi = options.multi;
        self.db.record(RecordedCall::Update {
            collection: self.name.clone(),
            filter,
            update,
            options,
        })?;

        let stored = self.db.documents(&self.name).len() as u64;
        let matched = if multi { stored } else { stored.min(1) };
        Ok(UpdateAck {
            matched_count: matched,
            modified_count: matched,
            upserted_id: None,
        })
    }

    async fn distinct(&self, field: &str, filter: BsonDocument) -> Result<Vec<Bson>> {
        self.db.record(RecordedCall::Distinct {
            collection: self.name.clone(),
            field: field.to_string(),
            filter,
        })?;
        Ok(self.db.state.lock().distinct_values.clone())
    }

    async fn map_reduce(&self, job: &MapReduceJob) -> Result<Arc<dyn CollectionDriver>> {
        let command = job.to_command(&self.name)?;
        self.db.record(RecordedCall::MapReduce {
            collection: self.name.clone(),
            command,
        })?;

        let target = job
            .out
            .as_ref()
            .map(|out| out.collection().to_string())
            .ok_or_else(|| StrataError::Internal("validated job lost its output".to_string()))?;

        {
            let mut state = self.db.state.lock();
            let output = state.map_reduce_output.clone();
            state.collections.insert(target.clone(), output);
        }

        Ok(self.db.collection(&target))
    }

    async fn inline_map_reduce(&self, job: &MapReduceJob) -> Result<Vec<BsonDocument>> {
        self.db.record(RecordedCall::InlineMapReduce {
            collection: self.name.clone(),
            command: job.to_inline_command(&self.name),
        })?;
        Ok(self.db.state.lock().map_reduce_output.clone())
    }

    async fn drop_collection(&self) -> Result<()> {
        self.db.record(RecordedCall::Drop {
            collection: self.name.clone(),
        })?;
        self.db.state.lock().collections.remove(&self.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use futures::TryStreamExt;

    #[tokio::test]
    async fn test_find_applies_skip_and_limit() {
        let db = MemoryDatabase::new();
        db.insert("n", (0..5).map(|i| doc! { "i": i }).collect());

        let spec = FindSpec {
            skip: Some(1),
            limit: Some(2),
            ..Default::default()
        };
        let docs: Vec<BsonDocument> = db.collection("n").find(spec).await.unwrap().try_collect().await.unwrap();
        assert_eq!(docs, vec![doc! { "i": 1 }, doc! { "i": 2 }]);
    }

    #[tokio::test]
    async fn test_fail_next_is_consumed_once() {
        let db = MemoryDatabase::new();
        db.fail_next("connection reset");
        let coll = db.collection("n");

        let err = coll.count(doc! {}).await.unwrap_err();
        assert!(matches!(err, StrataError::MongoDB(ref m) if m == "connection reset"));
        assert_eq!(coll.count(doc! {}).await.unwrap(), 0);
        assert_eq!(db.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_drop_removes_collection() {
        let db = MemoryDatabase::new();
        db.insert("n", vec![doc! { "i": 1 }]);
        db.collection("n").drop_collection().await.unwrap();
        assert!(!db.has_collection("n"));
        assert!(db.collection_names().is_empty());
    }
}
