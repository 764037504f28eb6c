//! Driver seam between querysets and the database
//!
//! Querysets never talk to the `mongodb` crate directly; they go through
//! [`DatabaseDriver`] and [`CollectionDriver`]. [`MongoCollection`] is the
//! production implementation, [`crate::memory::MemoryDatabase`] the in-memory
//! one used by tests.

use std::sync::Arc;

use async_trait::async_trait;
use bson::{Bson, Document as BsonDocument};
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use mongodb::{Client, Collection, Database};
use strata_common::{Result, StrataError};
use tracing::debug;

use crate::map_reduce::MapReduceJob;

/// Stream of documents returned by a find
pub type DocumentStream = BoxStream<'static, Result<BsonDocument>>;

/// Parameters of a find operation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindSpec {
    pub filter: BsonDocument,
    pub sort: Option<BsonDocument>,
    pub skip: Option<u64>,
    pub limit: Option<i64>,
}

impl FindSpec {
    pub fn new(filter: BsonDocument) -> Self {
        Self {
            filter,
            ..Default::default()
        }
    }
}

/// Options forwarded to the driver's update call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Insert a document when nothing matches
    pub upsert: bool,
    /// Update every matching document rather than the first one
    pub multi: bool,
    pub bypass_document_validation: Option<bool>,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            upsert: false,
            multi: true,
            bypass_document_validation: None,
        }
    }
}

impl UpdateOptions {
    pub fn upsert(mut self, upsert: bool) -> Self {
        self.upsert = upsert;
        self
    }

    pub fn multi(mut self, multi: bool) -> Self {
        self.multi = multi;
        self
    }
}

/// Server acknowledgement of an update
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateAck {
    pub matched_count: u64,
    pub modified_count: u64,
    pub upserted_id: Option<Bson>,
}

/// Operations on a single collection
#[async_trait]
pub trait CollectionDriver: Send + Sync {
    /// Name of the collection
    fn name(&self) -> &str;

    async fn find(&self, spec: FindSpec) -> Result<DocumentStream>;

    async fn count(&self, filter: BsonDocument) -> Result<u64>;

    async fn update(
        &self,
        filter: BsonDocument,
        update: BsonDocument,
        options: UpdateOptions,
    ) -> Result<UpdateAck>;

    async fn distinct(&self, field: &str, filter: BsonDocument) -> Result<Vec<Bson>>;

    /// Run a map/reduce job writing to a result collection and return a
    /// handle on that collection
    async fn map_reduce(&self, job: &MapReduceJob) -> Result<Arc<dyn CollectionDriver>>;

    /// Run a map/reduce job in memory and return the result documents
    async fn inline_map_reduce(&self, job: &MapReduceJob) -> Result<Vec<BsonDocument>>;

    async fn drop_collection(&self) -> Result<()>;
}

/// Source of collection handles
pub trait DatabaseDriver: Send + Sync {
    fn collection(&self, name: &str) -> Arc<dyn CollectionDriver>;
}

/// [`CollectionDriver`] backed by the official MongoDB driver
#[derive(Clone)]
pub struct MongoCollection {
    client: Client,
    database: Database,
    collection: Collection<BsonDocument>,
}

impl MongoCollection {
    pub fn new(client: Client, database: Database, name: &str) -> Self {
        let collection = database.collection(name);
        Self {
            client,
            database,
            collection,
        }
    }

    /// Locate the collection named in a `mapReduce` response's `result`
    fn result_collection(&self, response: &BsonDocument) -> Result<MongoCollection> {
        match response.get("result") {
            Some(Bson::String(name)) => Ok(MongoCollection::new(
                self.client.clone(),
                self.database.clone(),
                name,
            )),
            Some(Bson::Document(target)) => {
                let db = self.client.database(target.get_str("db")?);
                let name = target.get_str("collection")?;
                Ok(MongoCollection::new(self.client.clone(), db, name))
            }
            _ => Err(StrataError::Deserialization(
                "mapReduce response has no result collection".to_string(),
            )),
        }
    }
}

#[async_trait]
impl CollectionDriver for MongoCollection {
    fn name(&self) -> &str {
        self.collection.name()
    }

    async fn find(&self, spec: FindSpec) -> Result<DocumentStream> {
        debug!(collection = self.name(), filter = %spec.filter, "find");

        let mut action = self.collection.find(spec.filter);
        if let Some(sort) = spec.sort {
            action = action.sort(sort);
        }
        if let Some(skip) = spec.skip {
            action = action.skip(skip);
        }
        if let Some(limit) = spec.limit {
            action = action.limit(limit);
        }

        let cursor = action.await?;
        Ok(cursor.map_err(StrataError::from).boxed())
    }

    async fn count(&self, filter: BsonDocument) -> Result<u64> {
        debug!(collection = self.name(), filter = %filter, "count");
        Ok(self.collection.count_documents(filter).await?)
    }

    async fn update(
        &self,
        filter: BsonDocument,
        update: BsonDocument,
        options: UpdateOptions,
    ) -> Result<UpdateAck> {
        debug!(
            collection = self.name(),
            filter = %filter,
            update = %update,
            multi = options.multi,
            upsert = options.upsert,
            "update"
        );

        let mut driver_options = mongodb::options::UpdateOptions::default();
        driver_options.upsert = Some(options.upsert);
        driver_options.bypass_document_validation = options.bypass_document_validation;

        let result = if options.multi {
            self.collection
                .update_many(filter, update)
                .with_options(driver_options)
                .await?
        } else {
            self.collection
                .update_one(filter, update)
                .with_options(driver_options)
                .await?
        };

        Ok(UpdateAck {
            matched_count: result.matched_count,
            modified_count: result.modified_count,
            upserted_id: result.upserted_id,
        })
    }

    async fn distinct(&self, field: &str, filter: BsonDocument) -> Result<Vec<Bson>> {
        debug!(collection = self.name(), field, filter = %filter, "distinct");
        Ok(self.collection.distinct(field, filter).await?)
    }

    async fn map_reduce(&self, job: &MapReduceJob) -> Result<Arc<dyn CollectionDriver>> {
        let command = job.to_command(self.name())?;
        debug!(collection = self.name(), command = %command, "mapReduce");

        let response = self.database.run_command(command).await?;
        let result = self.result_collection(&response)?;
        Ok(Arc::new(result))
    }

    async fn inline_map_reduce(&self, job: &MapReduceJob) -> Result<Vec<BsonDocument>> {
        let command = job.to_inline_command(self.name());
        debug!(collection = self.name(), command = %command, "inline mapReduce");

        let response = self.database.run_command(command).await?;
        response
            .get_array("results")?
            .iter()
            .map(|entry| match entry {
                Bson::Document(doc) => Ok(doc.clone()),
                other => Err(StrataError::Deserialization(format!(
                    "mapReduce result entry is not a document: {}",
                    other
                ))),
            })
            .collect()
    }

    async fn drop_collection(&self) -> Result<()> {
        debug!(collection = self.name(), "drop");
        self.collection.drop().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_options_default_updates_all_matches() {
        let options = UpdateOptions::default();
        assert!(options.multi);
        assert!(!options.upsert);
        assert!(options.bypass_document_validation.is_none());
    }

    #[test]
    fn test_update_options_builder() {
        let options = UpdateOptions::default().upsert(true).multi(false);
        assert!(options.upsert);
        assert!(!options.multi);
    }

    #[test]
    fn test_find_spec_new() {
        let spec = FindSpec::new(bson::doc! { "status": "pending" });
        assert_eq!(spec.filter, bson::doc! { "status": "pending" });
        assert!(spec.sort.is_none());
        assert!(spec.limit.is_none());
    }
}
