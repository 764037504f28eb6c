//! Raw queries and updates
//!
//! These bypass predicate translation: the filter document given by the
//! caller goes to the driver exactly as written.

use bson::Document as BsonDocument;
use strata_common::Result;
use tracing::{debug, instrument};

use crate::driver::{UpdateAck, UpdateOptions};
use crate::model::Model;
use crate::predicate::Q;
use crate::queryset::QuerySet;

/// Selects the documents a raw update applies to
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateTarget {
    /// A driver-native filter document, used verbatim
    RawFilter(BsonDocument),
    /// A predicate, translated like any other filter
    Predicate(Q),
}

impl From<BsonDocument> for UpdateTarget {
    fn from(filter: BsonDocument) -> Self {
        UpdateTarget::RawFilter(filter)
    }
}

impl From<Q> for UpdateTarget {
    fn from(q: Q) -> Self {
        UpdateTarget::Predicate(q)
    }
}

impl<M: Model> QuerySet<M> {
    /// A fresh queryset over `M` that uses `query` as its filter document.
    ///
    /// `None` matches every document.
    pub fn raw_query(&self, query: Option<BsonDocument>) -> Self {
        let mut qs = QuerySet::from_parts(self.meta.clone(), self.db.clone());
        qs.raw_query = Some(query.unwrap_or_default());
        qs
    }

    /// Apply `update` (a replacement document or atomic modifiers such as
    /// `$inc`) to the documents selected by `target`.
    ///
    /// A raw filter replaces this queryset's conditions; a predicate is added
    /// to them. `options` go to the driver's update call unchanged. Driver
    /// errors are returned as-is.
    #[instrument(skip_all, fields(model = self.meta.name()))]
    pub async fn raw_update(
        &self,
        target: impl Into<UpdateTarget>,
        update: BsonDocument,
        options: UpdateOptions,
    ) -> Result<UpdateAck> {
        let mut qs = match target.into() {
            UpdateTarget::RawFilter(filter) => self.raw_query(Some(filter)),
            UpdateTarget::Predicate(q) => self.filter(q)?,
        };
        qs.for_write = true;

        let query = qs.build_query()?;
        let ack = query
            .collection
            .update(query.mongo_query, update, options)
            .await?;

        debug!(
            for_write = qs.is_for_write(),
            matched = ack.matched_count,
            modified = ack.modified_count,
            "Raw update applied"
        );
        Ok(ack)
    }
}
