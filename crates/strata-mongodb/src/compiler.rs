//! Compilation of predicates into MongoDB filter documents

use std::sync::Arc;

use bson::{doc, Bson, Document as BsonDocument};
use futures::stream::{self, StreamExt, TryStreamExt};
use strata_common::Result;

use crate::driver::{CollectionDriver, DocumentStream, FindSpec};
use crate::model::ModelMeta;
use crate::predicate::Q;
use crate::rewrite::FieldPathRewriter;

/// Filter that no document satisfies
fn match_nothing() -> BsonDocument {
    doc! { "_id": { "$in": [] } }
}

/// Turns `Q` trees into filter documents for one model
pub struct QueryCompiler<'a> {
    meta: &'a ModelMeta,
}

impl<'a> QueryCompiler<'a> {
    pub fn new(meta: &'a ModelMeta) -> Self {
        Self { meta }
    }

    /// Compile a predicate whose keys have already been rewritten
    pub fn compile(&self, q: &Q) -> Result<BsonDocument> {
        self.compile_node(q, false)
    }

    /// Negation is pushed down to the leaves (De Morgan), where the negated
    /// operator map applies.
    fn compile_node(&self, q: &Q, negated: bool) -> Result<BsonDocument> {
        match q {
            Q::Leaf { key, value } => self.compile_leaf(key, value, negated),
            Q::Not(inner) => self.compile_node(inner, !negated),
            Q::And(children) if !negated => self.conjunction(children, false),
            Q::And(children) => self.disjunction(children, true),
            Q::Or(children) if !negated => self.disjunction(children, false),
            Q::Or(children) => self.conjunction(children, true),
        }
    }

    fn compile_leaf(&self, key: &str, value: &Bson, negated: bool) -> Result<BsonDocument> {
        let resolved = FieldPathRewriter::new(self.meta).resolve(key)?;
        let condition = resolved.lookup.to_condition(value.clone(), negated)?;

        let mut filter = BsonDocument::new();
        filter.insert(resolved.path, condition);
        Ok(filter)
    }

    fn conjunction(&self, children: &[Q], negated: bool) -> Result<BsonDocument> {
        let mut parts = Vec::with_capacity(children.len());
        for child in children {
            let part = self.compile_node(child, negated)?;
            if !part.is_empty() {
                parts.push(part);
            }
        }

        Ok(match parts.len() {
            0 => BsonDocument::new(),
            1 => parts.remove(0),
            _ => doc! { "$and": parts },
        })
    }

    fn disjunction(&self, children: &[Q], negated: bool) -> Result<BsonDocument> {
        let mut parts = Vec::with_capacity(children.len());
        for child in children {
            let part = self.compile_node(child, negated)?;
            if part.is_empty() {
                // One branch matches everything, so the whole OR does.
                return Ok(BsonDocument::new());
            }
            parts.push(part);
        }

        Ok(match parts.len() {
            0 => match_nothing(),
            1 => parts.remove(0),
            _ => doc! { "$or": parts },
        })
    }
}

/// Combine a raw filter with compiled ORM conditions
pub(crate) fn and_filters(raw: BsonDocument, compiled: BsonDocument) -> BsonDocument {
    match (raw.is_empty(), compiled.is_empty()) {
        (_, true) => raw,
        (true, false) => compiled,
        (false, false) => doc! { "$and": [raw, compiled] },
    }
}

/// A queryset compiled down to what the driver needs
#[derive(Clone)]
pub struct BuiltQuery {
    /// The filter document sent to the server
    pub mongo_query: BsonDocument,
    pub collection: Arc<dyn CollectionDriver>,
    pub sort: Option<BsonDocument>,
    pub skip: Option<u64>,
    pub limit: Option<i64>,
}

impl BuiltQuery {
    fn find_spec(&self) -> FindSpec {
        FindSpec {
            filter: self.mongo_query.clone(),
            sort: self.sort.clone(),
            skip: self.skip,
            limit: self.limit,
        }
    }

    /// True when the slice window admits no documents
    pub fn is_empty_window(&self) -> bool {
        self.limit == Some(0)
    }

    /// Run the find and return its cursor.
    ///
    /// An empty window never reaches the driver, where a zero limit means
    /// "no limit".
    pub async fn get_cursor(&self) -> Result<DocumentStream> {
        if self.is_empty_window() {
            return Ok(stream::empty().boxed());
        }
        self.collection.find(self.find_spec()).await
    }

    /// Run the find and collect every document
    pub async fn fetch_all(&self) -> Result<Vec<BsonDocument>> {
        self.get_cursor().await?.try_collect().await
    }
}

impl std::fmt::Debug for BuiltQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltQuery")
            .field("mongo_query", &self.mongo_query)
            .field("collection", &self.collection.name())
            .field("sort", &self.sort)
            .field("skip", &self.skip)
            .field("limit", &self.limit)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FieldDescriptor, FieldKind};
    use bson::bson;
    use strata_common::StrataError;

    fn meta() -> ModelMeta {
        ModelMeta::new("Order", "orders")
            .field(FieldDescriptor::new("status", FieldKind::String))
            .field(FieldDescriptor::new("total", FieldKind::Integer))
            .field(FieldDescriptor::new("items", FieldKind::Dict))
    }

    fn compile(q: Q) -> Result<BsonDocument> {
        let meta = meta();
        let q = FieldPathRewriter::new(&meta).rewrite(q);
        QueryCompiler::new(&meta).compile(&q)
    }

    #[test]
    fn test_empty_predicate_matches_all() {
        assert_eq!(compile(Q::all()).unwrap(), doc! {});
    }

    #[test]
    fn test_leaf_equality() {
        assert_eq!(compile(Q::new("status", "pending")).unwrap(), doc! { "status": "pending" });
    }

    #[test]
    fn test_primary_key_alias() {
        assert_eq!(compile(Q::new("pk", 7)).unwrap(), doc! { "_id": 7 });
        assert_eq!(compile(Q::new("id__in", bson!([1, 2]))).unwrap(), doc! { "_id": { "$in": [1, 2] } });
    }

    #[test]
    fn test_nested_membership() {
        let filter = compile(Q::new("items__sku__in", bson!(["A", "B"]))).unwrap();
        assert_eq!(filter, doc! { "items.sku": { "$in": ["A", "B"] } });
    }

    #[test]
    fn test_nested_without_operator_is_equality() {
        let filter = compile(Q::new("items__sku", "A")).unwrap();
        assert_eq!(filter, doc! { "items.sku": "A" });
    }

    #[test]
    fn test_conjunction() {
        let filter = compile(Q::new("status", "pending") & Q::new("total__gte", 10)).unwrap();
        assert_eq!(
            filter,
            doc! { "$and": [{ "status": "pending" }, { "total": { "$gte": 10 } }] }
        );
    }

    #[test]
    fn test_disjunction() {
        let filter = compile(Q::new("status", "pending") | Q::new("status", "new")).unwrap();
        assert_eq!(filter, doc! { "$or": [{ "status": "pending" }, { "status": "new" }] });
    }

    #[test]
    fn test_negated_leaf_uses_negated_operator() {
        assert_eq!(compile(!Q::new("total__gt", 5)).unwrap(), doc! { "total": { "$lte": 5 } });
        assert_eq!(compile(!Q::new("status", "x")).unwrap(), doc! { "status": { "$ne": "x" } });
    }

    #[test]
    fn test_negation_de_morgan() {
        let filter = compile(!(Q::new("status", "a") & Q::new("total__lt", 3))).unwrap();
        assert_eq!(
            filter,
            doc! { "$or": [{ "status": { "$ne": "a" } }, { "total": { "$gte": 3 } }] }
        );

        let filter = compile(!(Q::new("status", "a") | Q::new("status", "b"))).unwrap();
        assert_eq!(
            filter,
            doc! { "$and": [{ "status": { "$ne": "a" } }, { "status": { "$ne": "b" } }] }
        );
    }

    #[test]
    fn test_empty_or_matches_nothing() {
        assert_eq!(compile(Q::Or(vec![])).unwrap(), match_nothing());
        assert_eq!(compile(!Q::all()).unwrap(), match_nothing());
    }

    #[test]
    fn test_or_with_match_all_branch() {
        assert_eq!(compile(Q::Or(vec![Q::new("status", "a"), Q::all()])).unwrap(), doc! {});
    }

    #[test]
    fn test_unknown_field_fails() {
        let err = compile(Q::new("colour", "red")).unwrap_err();
        assert!(matches!(err, StrataError::UnknownField { .. }));
    }

    #[test]
    fn test_bad_lookup_value_fails() {
        let err = compile(Q::new("total__in", 3)).unwrap_err();
        assert!(matches!(err, StrataError::Query(_)));
    }

    #[test]
    fn test_and_filters() {
        let raw = doc! { "status": "pending" };
        assert_eq!(and_filters(raw.clone(), doc! {}), raw);
        assert_eq!(and_filters(doc! {}, raw.clone()), raw);
        assert_eq!(
            and_filters(raw.clone(), doc! { "total": 1 }),
            doc! { "$and": [{ "status": "pending" }, { "total": 1 }] }
        );
    }
}
