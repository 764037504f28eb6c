//! Dotted-path rewriting for document-like fields
//!
//! A lookup key such as `items__sku__in` on a model whose `items` field holds
//! a nested document means "the `sku` key inside `items`, membership test".
//! The rewriter turns the inner separators into dots (`items.sku__in`) so the
//! compiler treats `items.sku` as one path and `in` as the operator.
//!
//! Operator suffixes are matched against the whole last segment, so there is
//! never more than one candidate (`iexact` and `exact` cannot both match).

use strata_common::{Result, StrataError};
use tracing::trace;

use crate::lookup::{Lookup, LOOKUP_SEP};
use crate::model::{FieldResolution, ModelMeta};
use crate::predicate::Q;

/// A lookup key resolved to a document path and operator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLookup {
    /// Dot-notation path as stored in MongoDB
    pub path: String,
    pub lookup: Lookup,
    /// Whether the path points below a top-level field
    pub nested: bool,
}

pub struct FieldPathRewriter<'a> {
    meta: &'a ModelMeta,
}

impl<'a> FieldPathRewriter<'a> {
    pub fn new(meta: &'a ModelMeta) -> Self {
        Self { meta }
    }

    /// Rewrite one lookup key; keys not rooted at a document-like field are
    /// returned unchanged.
    pub fn rewrite_key(&self, key: &str) -> String {
        if !key.contains(LOOKUP_SEP) {
            return key.to_string();
        }

        let root = key.split(LOOKUP_SEP).next().unwrap_or(key);
        if !self.meta.is_document_like(root) {
            return key.to_string();
        }

        let (path, lookup) = Lookup::split_suffix(key);
        let dotted = path.replace(LOOKUP_SEP, ".");
        let rewritten = match lookup {
            Some(lookup) => format!("{}{}{}", dotted, LOOKUP_SEP, lookup),
            None => dotted,
        };

        trace!(from = key, to = %rewritten, "Rewrote nested lookup key");
        rewritten
    }

    /// Rewrite every leaf key of a predicate
    pub fn rewrite(&self, q: Q) -> Q {
        q.map_keys(&|key: String| self.rewrite_key(&key))
    }

    /// Resolve a (rewritten) lookup key against the model.
    ///
    /// A key without a recognised operator suffix is an equality test.
    pub fn resolve(&self, key: &str) -> Result<ResolvedLookup> {
        let (head, lookup) = Lookup::split_suffix(key);
        let lookup = lookup.unwrap_or(Lookup::Exact);

        let mut segments = head.split(LOOKUP_SEP);
        let field = segments.next().unwrap_or(head);
        let rest: Vec<&str> = segments.collect();

        match self.meta.resolve(field) {
            FieldResolution::Declared(descriptor) => {
                if rest.is_empty() {
                    return Ok(ResolvedLookup {
                        path: descriptor.column().to_string(),
                        lookup,
                        nested: false,
                    });
                }
                if !descriptor.is_document_like() {
                    return Err(StrataError::Query(format!(
                        "Unsupported lookup '{}' for {} field '{}'",
                        rest.join(LOOKUP_SEP),
                        descriptor.kind().internal_type(),
                        descriptor.name()
                    )));
                }
                Ok(ResolvedLookup {
                    path: format!("{}.{}", descriptor.column(), rest.join(".")),
                    lookup,
                    nested: true,
                })
            }
            FieldResolution::AdHocNested(path) => {
                if !rest.is_empty() {
                    return Err(StrataError::Query(format!(
                        "Unsupported lookup '{}' for nested path '{}'",
                        rest.join(LOOKUP_SEP),
                        path
                    )));
                }
                let path = path.to_string();
                let root = path.split('.').next().unwrap_or(&path);
                let path = match self.meta.get_field(root) {
                    Some(descriptor) => {
                        format!("{}{}", descriptor.column(), &path[root.len()..])
                    }
                    None => path.clone(),
                };
                Ok(ResolvedLookup {
                    path,
                    lookup,
                    nested: true,
                })
            }
            FieldResolution::Unknown(err) => Err(err),
        }
    }
}
