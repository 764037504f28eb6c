//! Composable filter predicates
//!
//! `Q` is a boolean expression tree over lookup conditions. Leaves pair a
//! lookup key (`field__op`) with a value; inner nodes combine with AND, OR
//! and negation, also reachable through the `&`, `|` and `!` operators.

use std::ops::{BitAnd, BitOr, Not};

use bson::Bson;

#[derive(Debug, Clone, PartialEq)]
pub enum Q {
    /// A single `key = value` lookup condition
    Leaf { key: String, value: Bson },
    /// All children must hold. An empty `And` matches everything.
    And(Vec<Q>),
    /// At least one child must hold. An empty `Or` matches nothing.
    Or(Vec<Q>),
    Not(Box<Q>),
}

impl Q {
    pub fn new(key: impl Into<String>, value: impl Into<Bson>) -> Self {
        Q::Leaf {
            key: key.into(),
            value: value.into(),
        }
    }

    /// The predicate that matches every document
    pub fn all() -> Self {
        Q::And(Vec::new())
    }

    /// Conjunction of several `(key, value)` lookups, the usual keyword form
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<Bson>,
        I: IntoIterator<Item = (K, V)>,
    {
        Q::And(pairs.into_iter().map(|(k, v)| Q::new(k, v)).collect())
    }

    /// True when the predicate adds no condition at all
    pub fn is_empty(&self) -> bool {
        match self {
            Q::And(children) => children.iter().all(Q::is_empty),
            _ => false,
        }
    }

    /// Rebuild the tree with every leaf key passed through `f`
    pub fn map_keys<F>(self, f: &F) -> Self
    where
        F: Fn(String) -> String,
    {
        match self {
            Q::Leaf { key, value } => Q::Leaf { key: f(key), value },
            Q::And(children) => Q::And(children.into_iter().map(|c| c.map_keys(f)).collect()),
            Q::Or(children) => Q::Or(children.into_iter().map(|c| c.map_keys(f)).collect()),
            Q::Not(inner) => Q::Not(Box::new(inner.map_keys(f))),
        }
    }

    /// Leaf keys in depth-first order
    pub fn keys(&self) -> Vec<&str> {
        let mut keys = Vec::new();
        self.collect_keys(&mut keys);
        keys
    }

    fn collect_keys<'a>(&'a self, keys: &mut Vec<&'a str>) {
        match self {
            Q::Leaf { key, .. } => keys.push(key),
            Q::And(children) | Q::Or(children) => {
                for child in children {
                    child.collect_keys(keys);
                }
            }
            Q::Not(inner) => inner.collect_keys(keys),
        }
    }
}

impl BitAnd for Q {
    type Output = Q;

    fn bitand(self, rhs: Q) -> Q {
        if self.is_empty() {
            return rhs;
        }
        if rhs.is_empty() {
            return self;
        }
        match (self, rhs) {
            (Q::And(mut left), Q::And(right)) => {
                left.extend(right);
                Q::And(left)
            }
            (Q::And(mut left), other) => {
                left.push(other);
                Q::And(left)
            }
            (other, Q::And(mut right)) => {
                right.insert(0, other);
                Q::And(right)
            }
            (left, right) => Q::And(vec![left, right]),
        }
    }
}

impl BitOr for Q {
    type Output = Q;

    fn bitor(self, rhs: Q) -> Q {
        match (self, rhs) {
            (Q::Or(mut left), Q::Or(right)) => {
                left.extend(right);
                Q::Or(left)
            }
            (Q::Or(mut left), other) => {
                left.push(other);
                Q::Or(left)
            }
            (left, right) => Q::Or(vec![left, right]),
        }
    }
}

impl Not for Q {
    type Output = Q;

    fn not(self) -> Q {
        match self {
            Q::Not(inner) => *inner,
            other => Q::Not(Box::new(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::bson;

    #[test]
    fn test_and_flattens() {
        let q = Q::new("a", 1) & Q::new("b", 2) & Q::new("c", 3);
        match q {
            Q::And(children) => assert_eq!(children.len(), 3),
            other => panic!("expected And, got {:?}", other),
        }
    }

    #[test]
    fn test_and_with_empty_is_identity() {
        let leaf = Q::new("a", 1);
        assert_eq!(Q::all() & leaf.clone(), leaf);
        assert_eq!(leaf.clone() & Q::all(), leaf);
    }

    #[test]
    fn test_or_flattens() {
        let q = Q::new("a", 1) | Q::new("b", 2) | Q::new("c", 3);
        match q {
            Q::Or(children) => assert_eq!(children.len(), 3),
            other => panic!("expected Or, got {:?}", other),
        }
    }

    #[test]
    fn test_double_negation_cancels() {
        let leaf = Q::new("a", 1);
        assert_eq!(!!leaf.clone(), leaf);
    }

    #[test]
    fn test_is_empty() {
        assert!(Q::all().is_empty());
        assert!(Q::And(vec![Q::all()]).is_empty());
        assert!(!Q::new("a", 1).is_empty());
        assert!(!Q::Or(vec![]).is_empty());
    }

    #[test]
    fn test_from_pairs() {
        let q = Q::from_pairs([("status", bson!("pending")), ("total__gte", bson!(10))]);
        assert_eq!(q.keys(), vec!["status", "total__gte"]);
    }

    #[test]
    fn test_map_keys_reaches_every_leaf() {
        let q = (Q::new("a", 1) | !Q::new("b", 2)) & Q::new("c", 3);
        let upper = q.map_keys(&|k: String| k.to_uppercase());
        assert_eq!(upper.keys(), vec!["A", "B", "C"]);
    }
}
