//! Lookup operators and their MongoDB translations
//!
//! A lookup key is `field__op`; the operator suffix selects how the value is
//! turned into a query condition. Each operator has a forward and a negated
//! translation so negation can be pushed down to individual conditions.

use bson::{doc, Bson, Document, Regex};
use strata_common::{Result, StrataError};

/// Token separating path segments and the operator suffix in a lookup key
pub const LOOKUP_SEP: &str = "__";

/// Lookup operators understood by the query compiler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lookup {
    Exact,
    IExact,
    Contains,
    IContains,
    StartsWith,
    IStartsWith,
    EndsWith,
    IEndsWith,
    Regex,
    IRegex,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Range,
    IsNull,
}

impl Lookup {
    /// Every operator, forward and negated maps alike
    pub const ALL: [Lookup; 17] = [
        Lookup::Exact,
        Lookup::IExact,
        Lookup::Contains,
        Lookup::IContains,
        Lookup::StartsWith,
        Lookup::IStartsWith,
        Lookup::EndsWith,
        Lookup::IEndsWith,
        Lookup::Regex,
        Lookup::IRegex,
        Lookup::Gt,
        Lookup::Gte,
        Lookup::Lt,
        Lookup::Lte,
        Lookup::In,
        Lookup::Range,
        Lookup::IsNull,
    ];

    /// The suffix used in lookup keys
    pub fn suffix(&self) -> &'static str {
        match self {
            Lookup::Exact => "exact",
            Lookup::IExact => "iexact",
            Lookup::Contains => "contains",
            Lookup::IContains => "icontains",
            Lookup::StartsWith => "startswith",
            Lookup::IStartsWith => "istartswith",
            Lookup::EndsWith => "endswith",
            Lookup::IEndsWith => "iendswith",
            Lookup::Regex => "regex",
            Lookup::IRegex => "iregex",
            Lookup::Gt => "gt",
            Lookup::Gte => "gte",
            Lookup::Lt => "lt",
            Lookup::Lte => "lte",
            Lookup::In => "in",
            Lookup::Range => "range",
            Lookup::IsNull => "isnull",
        }
    }

    /// Parse a whole segment as an operator suffix.
    ///
    /// Only an exact segment match counts, so `iexact` never matches `exact`.
    pub fn from_suffix(segment: &str) -> Option<Lookup> {
        Self::ALL.iter().copied().find(|l| l.suffix() == segment)
    }

    /// Split a trailing `__op` off `key`, if `op` is a known operator
    pub fn split_suffix(key: &str) -> (&str, Option<Lookup>) {
        match key.rsplit_once(LOOKUP_SEP) {
            Some((head, tail)) if !head.is_empty() => match Lookup::from_suffix(tail) {
                Some(lookup) => (head, Some(lookup)),
                None => (key, None),
            },
            _ => (key, None),
        }
    }

    /// Translate `value` into the condition placed under the field path.
    ///
    /// `negated` selects the negated operator map.
    pub fn to_condition(&self, value: Bson, negated: bool) -> Result<Bson> {
        let condition = match (self, negated) {
            (Lookup::Exact, false) => value,
            (Lookup::Exact, true) => Bson::Document(doc! { "$ne": value }),

            (Lookup::Gt, false) => Bson::Document(doc! { "$gt": value }),
            (Lookup::Gt, true) => Bson::Document(doc! { "$lte": value }),
            (Lookup::Gte, false) => Bson::Document(doc! { "$gte": value }),
            (Lookup::Gte, true) => Bson::Document(doc! { "$lt": value }),
            (Lookup::Lt, false) => Bson::Document(doc! { "$lt": value }),
            (Lookup::Lt, true) => Bson::Document(doc! { "$gte": value }),
            (Lookup::Lte, false) => Bson::Document(doc! { "$lte": value }),
            (Lookup::Lte, true) => Bson::Document(doc! { "$gt": value }),

            (Lookup::In, negated) => {
                let values = self.expect_array(value)?;
                let mut condition = Document::new();
                condition.insert(if negated { "$nin" } else { "$in" }, values);
                Bson::Document(condition)
            }

            (Lookup::Range, negated) => {
                let (low, high) = self.expect_pair(value)?;
                let range = doc! { "$gte": low, "$lte": high };
                if negated {
                    Bson::Document(doc! { "$not": range })
                } else {
                    Bson::Document(range)
                }
            }

            (Lookup::IsNull, negated) => {
                let is_null = match value {
                    Bson::Boolean(b) => b,
                    other => {
                        return Err(StrataError::Query(format!(
                            "'isnull' lookup expects a boolean, got {}",
                            other
                        )))
                    }
                };
                if is_null != negated {
                    Bson::Null
                } else {
                    Bson::Document(doc! { "$ne": Bson::Null })
                }
            }

            (_, negated) => {
                let regex = self.to_regex(value)?;
                if negated {
                    Bson::Document(doc! { "$not": regex })
                } else {
                    Bson::RegularExpression(regex)
                }
            }
        };

        Ok(condition)
    }

    fn to_regex(&self, value: Bson) -> Result<Regex> {
        let text = match value {
            Bson::String(s) => s,
            other => {
                return Err(StrataError::Query(format!(
                    "'{}' lookup expects a string, got {}",
                    self.suffix(),
                    other
                )))
            }
        };

        let (pattern, options) = match self {
            Lookup::IExact => (format!("^{}$", regex::escape(&text)), "i"),
            Lookup::Contains => (regex::escape(&text), ""),
            Lookup::IContains => (regex::escape(&text), "i"),
            Lookup::StartsWith => (format!("^{}", regex::escape(&text)), ""),
            Lookup::IStartsWith => (format!("^{}", regex::escape(&text)), "i"),
            Lookup::EndsWith => (format!("{}$", regex::escape(&text)), ""),
            Lookup::IEndsWith => (format!("{}$", regex::escape(&text)), "i"),
            Lookup::Regex => (text, ""),
            Lookup::IRegex => (text, "i"),
            _ => {
                return Err(StrataError::Internal(format!(
                    "'{}' is not a pattern lookup",
                    self.suffix()
                )))
            }
        };

        Ok(Regex {
            pattern,
            options: options.to_string(),
        })
    }

    fn expect_array(&self, value: Bson) -> Result<Vec<Bson>> {
        match value {
            Bson::Array(values) => Ok(values),
            other => Err(StrataError::Query(format!(
                "'{}' lookup expects an array, got {}",
                self.suffix(),
                other
            ))),
        }
    }

    fn expect_pair(&self, value: Bson) -> Result<(Bson, Bson)> {
        let mut values = self.expect_array(value)?;
        if values.len() != 2 {
            return Err(StrataError::Query(format!(
                "'range' lookup expects exactly two values, got {}",
                values.len()
            )));
        }
        let high = values.remove(1);
        let low = values.remove(0);
        Ok((low, high))
    }
}

impl std::fmt::Display for Lookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.suffix())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::bson;

    #[test]
    fn test_from_suffix_exact_segment_only() {
        assert_eq!(Lookup::from_suffix("gte"), Some(Lookup::Gte));
        assert_eq!(Lookup::from_suffix("iexact"), Some(Lookup::IExact));
        assert_eq!(Lookup::from_suffix("xgte"), None);
        assert_eq!(Lookup::from_suffix("sku"), None);
    }

    #[test]
    fn test_split_suffix() {
        assert_eq!(Lookup::split_suffix("total__gte"), ("total", Some(Lookup::Gte)));
        assert_eq!(
            Lookup::split_suffix("items.sku__in"),
            ("items.sku", Some(Lookup::In))
        );
        assert_eq!(Lookup::split_suffix("items.sku"), ("items.sku", None));
        assert_eq!(Lookup::split_suffix("name__iexact"), ("name", Some(Lookup::IExact)));
        assert_eq!(Lookup::split_suffix("__in"), ("__in", None));
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(
            Lookup::Gte.to_condition(bson!(10), false).unwrap(),
            bson!({ "$gte": 10 })
        );
        assert_eq!(
            Lookup::Gte.to_condition(bson!(10), true).unwrap(),
            bson!({ "$lt": 10 })
        );
        assert_eq!(
            Lookup::Lt.to_condition(bson!(3), true).unwrap(),
            bson!({ "$gte": 3 })
        );
    }

    #[test]
    fn test_exact() {
        assert_eq!(Lookup::Exact.to_condition(bson!("a"), false).unwrap(), bson!("a"));
        assert_eq!(
            Lookup::Exact.to_condition(bson!("a"), true).unwrap(),
            bson!({ "$ne": "a" })
        );
    }

    #[test]
    fn test_membership() {
        assert_eq!(
            Lookup::In.to_condition(bson!(["A", "B"]), false).unwrap(),
            bson!({ "$in": ["A", "B"] })
        );
        assert_eq!(
            Lookup::In.to_condition(bson!(["A", "B"]), true).unwrap(),
            bson!({ "$nin": ["A", "B"] })
        );
        assert!(Lookup::In.to_condition(bson!("A"), false).is_err());
    }

    #[test]
    fn test_range() {
        assert_eq!(
            Lookup::Range.to_condition(bson!([1, 5]), false).unwrap(),
            bson!({ "$gte": 1, "$lte": 5 })
        );
        assert_eq!(
            Lookup::Range.to_condition(bson!([1, 5]), true).unwrap(),
            bson!({ "$not": { "$gte": 1, "$lte": 5 } })
        );
        assert!(Lookup::Range.to_condition(bson!([1]), false).is_err());
    }

    #[test]
    fn test_isnull() {
        assert_eq!(Lookup::IsNull.to_condition(bson!(true), false).unwrap(), Bson::Null);
        assert_eq!(
            Lookup::IsNull.to_condition(bson!(false), false).unwrap(),
            bson!({ "$ne": null })
        );
        assert_eq!(
            Lookup::IsNull.to_condition(bson!(true), true).unwrap(),
            bson!({ "$ne": null })
        );
        assert!(Lookup::IsNull.to_condition(bson!("yes"), false).is_err());
    }

    #[test]
    fn test_pattern_lookups_escape_input() {
        let cond = Lookup::IStartsWith.to_condition(bson!("a.b"), false).unwrap();
        match cond {
            Bson::RegularExpression(re) => {
                assert_eq!(re.pattern, r"^a\.b");
                assert_eq!(re.options, "i");
            }
            other => panic!("expected regex, got {}", other),
        }
    }

    #[test]
    fn test_regex_lookup_is_verbatim() {
        let cond = Lookup::Regex.to_condition(bson!("^ab+$"), false).unwrap();
        match cond {
            Bson::RegularExpression(re) => assert_eq!(re.pattern, "^ab+$"),
            other => panic!("expected regex, got {}", other),
        }
    }

    #[test]
    fn test_negated_pattern_lookup() {
        let cond = Lookup::Contains.to_condition(bson!("x"), true).unwrap();
        let doc = cond.as_document().unwrap();
        assert!(matches!(doc.get("$not"), Some(Bson::RegularExpression(_))));
    }
}
