//! Compiled storage conditions.
//!
//! # Purpose
//! Carries the outcome of compiling a policy for one resource type and builds
//! the Mongo-style documents the resource store evaluates.
//!
//! # Invariants
//! - `Unconstrained` means the policy doesn't constrain this type; callers list
//!   nothing for it.
//! - `MatchAll` is the empty document and matches every instance.
//! - `Filter` always holds a non-empty document.
//! - [`StorageCondition::combine`] drops `Unconstrained` children and is
//!   `Unconstrained` itself when none remain.
use serde_json::{Map, Value};

/// Result of compiling a policy for one resource type.
///
/// The three states are distinct: `Unconstrained` means the policy says
/// nothing about the type, `MatchAll` means every instance matches, and
/// `Filter` is a concrete storage query that is never empty.
#[derive(Debug, Clone, PartialEq)]
pub enum StorageCondition {
    Unconstrained,
    MatchAll,
    Filter(Map<String, Value>),
}

impl StorageCondition {
    /// Wrap a document; an empty document matches everything.
    pub fn from_document(document: Map<String, Value>) -> Self {
        if document.is_empty() {
            StorageCondition::MatchAll
        } else {
            StorageCondition::Filter(document)
        }
    }

    /// Single-field condition `{field: {op: value}}`.
    pub fn field(field: &str, op: &str, value: Value) -> Self {
        let mut inner = Map::new();
        inner.insert(op.to_string(), value);
        let mut document = Map::new();
        document.insert(field.to_string(), Value::Object(inner));
        StorageCondition::Filter(document)
    }

    pub fn is_unconstrained(&self) -> bool {
        matches!(self, StorageCondition::Unconstrained)
    }

    /// Storage document for this condition; `None` when unconstrained.
    pub fn to_document(&self) -> Option<Map<String, Value>> {
        match self {
            StorageCondition::Unconstrained => None,
            StorageCondition::MatchAll => Some(Map::new()),
            StorageCondition::Filter(document) => Some(document.clone()),
        }
    }

    /// Combine children under `$and`/`$or`, dropping unconstrained ones.
    ///
    /// Returns `Unconstrained` when no child contributed anything.
    pub fn combine(combinator: &str, children: Vec<StorageCondition>) -> Self {
        let documents: Vec<Value> = children
            .into_iter()
            .filter_map(|child| child.to_document())
            .map(Value::Object)
            .collect();
        if documents.is_empty() {
            return StorageCondition::Unconstrained;
        }
        let mut document = Map::new();
        document.insert(combinator.to_string(), Value::Array(documents));
        StorageCondition::Filter(document)
    }

    /// Add `extra` under a top-level `$and` with this condition.
    ///
    /// An unconstrained condition stays unconstrained.
    pub fn and(self, extra: Map<String, Value>) -> Self {
        match self {
            StorageCondition::Unconstrained => StorageCondition::Unconstrained,
            StorageCondition::MatchAll => StorageCondition::from_document(extra),
            StorageCondition::Filter(document) if extra.is_empty() => {
                StorageCondition::Filter(document)
            }
            StorageCondition::Filter(document) => StorageCondition::combine(
                "$and",
                vec![
                    StorageCondition::Filter(document),
                    StorageCondition::Filter(extra),
                ],
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Map<String, Value> {
        value.as_object().cloned().expect("object")
    }

    #[test]
    fn combine_drops_unconstrained_children() {
        let combined = StorageCondition::combine(
            "$and",
            vec![
                StorageCondition::Unconstrained,
                StorageCondition::field("id", "$eq", json!(1)),
            ],
        );
        assert_eq!(
            combined,
            StorageCondition::Filter(doc(json!({"$and": [{"id": {"$eq": 1}}]})))
        );

        let empty = StorageCondition::combine(
            "$or",
            vec![StorageCondition::Unconstrained, StorageCondition::Unconstrained],
        );
        assert!(empty.is_unconstrained());
    }

    #[test]
    fn match_all_contributes_an_empty_document() {
        let combined = StorageCondition::combine("$or", vec![StorageCondition::MatchAll]);
        assert_eq!(combined, StorageCondition::Filter(doc(json!({"$or": [{}]}))));
    }

    #[test]
    fn and_merges_extra_constraints() {
        let extra = doc(json!({"default": {"$ne": 1}}));
        assert_eq!(
            StorageCondition::MatchAll.and(extra.clone()),
            StorageCondition::Filter(extra.clone())
        );
        assert!(StorageCondition::Unconstrained.and(extra.clone()).is_unconstrained());
        let filtered = StorageCondition::field("id", "$eq", json!(2)).and(extra);
        assert_eq!(
            filtered.to_document().map(Value::Object),
            Some(json!({"$and": [{"id": {"$eq": 2}}, {"default": {"$ne": 1}}]}))
        );
    }
}
