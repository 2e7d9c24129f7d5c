//! In-memory implementation of the resource store.
//!
//! # Purpose
//! Keeps CMDB collections as JSON documents in memory and evaluates storage
//! conditions against them. It backs local runs (seeded from a JSON file) and
//! every test that needs CMDB data.
//!
//! # Supported conditions
//! Top-level `$and`/`$or` arrays, bare equality, and per-field operator
//! objects using `$eq`, `$ne`, `$in`, `$nin`, `$lt`, `$lte`, `$gt`, `$gte`,
//! `$regex`, `$not` and `$exists`. An empty condition matches every document.
//! Array-valued fields match when any element matches, as in the document
//! store CMDB runs on.
//!
//! # Notes
//! - Not durable; state is lost on restart.
//! - Regexes are compiled per evaluation. Collections here are small.
use super::{Document, FindResult, Page, ResourceStore, StoreError, StoreResult};
use anyhow::Context;
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct InMemoryResourceStore {
    collections: Arc<RwLock<HashMap<String, Vec<Document>>>>,
}

impl InMemoryResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from `{"<collection>": [<document>, ...], ...}`.
    pub fn from_seed(seed: Value) -> anyhow::Result<Self> {
        let Value::Object(collections) = seed else {
            anyhow::bail!("seed must be an object of collections");
        };
        let mut loaded = HashMap::new();
        for (name, rows) in collections {
            let rows: Vec<Document> = serde_json::from_value(rows)
                .with_context(|| format!("parse seed collection {name}"))?;
            loaded.insert(name, rows);
        }
        Ok(Self {
            collections: Arc::new(RwLock::new(loaded)),
        })
    }

    pub fn load_seed(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("read seed file: {}", path.display()))?;
        let seed: Value = serde_json::from_str(&contents).with_context(|| "parse seed json")?;
        Self::from_seed(seed)
    }

    /// Remove documents matching `condition`, returning how many were removed.
    pub async fn remove(&self, collection: &str, condition: &Document) -> StoreResult<usize> {
        let mut collections = self.collections.write().await;
        let Some(rows) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let before = rows.len();
        let mut kept = Vec::with_capacity(before);
        for row in rows.drain(..) {
            if !matches(&row, condition)? {
                kept.push(row);
            }
        }
        *rows = kept;
        Ok(before - rows.len())
    }
}

/// Evaluate `condition` against one document.
pub(crate) fn matches(document: &Document, condition: &Document) -> StoreResult<bool> {
    for (key, expected) in condition {
        let matched = match key.as_str() {
            "$and" => {
                let mut all = true;
                for sub in sub_conditions(key, expected)? {
                    if !matches(document, sub)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => {
                let mut any = false;
                for sub in sub_conditions(key, expected)? {
                    if matches(document, sub)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            _ => field_matches(document.get(key), expected)?,
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

fn sub_conditions<'a>(key: &str, value: &'a Value) -> StoreResult<Vec<&'a Document>> {
    let items = value
        .as_array()
        .ok_or_else(|| StoreError::InvalidCondition(format!("{key} expects an array")))?;
    items
        .iter()
        .map(|item| {
            item.as_object()
                .ok_or_else(|| StoreError::InvalidCondition(format!("{key} expects objects")))
        })
        .collect()
}

fn field_matches(actual: Option<&Value>, expected: &Value) -> StoreResult<bool> {
    match expected {
        Value::Object(ops) if !ops.is_empty() && ops.keys().all(|key| key.starts_with('$')) => {
            for (op, operand) in ops {
                if !apply_operator(actual, op, operand)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        other => Ok(actual.is_some_and(|actual| values_equal(actual, other))),
    }
}

fn apply_operator(actual: Option<&Value>, op: &str, operand: &Value) -> StoreResult<bool> {
    match op {
        "$eq" => Ok(actual.is_some_and(|actual| values_equal(actual, operand))),
        "$ne" => Ok(!actual.is_some_and(|actual| values_equal(actual, operand))),
        "$in" | "$nin" => {
            let items = operand
                .as_array()
                .ok_or_else(|| StoreError::InvalidCondition(format!("{op} expects an array")))?;
            let found = actual
                .is_some_and(|actual| items.iter().any(|item| values_equal(actual, item)));
            Ok(if op == "$in" { found } else { !found })
        }
        "$lt" | "$lte" | "$gt" | "$gte" => {
            let Some(ordering) = actual.and_then(|actual| compare_values(actual, operand)) else {
                return Ok(false);
            };
            Ok(match op {
                "$lt" => ordering == Ordering::Less,
                "$lte" => ordering != Ordering::Greater,
                "$gt" => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            })
        }
        "$regex" => {
            let pattern = operand
                .as_str()
                .ok_or_else(|| StoreError::InvalidCondition("$regex expects a string".into()))?;
            let regex = Regex::new(pattern).map_err(|err| {
                StoreError::InvalidCondition(format!("regex {pattern:?}: {err}"))
            })?;
            Ok(actual.is_some_and(|actual| match actual {
                Value::String(text) => regex.is_match(text),
                Value::Array(items) => items
                    .iter()
                    .filter_map(Value::as_str)
                    .any(|text| regex.is_match(text)),
                _ => false,
            }))
        }
        "$not" => {
            let inner = operand
                .as_object()
                .ok_or_else(|| StoreError::InvalidCondition("$not expects an object".into()))?;
            for (inner_op, inner_operand) in inner {
                if !apply_operator(actual, inner_op, inner_operand)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        "$exists" => Ok(actual.is_some() == operand.as_bool().unwrap_or(true)),
        other => Err(StoreError::InvalidCondition(format!(
            "unsupported operator {other}"
        ))),
    }
}

fn values_equal(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Number(left), Value::Number(right)) => left.as_f64() == right.as_f64(),
        (Value::Array(items), other) if !other.is_array() => {
            items.iter().any(|item| values_equal(item, other))
        }
        (left, right) => left == right,
    }
}

fn compare_values(actual: &Value, operand: &Value) -> Option<Ordering> {
    match (actual, operand) {
        (Value::Number(left), Value::Number(right)) => left.as_f64()?.partial_cmp(&right.as_f64()?),
        (Value::String(left), Value::String(right)) => Some(left.cmp(right)),
        _ => None,
    }
}

fn project(row: &Document, fields: &[String]) -> Document {
    if fields.is_empty() {
        return row.clone();
    }
    row.iter()
        .filter(|(key, _)| fields.iter().any(|field| field == *key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

#[async_trait]
impl ResourceStore for InMemoryResourceStore {
    async fn find(
        &self,
        collection: &str,
        condition: &Document,
        fields: &[String],
        page: Page,
    ) -> StoreResult<FindResult> {
        metrics::counter!("cmdb_auth_store_queries_total", "collection" => collection.to_string())
            .increment(1);
        let collections = self.collections.read().await;
        let Some(rows) = collections.get(collection) else {
            return Ok(FindResult::default());
        };

        let mut matched = Vec::new();
        for row in rows {
            if matches(row, condition)? {
                matched.push(row);
            }
        }

        let count = matched.len() as u64;
        let limit = if page.limit == 0 {
            usize::MAX
        } else {
            page.limit as usize
        };
        let rows = matched
            .into_iter()
            .skip(page.offset as usize)
            .take(limit)
            .map(|row| project(row, fields))
            .collect();
        Ok(FindResult { count, rows })
    }

    async fn distinct(
        &self,
        collection: &str,
        field: &str,
        condition: &Document,
    ) -> StoreResult<Vec<Value>> {
        let collections = self.collections.read().await;
        let Some(rows) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        let mut values: Vec<Value> = Vec::new();
        for row in rows {
            if !matches(row, condition)? {
                continue;
            }
            match row.get(field) {
                None | Some(Value::Null) => {}
                Some(value) => {
                    if !values.contains(value) {
                        values.push(value.clone());
                    }
                }
            }
        }
        Ok(values)
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
