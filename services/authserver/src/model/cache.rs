//! Model id to object id cache.
//!
//! # Purpose and responsibility
//! Per-model IAM types are keyed by the numeric model id (`comobj_<id>`) while
//! CMDB stores instances and attributes by object id (`bk_obj_id`). The cache
//! answers that translation without a store round trip on every pull request.
//!
//! # Key invariants and assumptions
//! - Lookups take the read lock; misses read the model collection and insert
//!   under the write lock.
//! - A refresh replaces the whole mapping with the models just synced, so
//!   deleted models disappear.
//! - The cache is owned by the service state; there is no process-wide instance.
use crate::store::{Document, Page, ResourceStore, StoreError, StoreResult};
use anyhow::Context;
use cmdb_authz::{MODEL_COLLECTION, ModelObject, OBJECT_ID_FIELD};
use serde_json::{Value, json};
use std::collections::HashMap;
use tokio::sync::RwLock;

const PRESET_FIELD: &str = "ispre";

fn model_fields() -> Vec<String> {
    vec![
        "id".to_string(),
        OBJECT_ID_FIELD.to_string(),
        "bk_obj_name".to_string(),
    ]
}

fn parse_model(row: Document) -> StoreResult<ModelObject> {
    serde_json::from_value(Value::Object(row))
        .context("decode model document")
        .map_err(StoreError::from)
}

/// Custom (non-preset) models, in store order.
pub async fn list_models(store: &dyn ResourceStore) -> StoreResult<Vec<ModelObject>> {
    let mut condition = Document::new();
    condition.insert(PRESET_FIELD.to_string(), json!({ "$ne": true }));
    let found = store
        .find(MODEL_COLLECTION, &condition, &model_fields(), Page::all())
        .await?;
    found.rows.into_iter().map(parse_model).collect()
}

#[derive(Default)]
pub struct ModelCache {
    entries: RwLock<HashMap<i64, String>>,
}

impl ModelCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Object id of `model_id`, reading through to the model collection on a miss.
    ///
    /// # Errors
    /// - [`StoreError::NotFound`] when no model has that id.
    pub async fn obj_id(&self, model_id: i64, store: &dyn ResourceStore) -> StoreResult<String> {
        if let Some(obj_id) = self.entries.read().await.get(&model_id) {
            return Ok(obj_id.clone());
        }

        let mut condition = Document::new();
        condition.insert("id".to_string(), Value::from(model_id));
        let found = store
            .find(
                MODEL_COLLECTION,
                &condition,
                &model_fields(),
                Page {
                    limit: 1,
                    offset: 0,
                },
            )
            .await?;
        let row = found
            .rows
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::NotFound(format!("model {model_id}")))?;
        let model = parse_model(row)?;

        let mut entries = self.entries.write().await;
        entries.insert(model_id, model.bk_obj_id.clone());
        metrics::gauge!("cmdb_auth_cached_models").set(entries.len() as f64);
        Ok(model.bk_obj_id)
    }

    pub async fn refresh(&self, models: &[ModelObject]) {
        let mut entries = self.entries.write().await;
        *entries = models
            .iter()
            .map(|model| (model.id, model.bk_obj_id.clone()))
            .collect();
        metrics::gauge!("cmdb_auth_cached_models").set(entries.len() as f64);
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryResourceStore;

    fn store() -> InMemoryResourceStore {
        InMemoryResourceStore::from_seed(json!({
            "cc_ObjDes": [
                {"id": 1, "bk_obj_id": "host", "bk_obj_name": "Host", "ispre": true},
                {"id": 7, "bk_obj_id": "switch", "bk_obj_name": "Switch", "ispre": false},
                {"id": 9, "bk_obj_id": "router", "bk_obj_name": "Router"}
            ]
        }))
        .expect("seed")
    }

    #[tokio::test]
    async fn list_models_skips_preset_models() {
        let models = list_models(&store()).await.expect("models");
        let ids: Vec<i64> = models.iter().map(|model| model.id).collect();
        assert_eq!(ids, vec![7, 9]);
        assert_eq!(models[0].bk_obj_name, "Switch");
    }

    #[tokio::test]
    async fn obj_id_reads_through_and_caches() {
        let store = store();
        let cache = ModelCache::new();
        assert!(cache.is_empty().await);

        assert_eq!(cache.obj_id(9, &store).await.expect("router"), "router");
        assert_eq!(cache.len().await, 1);

        store
            .remove("cc_ObjDes", &Document::new())
            .await
            .expect("clear models");
        assert_eq!(cache.obj_id(9, &store).await.expect("cached"), "router");
    }

    #[tokio::test]
    async fn obj_id_missing_model_is_not_found() {
        let cache = ModelCache::new();
        let err = cache.obj_id(404, &store()).await.expect_err("missing");
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn refresh_replaces_entries() {
        let cache = ModelCache::new();
        cache.obj_id(7, &store()).await.expect("switch");
        cache
            .refresh(&[ModelObject {
                id: 11,
                bk_obj_id: "rack".to_string(),
                bk_obj_name: "Rack".to_string(),
            }])
            .await;
        assert_eq!(cache.len().await, 1);
        let empty = InMemoryResourceStore::new();
        assert_eq!(cache.obj_id(11, &empty).await.expect("rack"), "rack");
        assert!(cache.obj_id(7, &empty).await.is_err());
    }
}
