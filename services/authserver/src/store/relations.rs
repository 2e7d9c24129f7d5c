//! Host relation lookup backed by the resource store.
//!
//! Hosts do not carry their business/set/module ids inline, so host path
//! conditions are answered from the module-host relation collection.
use super::{Document, ResourceStore};
use async_trait::async_trait;
use cmdb_authz::{
    AuthzError, AuthzResult, HOST_ID_FIELD, HostRelationSource, MODULE_HOST_RELATION_COLLECTION,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct StoreHostRelations {
    store: Arc<dyn ResourceStore>,
}

impl StoreHostRelations {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl HostRelationSource for StoreHostRelations {
    async fn host_ids_matching(&self, condition: &Document) -> AuthzResult<Vec<i64>> {
        let values = self
            .store
            .distinct(MODULE_HOST_RELATION_COLLECTION, HOST_ID_FIELD, condition)
            .await
            .map_err(AuthzError::lookup)?;
        Ok(values.iter().filter_map(|value| value.as_i64()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryResourceStore;
    use cmdb_authz::{IamResourceType, Policy, PolicyCompiler, StorageCondition};
    use serde_json::json;

    fn relations() -> StoreHostRelations {
        let store = InMemoryResourceStore::from_seed(json!({
            "cc_ModuleHostConfig": [
                {"bk_host_id": 1, "bk_biz_id": 3, "bk_set_id": 10, "bk_module_id": 100},
                {"bk_host_id": 2, "bk_biz_id": 3, "bk_set_id": 11, "bk_module_id": 101},
                {"bk_host_id": 2, "bk_biz_id": 3, "bk_set_id": 11, "bk_module_id": 102},
                {"bk_host_id": 5, "bk_biz_id": 4, "bk_set_id": 12, "bk_module_id": 103}
            ]
        }))
        .expect("seed");
        StoreHostRelations::new(Arc::new(store))
    }

    #[tokio::test]
    async fn distinct_host_ids_for_business() {
        let condition = json!({"bk_biz_id": {"$eq": 3}});
        let ids = relations()
            .host_ids_matching(condition.as_object().expect("object"))
            .await
            .expect("ids");
        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn host_path_compiles_through_relations() {
        let relations = relations();
        let compiler = PolicyCompiler::new(&relations);
        let policy: Policy = serde_json::from_value(json!({
            "op": "eq",
            "field": "host._bk_iam_path_",
            "value": "/business,3/host,*/"
        }))
        .expect("policy");
        let condition = compiler
            .compile(&policy, IamResourceType::Host)
            .await
            .expect("compile");
        assert_eq!(
            condition,
            StorageCondition::Filter(
                json!({"bk_host_id": {"$in": [1, 2]}})
                    .as_object()
                    .cloned()
                    .expect("object")
            )
        );
    }

    #[tokio::test]
    async fn invalid_relation_condition_is_lookup_error() {
        let condition = json!({"$and": "oops"});
        let err = relations()
            .host_ids_matching(condition.as_object().expect("object"))
            .await
            .expect_err("invalid");
        assert!(!err.is_caller_error());
    }
}
