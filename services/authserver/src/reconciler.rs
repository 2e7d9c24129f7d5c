//! Keeps IAM's registered catalog in step with CMDB models.
//!
//! # Purpose and responsibility
//! Derives the per-model resource types, instance selections and actions from
//! the current model set, diffs them against what IAM reports and applies the
//! difference. Also registers the CMDB system itself and removes explicitly
//! named catalog entries.
//!
//! # Where it fits
//! Triggered at startup, by the periodic loop started in `main` and by the
//! sync endpoint. All triggers share one [`CatalogReconciler`] so its lock
//! covers every writer in the process.
//!
//! # Key invariants and assumptions
//! - Deletions run actions, then instance selections, then resource types.
//!   Policies bound to an action are deleted before the action.
//! - Creations run resource types, then instance selections, then actions.
//! - Action groups are replaced last and only when actions were added or removed.
//! - Only per-model entries are ever removed by a pass.
//! - A failing step aborts the pass without rollback; the next pass starts
//!   from a fresh diff.
//! - At most one pass runs at a time.
use crate::iam::{IamClient, IamError, SystemInfo, SystemQueryField};
use crate::model::{ModelCache, list_models};
use crate::store::{ResourceStore, StoreError};
use cmdb_authz::{
    ActionGroup, AuthzError, CatalogDiff, CatalogRemoval, RegisteredCatalog,
    desired_action_groups, desired_catalog, is_dynamic_id, prune_action_groups,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use utoipa::ToSchema;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("read models: {0}")]
    Store(#[from] StoreError),
    #[error("build catalog: {0}")]
    Catalog(#[from] AuthzError),
    #[error(transparent)]
    Iam(#[from] IamError),
}

pub type ReconcileResult<T> = Result<T, ReconcileError>;

/// Mutations applied by one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ReconcileSummary {
    pub models: usize,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub action_groups_published: bool,
}

impl ReconcileSummary {
    pub fn mutations(&self) -> usize {
        self.created + self.updated + self.deleted + usize::from(self.action_groups_published)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Applied(ReconcileSummary),
    /// Another pass held the lock.
    Skipped,
}

fn record_mutation(kind: &'static str, count: usize) {
    metrics::counter!("cmdb_auth_catalog_mutations_total", "kind" => kind).increment(count as u64);
}

pub struct CatalogReconciler {
    system_id: String,
    iam: Arc<dyn IamClient>,
    store: Arc<dyn ResourceStore>,
    models: Arc<ModelCache>,
    running: Mutex<()>,
}

impl CatalogReconciler {
    pub fn new(
        system_id: impl Into<String>,
        iam: Arc<dyn IamClient>,
        store: Arc<dyn ResourceStore>,
        models: Arc<ModelCache>,
    ) -> Self {
        Self {
            system_id: system_id.into(),
            iam,
            store,
            models,
            running: Mutex::new(()),
        }
    }

    /// Register the CMDB system with IAM unless it already exists.
    ///
    /// Returns whether a registration happened.
    pub async fn register_to_iam(&self, host: &str) -> ReconcileResult<bool> {
        match self.iam.get_system_info(&[]).await {
            Ok(_) => Ok(false),
            Err(IamError::NotFound(_)) => {
                self.iam
                    .register_system(&SystemInfo::cmdb(&self.system_id, host))
                    .await?;
                tracing::info!(system_id = %self.system_id, host, "registered system with iam");
                Ok(true)
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn is_registered_to_iam(&self) -> ReconcileResult<bool> {
        match self.iam.get_system_info(&[]).await {
            Ok(_) => Ok(true),
            Err(IamError::NotFound(_)) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Run a pass, waiting for any pass in flight to finish first.
    pub async fn reconcile(&self) -> ReconcileResult<ReconcileSummary> {
        let _running = self.running.lock().await;
        self.run_pass().await
    }

    /// Run a pass unless one is already in flight.
    pub async fn try_reconcile(&self) -> ReconcileResult<ReconcileOutcome> {
        let Ok(_running) = self.running.try_lock() else {
            metrics::counter!("cmdb_auth_reconcile_runs_total", "outcome" => "skipped")
                .increment(1);
            tracing::debug!("reconcile already running, skipping");
            return Ok(ReconcileOutcome::Skipped);
        };
        self.run_pass().await.map(ReconcileOutcome::Applied)
    }

    async fn run_pass(&self) -> ReconcileResult<ReconcileSummary> {
        let result = self.apply_models().await;
        let outcome = if result.is_ok() { "applied" } else { "failed" };
        metrics::counter!("cmdb_auth_reconcile_runs_total", "outcome" => outcome).increment(1);
        result
    }

    async fn apply_models(&self) -> ReconcileResult<ReconcileSummary> {
        let models = list_models(self.store.as_ref()).await?;
        let desired = desired_catalog(&self.system_id, &models)?;
        let registered = self
            .iam
            .get_system_info(&SystemQueryField::CATALOG)
            .await?
            .catalog;
        let diff = CatalogDiff::compute(&desired, &registered);

        let mut summary = ReconcileSummary {
            models: models.len(),
            ..ReconcileSummary::default()
        };
        self.apply_removals(&diff, &mut summary).await?;
        self.apply_additions(&diff, &mut summary).await?;

        if diff.actions_changed() {
            let mut existing = static_actions(&registered);
            existing.extend(desired.action_ids().map(str::to_string));
            let groups = prune_action_groups(
                &desired_action_groups(&registered.action_groups, &models),
                &existing,
            );
            summary.action_groups_published = self
                .publish_action_groups(&registered.action_groups, &groups)
                .await?;
        }

        self.models.refresh(&models).await;
        if summary.mutations() > 0 {
            tracing::info!(
                models = summary.models,
                created = summary.created,
                updated = summary.updated,
                deleted = summary.deleted,
                action_groups = summary.action_groups_published,
                "iam catalog reconciled"
            );
        }
        Ok(summary)
    }

    /// Remove the named catalog entries that IAM actually reports.
    pub async fn delete_catalog_entries(
        &self,
        removal: &CatalogRemoval,
    ) -> ReconcileResult<ReconcileSummary> {
        let _running = self.running.lock().await;
        let registered = self
            .iam
            .get_system_info(&SystemQueryField::CATALOG)
            .await?
            .catalog;
        let diff = CatalogDiff::removal(removal, &registered);
        let mut summary = ReconcileSummary::default();
        self.apply_removals(&diff, &mut summary).await?;

        if !diff.removed_actions.is_empty() {
            let existing: HashSet<String> = registered
                .actions
                .iter()
                .map(|entry| entry.id.clone())
                .filter(|id| !diff.removed_actions.contains(id))
                .collect();
            let groups = prune_action_groups(&registered.action_groups, &existing);
            summary.action_groups_published = self
                .publish_action_groups(&registered.action_groups, &groups)
                .await?;
        }
        tracing::info!(deleted = summary.deleted, "iam catalog entries removed");
        Ok(summary)
    }

    async fn apply_removals(
        &self,
        diff: &CatalogDiff,
        summary: &mut ReconcileSummary,
    ) -> ReconcileResult<()> {
        if !diff.removed_actions.is_empty() {
            for action_id in &diff.removed_actions {
                self.iam.delete_action_policies(action_id).await?;
            }
            self.iam.delete_actions(&diff.removed_actions).await?;
            record_mutation("delete_actions", diff.removed_actions.len());
            tracing::info!(ids = ?diff.removed_actions, "deleted iam actions");
            summary.deleted += diff.removed_actions.len();
        }
        if !diff.removed_instance_selections.is_empty() {
            self.iam
                .delete_instance_selections(&diff.removed_instance_selections)
                .await?;
            record_mutation(
                "delete_instance_selections",
                diff.removed_instance_selections.len(),
            );
            tracing::info!(ids = ?diff.removed_instance_selections, "deleted iam instance selections");
            summary.deleted += diff.removed_instance_selections.len();
        }
        if !diff.removed_resource_types.is_empty() {
            self.iam
                .delete_resource_types(&diff.removed_resource_types)
                .await?;
            record_mutation("delete_resource_types", diff.removed_resource_types.len());
            tracing::info!(ids = ?diff.removed_resource_types, "deleted iam resource types");
            summary.deleted += diff.removed_resource_types.len();
        }
        Ok(())
    }

    async fn apply_additions(
        &self,
        diff: &CatalogDiff,
        summary: &mut ReconcileSummary,
    ) -> ReconcileResult<()> {
        for entry in &diff.changed_resource_types {
            self.iam.update_resource_type(entry).await?;
        }
        if !diff.added_resource_types.is_empty() {
            self.iam
                .register_resource_types(&diff.added_resource_types)
                .await?;
            tracing::info!(count = diff.added_resource_types.len(), "registered iam resource types");
        }
        record_mutation("update_resource_types", diff.changed_resource_types.len());
        record_mutation("register_resource_types", diff.added_resource_types.len());

        for entry in &diff.changed_instance_selections {
            self.iam.update_instance_selection(entry).await?;
        }
        if !diff.added_instance_selections.is_empty() {
            self.iam
                .register_instance_selections(&diff.added_instance_selections)
                .await?;
            tracing::info!(
                count = diff.added_instance_selections.len(),
                "registered iam instance selections"
            );
        }
        record_mutation(
            "update_instance_selections",
            diff.changed_instance_selections.len(),
        );
        record_mutation(
            "register_instance_selections",
            diff.added_instance_selections.len(),
        );

        for entry in &diff.changed_actions {
            self.iam.update_action(entry).await?;
        }
        if !diff.added_actions.is_empty() {
            self.iam.register_actions(&diff.added_actions).await?;
            tracing::info!(count = diff.added_actions.len(), "registered iam actions");
        }
        record_mutation("update_actions", diff.changed_actions.len());
        record_mutation("register_actions", diff.added_actions.len());

        summary.created += diff.added_resource_types.len()
            + diff.added_instance_selections.len()
            + diff.added_actions.len();
        summary.updated += diff.changed_resource_types.len()
            + diff.changed_instance_selections.len()
            + diff.changed_actions.len();
        Ok(())
    }

    /// Replace IAM's action groups with `groups`; nothing is sent when empty.
    async fn publish_action_groups(
        &self,
        registered: &[ActionGroup],
        groups: &[ActionGroup],
    ) -> ReconcileResult<bool> {
        if groups.is_empty() {
            tracing::debug!("no action groups left to publish");
            return Ok(false);
        }
        if registered.is_empty() {
            self.iam.register_action_groups(groups).await?;
        } else {
            self.iam.update_action_groups(groups).await?;
        }
        record_mutation("action_groups", 1);
        Ok(true)
    }

    /// Reconcile every `interval` until the task is dropped.
    pub async fn run_periodic(self: Arc<Self>, interval: Duration) {
        let start = tokio::time::Instant::now() + interval;
        let mut ticker = tokio::time::interval_at(start, interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match self.try_reconcile().await {
                Ok(ReconcileOutcome::Applied(summary)) => {
                    tracing::debug!(mutations = summary.mutations(), "periodic reconcile done");
                }
                Ok(ReconcileOutcome::Skipped) => {}
                Err(err) => tracing::warn!(error = %err, "periodic reconcile failed"),
            }
        }
    }
}

/// Registered actions outside the per-model convention.
fn static_actions(registered: &RegisteredCatalog) -> HashSet<String> {
    registered
        .actions
        .iter()
        .filter(|entry| !is_dynamic_id(&entry.id))
        .map(|entry| entry.id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iam::PolicyRecord;
    use crate::iam::Subject;
    use crate::iam::memory::{IamCall, InMemoryIam};
    use crate::store::memory::InMemoryResourceStore;
    use cmdb_authz::{ActionRef, ModelObject, ResourceActionEntry};
    use serde_json::json;

    fn model(id: i64) -> ModelObject {
        ModelObject {
            id,
            bk_obj_id: format!("obj{id}"),
            bk_obj_name: format!("Object {id}"),
        }
    }

    fn store_with(ids: &[i64]) -> Arc<InMemoryResourceStore> {
        let rows: Vec<_> = ids
            .iter()
            .map(|id| json!({"id": id, "bk_obj_id": format!("obj{id}"), "bk_obj_name": format!("Object {id}")}))
            .collect();
        Arc::new(InMemoryResourceStore::from_seed(json!({ "cc_ObjDes": rows })).expect("seed"))
    }

    fn static_action() -> ResourceActionEntry {
        ResourceActionEntry {
            id: "edit_business".to_string(),
            name: "业务编辑".to_string(),
            name_en: "Edit Business".to_string(),
            action_type: "edit".to_string(),
            related_resource_types: Vec::new(),
            version: 1,
        }
    }

    /// IAM already holding the catalog of `ids` plus one static action.
    async fn iam_with(ids: &[i64]) -> Arc<InMemoryIam> {
        let iam = Arc::new(InMemoryIam::registered(SystemInfo::cmdb("bk_cmdb", "http://cmdb")));
        let models: Vec<ModelObject> = ids.iter().copied().map(model).collect();
        let desired = desired_catalog("bk_cmdb", &models).expect("catalog");
        let mut actions = vec![static_action()];
        actions.extend(desired.actions);
        let mut groups = vec![ActionGroup {
            name: "业务".to_string(),
            name_en: "Business".to_string(),
            sub_groups: Vec::new(),
            actions: vec![ActionRef {
                id: "edit_business".to_string(),
            }],
        }];
        groups = desired_action_groups(&groups, &models);
        iam.set_catalog(RegisteredCatalog {
            resource_types: desired.resource_types,
            instance_selections: desired.instance_selections,
            actions,
            action_groups: groups,
        })
        .await;
        iam
    }

    fn reconciler(iam: Arc<InMemoryIam>, store: Arc<InMemoryResourceStore>) -> CatalogReconciler {
        CatalogReconciler::new("bk_cmdb", iam, store, Arc::new(ModelCache::new()))
    }

    fn position(calls: &[IamCall], wanted: &IamCall) -> usize {
        calls
            .iter()
            .position(|call| call == wanted)
            .unwrap_or_else(|| panic!("missing call {wanted:?} in {calls:?}"))
    }

    #[tokio::test]
    async fn removal_precedes_creation_and_groups_come_last() {
        let iam = iam_with(&[1, 2, 3]).await;
        iam.add_policy(
            "edit_comobj_1",
            PolicyRecord {
                id: 11,
                subject: Subject::user("alice"),
                expression: json!({"op": "any", "field": "comobj_1.id", "value": []}),
                expired_at: 0,
            },
        )
        .await;
        iam.clear_calls().await;

        let summary = reconciler(iam.clone(), store_with(&[2, 3, 4]))
            .reconcile()
            .await
            .expect("reconcile");
        assert_eq!(summary.deleted, 5);
        assert_eq!(summary.created, 5);
        assert!(summary.action_groups_published);

        let calls = iam.calls().await;
        let removed_actions = vec![
            "create_comobj_1".to_string(),
            "delete_comobj_1".to_string(),
            "edit_comobj_1".to_string(),
        ];
        let policies = position(&calls, &IamCall::DeleteActionPolicies("edit_comobj_1".into()));
        let delete_actions = position(&calls, &IamCall::DeleteActions(removed_actions));
        let delete_selections = position(
            &calls,
            &IamCall::DeleteInstanceSelections(vec!["comobj_1".into()]),
        );
        let delete_types = position(&calls, &IamCall::DeleteResourceTypes(vec!["comobj_1".into()]));
        let register_types =
            position(&calls, &IamCall::RegisterResourceTypes(vec!["comobj_4".into()]));
        let register_selections = position(
            &calls,
            &IamCall::RegisterInstanceSelections(vec!["comobj_4".into()]),
        );
        let register_actions = calls
            .iter()
            .position(|call| matches!(call, IamCall::RegisterActions(_)))
            .expect("register actions");
        let groups = position(&calls, &IamCall::UpdateActionGroups);

        assert!(policies < delete_actions);
        assert!(delete_actions < delete_selections);
        assert!(delete_selections < delete_types);
        assert!(delete_types < register_types);
        assert!(register_types < register_selections);
        assert!(register_selections < register_actions);
        assert!(register_actions < groups);
        assert_eq!(groups, calls.len() - 1);

        let catalog = iam.catalog().await;
        assert!(catalog.actions.iter().any(|action| action.id == "edit_business"));
        assert!(catalog.actions.iter().all(|action| !action.id.ends_with("comobj_1")));
        let published = serde_json::to_string(&catalog.action_groups).expect("groups");
        assert!(published.contains("edit_comobj_4"));
        assert!(!published.contains("edit_comobj_1"));
        assert!(published.contains("edit_business"));
    }

    #[tokio::test]
    async fn second_pass_changes_nothing() {
        let iam = Arc::new(InMemoryIam::registered(SystemInfo::cmdb("bk_cmdb", "http://cmdb")));
        let reconciler = reconciler(iam.clone(), store_with(&[1, 2]));

        let first = reconciler.reconcile().await.expect("first");
        assert_eq!(first.created, 10);
        assert!(first.action_groups_published);
        assert!(iam.calls().await.contains(&IamCall::RegisterActionGroups));

        iam.clear_calls().await;
        let second = reconciler.reconcile().await.expect("second");
        assert_eq!(second.mutations(), 0);
        assert!(iam.calls().await.iter().all(|call| !call.is_mutation()));
    }

    #[tokio::test]
    async fn overlapping_pass_is_skipped() {
        let iam = Arc::new(InMemoryIam::registered(SystemInfo::cmdb("bk_cmdb", "http://cmdb")));
        let reconciler = reconciler(iam.clone(), store_with(&[1]));
        let held = reconciler.running.lock().await;
        let outcome = reconciler.try_reconcile().await.expect("outcome");
        assert_eq!(outcome, ReconcileOutcome::Skipped);
        assert!(iam.calls().await.is_empty());
        drop(held);

        let outcome = reconciler.try_reconcile().await.expect("outcome");
        assert!(matches!(outcome, ReconcileOutcome::Applied(_)));
    }

    #[tokio::test]
    async fn failing_step_aborts_the_pass() {
        let iam = iam_with(&[1]).await;
        iam.fail_on("delete_instance_selections").await;
        iam.clear_calls().await;

        let err = reconciler(iam.clone(), store_with(&[2]))
            .reconcile()
            .await
            .expect_err("aborted");
        assert!(matches!(err, ReconcileError::Iam(IamError::Api { .. })));
        let calls = iam.calls().await;
        assert_eq!(
            calls.last().map(IamCall::name),
            Some("delete_instance_selections")
        );
        assert!(
            calls
                .iter()
                .all(|call| !matches!(call, IamCall::RegisterResourceTypes(_)))
        );
    }

    #[tokio::test]
    async fn invalid_models_stop_before_iam() {
        let iam = Arc::new(InMemoryIam::registered(SystemInfo::cmdb("bk_cmdb", "http://cmdb")));
        let store = Arc::new(
            InMemoryResourceStore::from_seed(json!({
                "cc_ObjDes": [{"id": 0, "bk_obj_id": "broken", "bk_obj_name": "Broken"}]
            }))
            .expect("seed"),
        );
        let err = reconciler(iam.clone(), store)
            .reconcile()
            .await
            .expect_err("invalid model");
        assert!(matches!(err, ReconcileError::Catalog(_)));
        assert!(iam.calls().await.is_empty());
    }

    #[tokio::test]
    async fn named_entries_are_removed_in_order() {
        let iam = iam_with(&[1, 2]).await;
        iam.clear_calls().await;
        let removal = CatalogRemoval {
            action_ids: vec!["delete_comobj_2".to_string(), "unknown".to_string()],
            instance_selection_ids: Vec::new(),
            type_ids: Vec::new(),
        };
        let summary = reconciler(iam.clone(), store_with(&[1, 2]))
            .delete_catalog_entries(&removal)
            .await
            .expect("removed");
        assert_eq!(summary.deleted, 1);
        assert_eq!(
            iam.calls().await,
            vec![
                IamCall::GetSystemInfo,
                IamCall::DeleteActionPolicies("delete_comobj_2".to_string()),
                IamCall::DeleteActions(vec!["delete_comobj_2".to_string()]),
                IamCall::UpdateActionGroups,
            ]
        );
    }

    #[tokio::test]
    async fn registers_system_once() {
        let iam = Arc::new(InMemoryIam::new());
        let reconciler = reconciler(iam.clone(), store_with(&[]));
        assert!(!reconciler.is_registered_to_iam().await.expect("unregistered"));
        assert!(reconciler.register_to_iam("http://cmdb:9990").await.expect("register"));
        assert!(!reconciler.register_to_iam("http://cmdb:9990").await.expect("again"));
        let system = iam.system().await.expect("system");
        assert_eq!(system.provider_config.host, "http://cmdb:9990");
        assert!(reconciler.is_registered_to_iam().await.expect("registered"));
    }
}
