//! In-process IAM used for local runs and tests.
//!
//! # Purpose
//! Implements [`IamClient`] over in-memory state and records recent calls in
//! order, so callers can assert on the exact sequence of catalog mutations.
//! Only the last [`MAX_RECORDED_CALLS`] calls are kept.
//!
//! # Behavior
//! - The catalog enforces IAM's references: a selection needs its chain types,
//!   an action needs its related selections, and a referenced entry (or an
//!   action with live policies) cannot be deleted.
//! - Decisions come from explicit grants; see [`InMemoryIam::grant`].
//! - [`InMemoryIam::fail_on`] makes a named call fail, for error-path tests.
use super::{
    AuthorizeBatchRequest, Decision, IamClient, IamError, IamResult, ListPoliciesQuery,
    PolicyPage, PolicyRecord, SystemInfo, SystemQueryField, SystemSnapshot,
};
use async_trait::async_trait;
use cmdb_authz::{
    ActionGroup, InstanceSelectionEntry, RegisteredCatalog, ResourceActionEntry,
    ResourceTypeEntry,
};
use std::collections::{HashMap, HashSet, VecDeque};
use tokio::sync::RwLock;

/// One recorded call, with the ids it touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IamCall {
    RegisterSystem,
    GetSystemInfo,
    RegisterResourceTypes(Vec<String>),
    UpdateResourceType(String),
    DeleteResourceTypes(Vec<String>),
    RegisterInstanceSelections(Vec<String>),
    UpdateInstanceSelection(String),
    DeleteInstanceSelections(Vec<String>),
    RegisterActions(Vec<String>),
    UpdateAction(String),
    DeleteActions(Vec<String>),
    DeleteActionPolicies(String),
    RegisterActionGroups,
    UpdateActionGroups,
    AuthorizeBatch { items: usize, exact: bool },
    ListPolicies(String),
}

impl IamCall {
    pub fn name(&self) -> &'static str {
        match self {
            IamCall::RegisterSystem => "register_system",
            IamCall::GetSystemInfo => "get_system_info",
            IamCall::RegisterResourceTypes(_) => "register_resource_types",
            IamCall::UpdateResourceType(_) => "update_resource_type",
            IamCall::DeleteResourceTypes(_) => "delete_resource_types",
            IamCall::RegisterInstanceSelections(_) => "register_instance_selections",
            IamCall::UpdateInstanceSelection(_) => "update_instance_selection",
            IamCall::DeleteInstanceSelections(_) => "delete_instance_selections",
            IamCall::RegisterActions(_) => "register_actions",
            IamCall::UpdateAction(_) => "update_action",
            IamCall::DeleteActions(_) => "delete_actions",
            IamCall::DeleteActionPolicies(_) => "delete_action_policies",
            IamCall::RegisterActionGroups => "register_action_groups",
            IamCall::UpdateActionGroups => "update_action_groups",
            IamCall::AuthorizeBatch { .. } => "authorize_batch",
            IamCall::ListPolicies(_) => "list_policies",
        }
    }

    /// Whether the call changes IAM state.
    pub fn is_mutation(&self) -> bool {
        !matches!(
            self,
            IamCall::GetSystemInfo | IamCall::AuthorizeBatch { .. } | IamCall::ListPolicies(_)
        )
    }
}

/// Bound on the call log; older calls are dropped first.
pub const MAX_RECORDED_CALLS: usize = 256;

#[derive(Default)]
struct IamState {
    system: Option<SystemInfo>,
    catalog: RegisteredCatalog,
    policies: HashMap<String, Vec<PolicyRecord>>,
    /// `(user, action)` to granted resource ids; `None` grants every instance.
    grants: HashMap<(String, String), Option<HashSet<String>>>,
    calls: VecDeque<IamCall>,
    failing: HashSet<&'static str>,
}

impl IamState {
    fn record(&mut self, call: IamCall) -> IamResult<()> {
        let name = call.name();
        if self.calls.len() == MAX_RECORDED_CALLS {
            self.calls.pop_front();
        }
        self.calls.push_back(call);
        if self.failing.contains(name) {
            return Err(IamError::Api {
                code: 1_902_500,
                message: format!("{name} failed"),
                request_id: "memory".to_string(),
            });
        }
        Ok(())
    }

    fn has_type(&self, id: &str) -> bool {
        self.catalog.resource_types.iter().any(|entry| entry.id == id)
    }

    fn has_selection(&self, id: &str) -> bool {
        self.catalog
            .instance_selections
            .iter()
            .any(|entry| entry.id == id)
    }
}

fn conflict(message: String) -> IamError {
    IamError::Api {
        code: 1_902_409,
        message,
        request_id: "memory".to_string(),
    }
}

fn ids<T>(entries: &[T], id_of: impl Fn(&T) -> &str) -> Vec<String> {
    entries.iter().map(|entry| id_of(entry).to_string()).collect()
}

#[derive(Default)]
pub struct InMemoryIam {
    state: RwLock<IamState>,
}

impl InMemoryIam {
    pub fn new() -> Self {
        Self::default()
    }

    /// An IAM that already knows the CMDB system.
    pub fn registered(system: SystemInfo) -> Self {
        let state = IamState {
            system: Some(system),
            ..IamState::default()
        };
        Self {
            state: RwLock::new(state),
        }
    }

    pub async fn grant(&self, user: &str, action: &str, resource_ids: Option<Vec<String>>) {
        self.state.write().await.grants.insert(
            (user.to_string(), action.to_string()),
            resource_ids.map(|ids| ids.into_iter().collect()),
        );
    }

    pub async fn add_policy(&self, action_id: &str, policy: PolicyRecord) {
        self.state
            .write()
            .await
            .policies
            .entry(action_id.to_string())
            .or_default()
            .push(policy);
    }

    pub async fn set_catalog(&self, catalog: RegisteredCatalog) {
        self.state.write().await.catalog = catalog;
    }

    pub async fn catalog(&self) -> RegisteredCatalog {
        self.state.read().await.catalog.clone()
    }

    pub async fn system(&self) -> Option<SystemInfo> {
        self.state.read().await.system.clone()
    }

    pub async fn calls(&self) -> Vec<IamCall> {
        self.state.read().await.calls.iter().cloned().collect()
    }

    pub async fn clear_calls(&self) {
        self.state.write().await.calls.clear();
    }

    pub async fn fail_on(&self, call_name: &'static str) {
        self.state.write().await.failing.insert(call_name);
    }
}

#[async_trait]
impl IamClient for InMemoryIam {
    async fn register_system(&self, system: &SystemInfo) -> IamResult<()> {
        let mut state = self.state.write().await;
        state.record(IamCall::RegisterSystem)?;
        if state.system.is_some() {
            return Err(conflict(format!("system {} already exists", system.id)));
        }
        state.system = Some(system.clone());
        Ok(())
    }

    async fn get_system_info(&self, fields: &[SystemQueryField]) -> IamResult<SystemSnapshot> {
        let mut state = self.state.write().await;
        state.record(IamCall::GetSystemInfo)?;
        let Some(system) = state.system.clone() else {
            return Err(IamError::NotFound("system not registered".to_string()));
        };
        let mut catalog = RegisteredCatalog::default();
        for field in fields {
            match field {
                SystemQueryField::ResourceTypes => {
                    catalog.resource_types = state.catalog.resource_types.clone();
                }
                SystemQueryField::Actions => catalog.actions = state.catalog.actions.clone(),
                SystemQueryField::ActionGroups => {
                    catalog.action_groups = state.catalog.action_groups.clone();
                }
                SystemQueryField::InstanceSelections => {
                    catalog.instance_selections = state.catalog.instance_selections.clone();
                }
            }
        }
        Ok(SystemSnapshot {
            base_info: Some(system),
            catalog,
        })
    }

    async fn register_resource_types(&self, entries: &[ResourceTypeEntry]) -> IamResult<()> {
        let mut state = self.state.write().await;
        state.record(IamCall::RegisterResourceTypes(ids(entries, |e| e.id.as_str())))?;
        if let Some(existing) = entries.iter().find(|entry| state.has_type(&entry.id)) {
            return Err(conflict(format!("resource type {} exists", existing.id)));
        }
        state.catalog.resource_types.extend(entries.iter().cloned());
        Ok(())
    }

    async fn update_resource_type(&self, entry: &ResourceTypeEntry) -> IamResult<()> {
        let mut state = self.state.write().await;
        state.record(IamCall::UpdateResourceType(entry.id.clone()))?;
        let slot = state
            .catalog
            .resource_types
            .iter_mut()
            .find(|current| current.id == entry.id)
            .ok_or_else(|| IamError::NotFound(format!("resource type {}", entry.id)))?;
        *slot = entry.clone();
        Ok(())
    }

    async fn delete_resource_types(&self, ids: &[String]) -> IamResult<()> {
        let mut state = self.state.write().await;
        state.record(IamCall::DeleteResourceTypes(ids.to_vec()))?;
        let referenced = state.catalog.instance_selections.iter().find(|selection| {
            selection
                .resource_type_chain
                .iter()
                .any(|link| ids.contains(&link.id))
        });
        if let Some(selection) = referenced {
            return Err(conflict(format!(
                "resource type referenced by instance selection {}",
                selection.id
            )));
        }
        state
            .catalog
            .resource_types
            .retain(|entry| !ids.contains(&entry.id));
        Ok(())
    }

    async fn register_instance_selections(
        &self,
        entries: &[InstanceSelectionEntry],
    ) -> IamResult<()> {
        let mut state = self.state.write().await;
        state.record(IamCall::RegisterInstanceSelections(ids(entries, |e| e.id.as_str())))?;
        for entry in entries {
            if state.has_selection(&entry.id) {
                return Err(conflict(format!("instance selection {} exists", entry.id)));
            }
            if let Some(missing) = entry
                .resource_type_chain
                .iter()
                .find(|link| !state.has_type(&link.id))
            {
                return Err(conflict(format!("resource type {} not registered", missing.id)));
            }
        }
        state.catalog.instance_selections.extend(entries.iter().cloned());
        Ok(())
    }

    async fn update_instance_selection(&self, entry: &InstanceSelectionEntry) -> IamResult<()> {
        let mut state = self.state.write().await;
        state.record(IamCall::UpdateInstanceSelection(entry.id.clone()))?;
        let slot = state
            .catalog
            .instance_selections
            .iter_mut()
            .find(|current| current.id == entry.id)
            .ok_or_else(|| IamError::NotFound(format!("instance selection {}", entry.id)))?;
        *slot = entry.clone();
        Ok(())
    }

    async fn delete_instance_selections(&self, ids: &[String]) -> IamResult<()> {
        let mut state = self.state.write().await;
        state.record(IamCall::DeleteInstanceSelections(ids.to_vec()))?;
        let referenced = state.catalog.actions.iter().find(|action| {
            action.related_resource_types.iter().any(|related| {
                related
                    .instance_selections
                    .iter()
                    .any(|selection| ids.contains(&selection.id))
            })
        });
        if let Some(action) = referenced {
            return Err(conflict(format!(
                "instance selection referenced by action {}",
                action.id
            )));
        }
        state
            .catalog
            .instance_selections
            .retain(|entry| !ids.contains(&entry.id));
        Ok(())
    }

    async fn register_actions(&self, entries: &[ResourceActionEntry]) -> IamResult<()> {
        let mut state = self.state.write().await;
        state.record(IamCall::RegisterActions(ids(entries, |e| e.id.as_str())))?;
        for entry in entries {
            if state.catalog.actions.iter().any(|action| action.id == entry.id) {
                return Err(conflict(format!("action {} exists", entry.id)));
            }
            for related in &entry.related_resource_types {
                if let Some(missing) = related
                    .instance_selections
                    .iter()
                    .find(|selection| !state.has_selection(&selection.id))
                {
                    return Err(conflict(format!(
                        "instance selection {} not registered",
                        missing.id
                    )));
                }
            }
        }
        state.catalog.actions.extend(entries.iter().cloned());
        Ok(())
    }

    async fn update_action(&self, entry: &ResourceActionEntry) -> IamResult<()> {
        let mut state = self.state.write().await;
        state.record(IamCall::UpdateAction(entry.id.clone()))?;
        let slot = state
            .catalog
            .actions
            .iter_mut()
            .find(|current| current.id == entry.id)
            .ok_or_else(|| IamError::NotFound(format!("action {}", entry.id)))?;
        *slot = entry.clone();
        Ok(())
    }

    async fn delete_actions(&self, ids: &[String]) -> IamResult<()> {
        let mut state = self.state.write().await;
        state.record(IamCall::DeleteActions(ids.to_vec()))?;
        if let Some(bound) = ids
            .iter()
            .find(|id| state.policies.get(*id).is_some_and(|policies| !policies.is_empty()))
        {
            return Err(conflict(format!("action {bound} still has policies")));
        }
        state.catalog.actions.retain(|entry| !ids.contains(&entry.id));
        Ok(())
    }

    async fn delete_action_policies(&self, action_id: &str) -> IamResult<()> {
        let mut state = self.state.write().await;
        state.record(IamCall::DeleteActionPolicies(action_id.to_string()))?;
        state.policies.remove(action_id);
        state
            .grants
            .retain(|(_, action), _| action.as_str() != action_id);
        Ok(())
    }

    async fn register_action_groups(&self, groups: &[ActionGroup]) -> IamResult<()> {
        let mut state = self.state.write().await;
        state.record(IamCall::RegisterActionGroups)?;
        if !state.catalog.action_groups.is_empty() {
            return Err(conflict("action groups already registered".to_string()));
        }
        state.catalog.action_groups = groups.to_vec();
        Ok(())
    }

    async fn update_action_groups(&self, groups: &[ActionGroup]) -> IamResult<()> {
        let mut state = self.state.write().await;
        state.record(IamCall::UpdateActionGroups)?;
        state.catalog.action_groups = groups.to_vec();
        Ok(())
    }

    async fn authorize_batch(
        &self,
        request: &AuthorizeBatchRequest,
        exact: bool,
    ) -> IamResult<Vec<Decision>> {
        let mut state = self.state.write().await;
        state.record(IamCall::AuthorizeBatch {
            items: request.batch.len(),
            exact,
        })?;
        let decisions = request
            .batch
            .iter()
            .map(|item| {
                let key = (request.subject.id.clone(), item.action.id.clone());
                let authorized = match state.grants.get(&key) {
                    None => false,
                    Some(None) => true,
                    Some(Some(_)) if !exact => true,
                    Some(Some(granted)) => item
                        .resources
                        .iter()
                        .all(|resource| resource.id.is_empty() || granted.contains(&resource.id)),
                };
                Decision { authorized }
            })
            .collect();
        Ok(decisions)
    }

    async fn list_policies(&self, query: &ListPoliciesQuery) -> IamResult<PolicyPage> {
        let mut state = self.state.write().await;
        state.record(IamCall::ListPolicies(query.action_id.clone()))?;
        let policies = state
            .policies
            .get(&query.action_id)
            .cloned()
            .unwrap_or_default();
        let count = policies.len() as u64;
        let results = if query.page_size == 0 {
            policies
        } else {
            let page = query.page.max(1);
            policies
                .into_iter()
                .skip(((page - 1) * query.page_size) as usize)
                .take(query.page_size as usize)
                .collect()
        };
        Ok(PolicyPage { count, results })
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iam::{ActionId, AuthorizeItem, Subject};
    use cmdb_authz::{ModelObject, desired_catalog};

    fn system() -> SystemInfo {
        SystemInfo::cmdb("bk_cmdb", "http://127.0.0.1:9990")
    }

    #[tokio::test]
    async fn unregistered_system_is_not_found() {
        let iam = InMemoryIam::new();
        let err = iam.get_system_info(&[]).await.expect_err("not found");
        assert!(matches!(err, IamError::NotFound(_)));
        iam.register_system(&system()).await.expect("register");
        assert!(iam.get_system_info(&[]).await.is_ok());
    }

    #[tokio::test]
    async fn enforces_catalog_references() {
        let iam = InMemoryIam::registered(system());
        let model = ModelObject {
            id: 1,
            bk_obj_id: "switch".to_string(),
            bk_obj_name: "Switch".to_string(),
        };
        let catalog = desired_catalog("bk_cmdb", &[model]).expect("catalog");

        assert!(iam.register_actions(&catalog.actions).await.is_err());
        assert!(
            iam.register_instance_selections(&catalog.instance_selections)
                .await
                .is_err()
        );

        iam.register_resource_types(&catalog.resource_types).await.expect("types");
        iam.register_instance_selections(&catalog.instance_selections)
            .await
            .expect("selections");
        iam.register_actions(&catalog.actions).await.expect("actions");

        let type_ids = vec!["comobj_1".to_string()];
        assert!(iam.delete_resource_types(&type_ids).await.is_err());
        assert!(iam.delete_instance_selections(&type_ids).await.is_err());
    }

    #[tokio::test]
    async fn actions_with_policies_need_policy_deletion_first() {
        let iam = InMemoryIam::registered(system());
        iam.add_policy(
            "edit_comobj_1",
            PolicyRecord {
                id: 1,
                subject: Subject::user("admin"),
                expression: serde_json::json!({"op": "any", "field": "comobj_1.id", "value": []}),
                expired_at: 0,
            },
        )
        .await;
        let action_ids = vec!["edit_comobj_1".to_string()];
        assert!(iam.delete_actions(&action_ids).await.is_err());
        iam.delete_action_policies("edit_comobj_1").await.expect("policies");
        iam.delete_actions(&action_ids).await.expect("delete");
    }

    #[tokio::test]
    async fn decisions_follow_grants() {
        let iam = InMemoryIam::registered(system());
        iam.grant("alice", "edit_business", Some(vec!["3".to_string()])).await;
        iam.grant("alice", "find_business", None).await;

        let resource = |id: &str| cmdb_authz::IamResource {
            system: "bk_cmdb".to_string(),
            resource_type: cmdb_authz::IamResourceType::Business,
            id: id.to_string(),
            attribute: Default::default(),
        };
        let request = AuthorizeBatchRequest {
            system: "bk_cmdb".to_string(),
            subject: Subject::user("alice"),
            batch: vec![
                AuthorizeItem {
                    action: ActionId { id: "edit_business".to_string() },
                    resources: vec![resource("3")],
                },
                AuthorizeItem {
                    action: ActionId { id: "edit_business".to_string() },
                    resources: vec![resource("4")],
                },
                AuthorizeItem {
                    action: ActionId { id: "find_business".to_string() },
                    resources: vec![resource("9")],
                },
                AuthorizeItem {
                    action: ActionId { id: "archive_business".to_string() },
                    resources: vec![resource("3")],
                },
            ],
        };

        let exact = iam.authorize_batch(&request, true).await.expect("exact");
        let flags: Vec<bool> = exact.iter().map(|d| d.authorized).collect();
        assert_eq!(flags, vec![true, false, true, false]);

        let any = iam.authorize_batch(&request, false).await.expect("any");
        assert!(any[1].authorized);
    }

    #[tokio::test]
    async fn failing_calls_are_still_recorded() {
        let iam = InMemoryIam::registered(system());
        iam.fail_on("update_action_groups").await;
        assert!(iam.update_action_groups(&[]).await.is_err());
        assert_eq!(iam.calls().await, vec![IamCall::UpdateActionGroups]);
        assert!(iam.calls().await[0].is_mutation());
    }

    #[tokio::test]
    async fn call_log_keeps_only_recent_calls() {
        let iam = InMemoryIam::registered(system());
        let request = AuthorizeBatchRequest {
            system: "bk_cmdb".to_string(),
            subject: Subject::user("alice"),
            batch: Vec::new(),
        };
        for _ in 0..MAX_RECORDED_CALLS + 10 {
            iam.authorize_batch(&request, true).await.expect("decisions");
        }
        iam.get_system_info(&[]).await.expect("system");

        let calls = iam.calls().await;
        assert_eq!(calls.len(), MAX_RECORDED_CALLS);
        assert_eq!(calls.last(), Some(&IamCall::GetSystemInfo));
    }
}
