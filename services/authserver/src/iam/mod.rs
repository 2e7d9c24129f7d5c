//! IAM client capability.
//!
//! # Purpose and responsibility
//! Defines what the auth server needs from IAM: system registration, catalog
//! maintenance, batch decisions and policy listing. Two implementations exist:
//! [`http::HttpIamClient`] talks to a real IAM deployment and
//! [`memory::InMemoryIam`] keeps everything in process for local runs and tests.
//!
//! # Key invariants and assumptions
//! - IAM answers `{code, message, data}`; a non-zero code is an error and the
//!   "not found" code maps to [`IamError::NotFound`].
//! - No retries happen here. Callers see transport errors as they occur.
use async_trait::async_trait;
use cmdb_authz::{
    ActionGroup, IamResource, InstanceSelectionEntry, RegisteredCatalog, ResourceActionEntry,
    ResourceTypeEntry,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use utoipa::ToSchema;

pub mod http;
pub mod memory;

/// IAM code for a missing system or entity.
pub const IAM_NOT_FOUND_CODE: i64 = 1_901_404;

#[derive(Debug, Error)]
pub enum IamError {
    #[error("iam entity not found: {0}")]
    NotFound(String),
    #[error("iam request {request_id} failed with code {code}: {message}")]
    Api {
        code: i64,
        message: String,
        request_id: String,
    },
    #[error("iam transport error")]
    Transport(#[from] reqwest::Error),
    #[error("decode iam response: {0}")]
    Decode(String),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

pub type IamResult<T> = Result<T, IamError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SystemProviderConfig {
    pub host: String,
    #[serde(default)]
    pub auth: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SystemInfo {
    pub id: String,
    pub name: String,
    pub name_en: String,
    pub clients: String,
    pub provider_config: SystemProviderConfig,
}

impl SystemInfo {
    pub fn cmdb(system_id: &str, host: &str) -> Self {
        Self {
            id: system_id.to_string(),
            name: "配置平台".to_string(),
            name_en: "CMDB".to_string(),
            clients: system_id.to_string(),
            provider_config: SystemProviderConfig {
                host: host.to_string(),
                auth: "basic".to_string(),
            },
        }
    }
}

/// Catalog sections that can be requested from the system query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemQueryField {
    ResourceTypes,
    Actions,
    ActionGroups,
    InstanceSelections,
}

impl SystemQueryField {
    pub const CATALOG: [SystemQueryField; 4] = [
        SystemQueryField::ResourceTypes,
        SystemQueryField::Actions,
        SystemQueryField::ActionGroups,
        SystemQueryField::InstanceSelections,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SystemQueryField::ResourceTypes => "resource_types",
            SystemQueryField::Actions => "actions",
            SystemQueryField::ActionGroups => "action_groups",
            SystemQueryField::InstanceSelections => "instance_selections",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemSnapshot {
    #[serde(default)]
    pub base_info: Option<SystemInfo>,
    #[serde(flatten)]
    pub catalog: RegisteredCatalog,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Subject {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
}

impl Subject {
    pub fn user(id: impl Into<String>) -> Self {
        Self {
            kind: "user".to_string(),
            id: id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionId {
    pub id: String,
}

/// One check in a batch: an action and the resources it applies to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizeItem {
    pub action: ActionId,
    pub resources: Vec<IamResource>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizeBatchRequest {
    pub system: String,
    pub subject: Subject,
    pub batch: Vec<AuthorizeItem>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Decision {
    pub authorized: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListPoliciesQuery {
    pub action_id: String,
    pub page: u64,
    pub page_size: u64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PolicyRecord {
    pub id: i64,
    pub subject: Subject,
    /// Policy expression in IAM wire form.
    #[schema(value_type = Object)]
    pub expression: Value,
    #[serde(default)]
    pub expired_at: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PolicyPage {
    pub count: u64,
    pub results: Vec<PolicyRecord>,
}

#[async_trait]
pub trait IamClient: Send + Sync {
    async fn register_system(&self, system: &SystemInfo) -> IamResult<()>;
    /// Returns [`IamError::NotFound`] when the system is not registered.
    async fn get_system_info(&self, fields: &[SystemQueryField]) -> IamResult<SystemSnapshot>;

    async fn register_resource_types(&self, entries: &[ResourceTypeEntry]) -> IamResult<()>;
    async fn update_resource_type(&self, entry: &ResourceTypeEntry) -> IamResult<()>;
    async fn delete_resource_types(&self, ids: &[String]) -> IamResult<()>;

    async fn register_instance_selections(
        &self,
        entries: &[InstanceSelectionEntry],
    ) -> IamResult<()>;
    async fn update_instance_selection(&self, entry: &InstanceSelectionEntry) -> IamResult<()>;
    async fn delete_instance_selections(&self, ids: &[String]) -> IamResult<()>;

    async fn register_actions(&self, entries: &[ResourceActionEntry]) -> IamResult<()>;
    async fn update_action(&self, entry: &ResourceActionEntry) -> IamResult<()>;
    async fn delete_actions(&self, ids: &[String]) -> IamResult<()>;
    /// Drops every policy bound to `action_id`; required before deleting the action.
    async fn delete_action_policies(&self, action_id: &str) -> IamResult<()>;

    async fn register_action_groups(&self, groups: &[ActionGroup]) -> IamResult<()>;
    async fn update_action_groups(&self, groups: &[ActionGroup]) -> IamResult<()>;

    /// One decision per batch item, in order. `exact` requires every listed
    /// resource to be allowed; otherwise any grant for the action suffices.
    async fn authorize_batch(
        &self,
        request: &AuthorizeBatchRequest,
        exact: bool,
    ) -> IamResult<Vec<Decision>>;

    async fn list_policies(&self, query: &ListPoliciesQuery) -> IamResult<PolicyPage>;

    fn backend_name(&self) -> &'static str;
}
