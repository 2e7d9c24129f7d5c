//! HTTP API request/response types.
//!
//! # Purpose
//! Payload shapes for the auth server's REST surface and OpenAPI schema
//! generation. Pull-resource payloads live with the lister.
use crate::iam::Decision;
use crate::reconciler::ReconcileSummary;
use cmdb_authz::{CatalogRemoval, ResourceAttribute};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct ServiceInfo {
    pub system_id: String,
    pub api_version: String,
    pub auth_enabled: bool,
    pub iam_backend: String,
    pub store_backend: String,
    pub cached_models: usize,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct HealthStatus {
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub request_id: Option<String>,
}

/// `{code, message, data}` answer of the pull-resource protocol.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PullEnvelope {
    pub code: i64,
    pub message: String,
    #[schema(value_type = Object)]
    pub data: Value,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct AuthorizeBatchBody {
    pub user: String,
    #[schema(value_type = Vec<Object>)]
    pub resources: Vec<ResourceAttribute>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct AuthorizeBatchResponse {
    pub decisions: Vec<Decision>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct SyncResponse {
    /// `applied` or `skipped`.
    pub outcome: String,
    pub summary: Option<ReconcileSummary>,
}

#[derive(Debug, Default, Serialize, Deserialize, ToSchema, Clone)]
pub struct RegisterRequest {
    /// Provider host; defaults to the configured callback host.
    #[serde(default)]
    pub host: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct RegistrationStatus {
    pub registered: bool,
    /// Whether this call performed the registration.
    #[serde(default)]
    pub created: bool,
}

#[derive(Debug, Default, Serialize, Deserialize, ToSchema, Clone)]
pub struct CatalogRemovalRequest {
    #[serde(default)]
    pub action_ids: Vec<String>,
    #[serde(default)]
    pub instance_selection_ids: Vec<String>,
    #[serde(default)]
    pub type_ids: Vec<String>,
}

impl From<CatalogRemovalRequest> for CatalogRemoval {
    fn from(request: CatalogRemovalRequest) -> Self {
        CatalogRemoval {
            action_ids: request.action_ids,
            instance_selection_ids: request.instance_selection_ids,
            type_ids: request.type_ids,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize, ToSchema, Clone)]
pub struct PolicyListQuery {
    #[serde(default)]
    pub page: u64,
    #[serde(default)]
    pub page_size: u64,
    #[serde(default)]
    pub timestamp: i64,
}
