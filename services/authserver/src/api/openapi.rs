//! OpenAPI schema aggregation for the auth server API.
use crate::api::{
    authorize, catalog, policies, pull, system,
    types::{
        AuthorizeBatchBody, AuthorizeBatchResponse, CatalogRemovalRequest, ErrorResponse,
        HealthStatus, PullEnvelope, RegisterRequest, RegistrationStatus, ServiceInfo,
        SyncResponse,
    },
};
use crate::iam::{Decision, PolicyPage, PolicyRecord, Subject};
use crate::lister::{
    AttrResource, AttrValue, InstancePath, InstanceResource, ListAttrValueResult,
    ListInstanceResult, PullMethod, PullResourceRequest,
};
use crate::reconciler::ReconcileSummary;
use crate::store::Page;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "cmdb-authserver",
        version = "v1",
        description = "CMDB authorization bridge HTTP API"
    ),
    paths(
        system::system_info,
        system::system_health,
        pull::pull_resource,
        authorize::authorize_batch,
        authorize::authorize_any_batch,
        catalog::sync_catalog,
        catalog::register_system,
        catalog::registration_status,
        catalog::remove_catalog_entries,
        policies::list_action_policies
    ),
    components(schemas(
        ServiceInfo,
        HealthStatus,
        ErrorResponse,
        PullEnvelope,
        PullResourceRequest,
        PullMethod,
        Page,
        ListInstanceResult,
        InstanceResource,
        InstancePath,
        AttrResource,
        AttrValue,
        ListAttrValueResult,
        AuthorizeBatchBody,
        AuthorizeBatchResponse,
        Decision,
        SyncResponse,
        ReconcileSummary,
        RegisterRequest,
        RegistrationStatus,
        CatalogRemovalRequest,
        PolicyPage,
        PolicyRecord,
        Subject
    )),
    tags(
        (name = "system", description = "Service metadata and health"),
        (name = "pull", description = "Resource provider callbacks from IAM"),
        (name = "authorize", description = "Batch authorization"),
        (name = "catalog", description = "IAM registration and catalog maintenance")
    )
)]
pub struct ApiDoc;
