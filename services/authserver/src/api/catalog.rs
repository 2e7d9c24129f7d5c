//! IAM registration and catalog maintenance endpoints.
//!
//! # Purpose and responsibility
//! Operator triggers for the work the reconciler also does on its own:
//! registering the CMDB system, running a catalog pass and removing named
//! catalog entries.
//!
//! # Key invariants and assumptions
//! - A sync request never waits behind a running pass; it reports `skipped`.
//! - Removals go through the reconciler so they share its ordering rules.
use crate::api::error::{
    ApiError, api_iam_unavailable, api_internal, api_internal_message, api_validation_error,
};
use crate::api::types::{
    CatalogRemovalRequest, RegisterRequest, RegistrationStatus, SyncResponse,
};
use crate::app::AppState;
use crate::reconciler::{ReconcileError, ReconcileOutcome};
use axum::Json;
use axum::extract::State;
use cmdb_authz::CatalogRemoval;

fn reconcile_error(message: &str, err: &ReconcileError) -> ApiError {
    match err {
        ReconcileError::Iam(iam) => api_iam_unavailable(message, iam),
        ReconcileError::Store(store) => api_internal(message, store),
        ReconcileError::Catalog(catalog) => {
            tracing::error!(error = ?catalog, "catalog derivation failed");
            api_internal_message(message)
        }
    }
}

#[utoipa::path(
    post,
    path = "/v1/iam/sync",
    tag = "catalog",
    responses(
        (status = 200, description = "Pass applied or skipped", body = SyncResponse),
        (status = 502, description = "IAM unavailable")
    )
)]
/// Run one catalog reconcile pass unless another pass is running.
pub(crate) async fn sync_catalog(
    State(state): State<AppState>,
) -> Result<Json<SyncResponse>, ApiError> {
    let outcome = state
        .reconciler
        .try_reconcile()
        .await
        .map_err(|err| reconcile_error("catalog sync failed", &err))?;
    let response = match outcome {
        ReconcileOutcome::Applied(summary) => SyncResponse {
            outcome: "applied".to_string(),
            summary: Some(summary),
        },
        ReconcileOutcome::Skipped => SyncResponse {
            outcome: "skipped".to_string(),
            summary: None,
        },
    };
    Ok(Json(response))
}

#[utoipa::path(
    post,
    path = "/v1/iam/register",
    tag = "catalog",
    request_body = RegisterRequest,
    responses(
        (status = 200, description = "System registered with IAM", body = RegistrationStatus),
        (status = 502, description = "IAM unavailable")
    )
)]
/// Register the CMDB system with IAM if it is not registered yet.
pub(crate) async fn register_system(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> Result<Json<RegistrationStatus>, ApiError> {
    let host = body.host.unwrap_or_else(|| state.callback_host.clone());
    if host.trim().is_empty() {
        return Err(api_validation_error("host is required"));
    }
    let created = state
        .reconciler
        .register_to_iam(&host)
        .await
        .map_err(|err| reconcile_error("system registration failed", &err))?;
    Ok(Json(RegistrationStatus {
        registered: true,
        created,
    }))
}

#[utoipa::path(
    get,
    path = "/v1/iam/registered",
    tag = "catalog",
    responses(
        (status = 200, description = "Whether the system is registered", body = RegistrationStatus),
        (status = 502, description = "IAM unavailable")
    )
)]
pub(crate) async fn registration_status(
    State(state): State<AppState>,
) -> Result<Json<RegistrationStatus>, ApiError> {
    let registered = state
        .reconciler
        .is_registered_to_iam()
        .await
        .map_err(|err| reconcile_error("registration check failed", &err))?;
    Ok(Json(RegistrationStatus {
        registered,
        created: false,
    }))
}

#[utoipa::path(
    post,
    path = "/v1/iam/catalog/remove",
    tag = "catalog",
    request_body = CatalogRemovalRequest,
    responses(
        (status = 200, description = "Entries removed", body = SyncResponse),
        (status = 400, description = "Nothing to remove"),
        (status = 502, description = "IAM unavailable")
    )
)]
/// Remove named actions, instance selections and resource types.
pub(crate) async fn remove_catalog_entries(
    State(state): State<AppState>,
    Json(body): Json<CatalogRemovalRequest>,
) -> Result<Json<SyncResponse>, ApiError> {
    let removal = CatalogRemoval::from(body);
    if removal.action_ids.is_empty()
        && removal.instance_selection_ids.is_empty()
        && removal.type_ids.is_empty()
    {
        return Err(api_validation_error("no catalog entries named"));
    }
    let summary = state
        .reconciler
        .delete_catalog_entries(&removal)
        .await
        .map_err(|err| reconcile_error("catalog removal failed", &err))?;
    Ok(Json(SyncResponse {
        outcome: "applied".to_string(),
        summary: Some(summary),
    }))
}
