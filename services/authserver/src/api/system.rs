//! System/health API handlers.
//!
//! # Purpose and responsibility
//! Lightweight endpoints for service metadata and readiness probes.
//!
//! # Key invariants and assumptions
//! - Health checks only touch the resource store; IAM reachability is not probed.
use crate::api::error::{ApiError, api_internal};
use crate::api::types::{HealthStatus, ServiceInfo};
use crate::app::AppState;
use axum::Json;
use axum::extract::State;

#[utoipa::path(
    get,
    path = "/v1/system/info",
    tag = "system",
    responses(
        (status = 200, description = "Auth server identity and backends", body = ServiceInfo)
    )
)]
/// Return the system id, API version and active backends.
pub(crate) async fn system_info(State(state): State<AppState>) -> Json<ServiceInfo> {
    Json(ServiceInfo {
        system_id: state.system_id.clone(),
        api_version: state.api_version.clone(),
        auth_enabled: state.authorizer.is_enabled(),
        iam_backend: state.iam.backend_name().to_string(),
        store_backend: state.store.backend_name().to_string(),
        cached_models: state.models.len().await,
    })
}

#[utoipa::path(
    get,
    path = "/v1/system/health",
    tag = "system",
    responses(
        (status = 200, description = "Auth server health", body = HealthStatus),
        (status = 500, description = "Store unavailable")
    )
)]
/// Probe the resource store and report `ok` when it answers.
///
/// # Errors
/// - Returns 500 if the store health check fails.
pub(crate) async fn system_health(
    State(state): State<AppState>,
) -> Result<Json<HealthStatus>, ApiError> {
    if let Err(err) = state.store.health_check().await {
        return Err(api_internal("storage unavailable", &err));
    }
    Ok(Json(HealthStatus {
        status: "ok".to_string(),
    }))
}
