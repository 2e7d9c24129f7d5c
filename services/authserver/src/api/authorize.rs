//! Batch authorization endpoints.
//!
//! # Purpose and responsibility
//! CMDB callers submit an ordered list of access checks for one user and get
//! one decision per check back, in the same order. The exact route requires
//! every listed resource to be granted; the `any` route accepts any grant on
//! the action.
//!
//! # Key invariants and assumptions
//! - An unmappable check fails the whole request with 400.
//! - IAM failures surface as 502; no decision defaults to allow.
use crate::api::error::{
    ApiError, api_iam_unavailable, api_internal_message, api_unsupported_resource,
    api_validation_error,
};
use crate::api::types::{AuthorizeBatchBody, AuthorizeBatchResponse};
use crate::app::AppState;
use crate::authorizer::AuthorizeError;
use axum::Json;
use axum::extract::State;

#[utoipa::path(
    post,
    path = "/v1/auth/authorize/batch",
    tag = "authorize",
    request_body = AuthorizeBatchBody,
    responses(
        (status = 200, description = "One decision per check, in order", body = AuthorizeBatchResponse),
        (status = 400, description = "Invalid request or unmappable check"),
        (status = 502, description = "IAM unavailable")
    )
)]
/// Decide each check requiring every listed resource to be granted.
pub(crate) async fn authorize_batch(
    State(state): State<AppState>,
    Json(body): Json<AuthorizeBatchBody>,
) -> Result<Json<AuthorizeBatchResponse>, ApiError> {
    decide(&state, body, true).await
}

#[utoipa::path(
    post,
    path = "/v1/auth/authorize/any/batch",
    tag = "authorize",
    request_body = AuthorizeBatchBody,
    responses(
        (status = 200, description = "One decision per check, in order", body = AuthorizeBatchResponse),
        (status = 400, description = "Invalid request or unmappable check"),
        (status = 502, description = "IAM unavailable")
    )
)]
/// Decide each check accepting any grant on its action.
pub(crate) async fn authorize_any_batch(
    State(state): State<AppState>,
    Json(body): Json<AuthorizeBatchBody>,
) -> Result<Json<AuthorizeBatchResponse>, ApiError> {
    decide(&state, body, false).await
}

async fn decide(
    state: &AppState,
    body: AuthorizeBatchBody,
    exact: bool,
) -> Result<Json<AuthorizeBatchResponse>, ApiError> {
    if body.user.trim().is_empty() {
        return Err(api_validation_error("user is required"));
    }
    let decisions = state
        .authorizer
        .authorize_batch(&body.user, &body.resources, exact)
        .await
        .map_err(|err| match &err {
            AuthorizeError::Mapping { source, .. } if source.is_caller_error() => {
                api_unsupported_resource(&err.to_string())
            }
            AuthorizeError::Iam(iam) => api_iam_unavailable("authorization failed", iam),
            _ => {
                tracing::error!(error = ?err, user = %body.user, "batch authorization failed");
                api_internal_message("authorization failed")
            }
        })?;
    Ok(Json(AuthorizeBatchResponse { decisions }))
}
