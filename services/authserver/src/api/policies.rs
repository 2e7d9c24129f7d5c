//! Policy listing proxy.
//!
//! Lets operators page through the IAM policies bound to one action without
//! holding IAM credentials themselves.
use crate::api::error::{ApiError, api_iam_unavailable, api_validation_error};
use crate::api::types::PolicyListQuery;
use crate::app::AppState;
use crate::iam::{ListPoliciesQuery, PolicyPage};
use axum::Json;
use axum::extract::{Path, Query, State};

const DEFAULT_POLICY_PAGE_SIZE: u64 = 100;
const MAX_POLICY_PAGE_SIZE: u64 = 500;

#[utoipa::path(
    get,
    path = "/v1/iam/actions/{action_id}/policies",
    tag = "catalog",
    params(
        ("action_id" = String, Path, description = "IAM action id"),
        ("page" = Option<u64>, Query, description = "1-based page number"),
        ("page_size" = Option<u64>, Query, description = "Policies per page"),
        ("timestamp" = Option<i64>, Query, description = "Only policies not expired at this time")
    ),
    responses(
        (status = 200, description = "Policies for the action", body = PolicyPage),
        (status = 400, description = "Invalid paging"),
        (status = 502, description = "IAM unavailable")
    )
)]
pub(crate) async fn list_action_policies(
    State(state): State<AppState>,
    Path(action_id): Path<String>,
    Query(query): Query<PolicyListQuery>,
) -> Result<Json<PolicyPage>, ApiError> {
    let page_size = match query.page_size {
        0 => DEFAULT_POLICY_PAGE_SIZE,
        size if size > MAX_POLICY_PAGE_SIZE => {
            return Err(api_validation_error("page_size must not exceed 500"));
        }
        size => size,
    };
    let request = ListPoliciesQuery {
        action_id,
        page: query.page.max(1),
        page_size,
        timestamp: query.timestamp,
    };
    let page = state
        .iam
        .list_policies(&request)
        .await
        .map_err(|err| api_iam_unavailable("policy listing failed", &err))?;
    Ok(Json(page))
}
