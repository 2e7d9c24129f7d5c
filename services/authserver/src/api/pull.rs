//! Inbound pull-resource endpoint called by IAM.
//!
//! # Purpose and responsibility
//! IAM asks the provider for attributes, instances and instance details while
//! users pick resources in policy editors. This handler decodes the request,
//! hands it to [`InstanceLister`](crate::lister::InstanceLister) and wraps the
//! answer in the `{code, message, data}` envelope IAM expects.
//!
//! # Key invariants and assumptions
//! - The HTTP status is always 200; failures are reported through `code`.
//! - `code` is 0 on success, 404 for unknown types or methods, 422 for bad
//!   input and 500 for backend failures.
//! - Backend error details are logged, never returned.
use crate::api::types::PullEnvelope;
use crate::app::AppState;
use crate::lister::{ListError, PullResourceRequest};
use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use serde_json::Value;

pub const CODE_OK: i64 = 0;
pub const CODE_NOT_FOUND: i64 = 404;
pub const CODE_UNPROCESSABLE: i64 = 422;
pub const CODE_INTERNAL: i64 = 500;

fn envelope(code: i64, message: impl Into<String>, data: Value) -> Json<PullEnvelope> {
    Json(PullEnvelope {
        code,
        message: message.into(),
        data,
    })
}

fn error_envelope(err: &ListError) -> Json<PullEnvelope> {
    match err {
        ListError::UnsupportedType(_) | ListError::UnsupportedMethod { .. } => {
            envelope(CODE_NOT_FOUND, err.to_string(), Value::Null)
        }
        err if err.is_caller_error() => {
            envelope(CODE_UNPROCESSABLE, err.to_string(), Value::Null)
        }
        err => {
            tracing::error!(error = ?err, "pull resource request failed");
            envelope(CODE_INTERNAL, "internal error", Value::Null)
        }
    }
}

#[utoipa::path(
    post,
    path = "/auth/v3/find/resource",
    tag = "pull",
    request_body = PullResourceRequest,
    responses(
        (status = 200, description = "Envelope carrying the result or an error code", body = PullEnvelope)
    )
)]
pub(crate) async fn pull_resource(
    State(state): State<AppState>,
    payload: Result<Json<PullResourceRequest>, JsonRejection>,
) -> Json<PullEnvelope> {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            metrics::counter!(
                "cmdb_auth_pull_requests_total",
                "method" => "invalid",
                "code" => CODE_UNPROCESSABLE.to_string()
            )
            .increment(1);
            return envelope(CODE_UNPROCESSABLE, rejection.body_text(), Value::Null);
        }
    };

    let response = match state.lister.pull(&request).await {
        Ok(data) => envelope(CODE_OK, "success", data),
        Err(err) => error_envelope(&err),
    };
    tracing::debug!(
        resource_type = %request.resource_type,
        method = %request.method,
        code = response.code,
        "pull resource served"
    );
    metrics::counter!(
        "cmdb_auth_pull_requests_total",
        "method" => metric_method(&request.method),
        "code" => response.code.to_string()
    )
    .increment(1);
    response
}

// Caller-supplied method names are not used as label values.
fn metric_method(method: &str) -> &'static str {
    crate::lister::PullMethod::parse(method)
        .map(|method| method.as_str())
        .unwrap_or("unknown")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;

    #[test]
    fn error_codes_follow_error_kind() {
        let unsupported = error_envelope(&ListError::UnsupportedType("nope".to_string()));
        assert_eq!(unsupported.code, CODE_NOT_FOUND);

        let page = error_envelope(&ListError::InvalidPage { limit: 0, max: 10 });
        assert_eq!(page.code, CODE_UNPROCESSABLE);
        assert!(page.message.contains("between 1 and 10"));

        let store = error_envelope(&ListError::Store(StoreError::Unexpected(anyhow::anyhow!(
            "secret detail"
        ))));
        assert_eq!(store.code, CODE_INTERNAL);
        assert_eq!(store.message, "internal error");
    }

    #[test]
    fn unknown_methods_share_one_label() {
        assert_eq!(metric_method("list_instance"), "list_instance");
        assert_eq!(metric_method("drop_tables"), "unknown");
    }
}
