//! API error types and helpers.
//!
//! # Purpose and responsibility
//! Keeps error shapes uniform across the REST endpoints. The pull-resource
//! endpoint answers with its own envelope and does not use these helpers.
//!
//! # Key invariants and assumptions
//! - Error responses carry a stable `code` and a human-readable `message`.
//! - Backend failures are logged server-side; only a generic message is returned.
use crate::api::types::ErrorResponse;
use crate::iam::IamError;
use crate::store::StoreError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;

/// Structured API error returned by handlers.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorResponse,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.status, Json(self.body)).into_response()
    }
}

fn api_error(status: StatusCode, code: &str, message: &str) -> ApiError {
    ApiError {
        status,
        body: ErrorResponse {
            code: code.to_string(),
            message: message.to_string(),
            request_id: None,
        },
    }
}

pub fn api_validation_error(message: &str) -> ApiError {
    api_error(StatusCode::BAD_REQUEST, "validation_error", message)
}

/// 400 for checks the mapper cannot express in IAM terms.
pub fn api_unsupported_resource(message: &str) -> ApiError {
    api_error(StatusCode::BAD_REQUEST, "unsupported_resource", message)
}

pub fn api_internal(message: &str, err: &StoreError) -> ApiError {
    tracing::error!(error = ?err, "auth server storage error");
    api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
}

pub fn api_internal_message(message: &str) -> ApiError {
    api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
}

/// 502 for failed IAM calls; the request id is kept for correlation.
pub fn api_iam_unavailable(message: &str, err: &IamError) -> ApiError {
    tracing::error!(error = ?err, "iam request failed");
    let mut api = api_error(StatusCode::BAD_GATEWAY, "iam_unavailable", message);
    if let IamError::Api { request_id, .. } = err {
        api.body.request_id = Some(request_id.clone()).filter(|id| !id.is_empty());
    }
    api
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn helpers_build_expected_codes() {
        let validation = api_validation_error("bad");
        assert_eq!(validation.status, StatusCode::BAD_REQUEST);
        assert_eq!(validation.body.code, "validation_error");

        let unsupported = api_unsupported_resource("no mapping");
        assert_eq!(unsupported.status, StatusCode::BAD_REQUEST);
        assert_eq!(unsupported.body.code, "unsupported_resource");

        let internal = api_internal("storage failed", &StoreError::Unexpected(anyhow::anyhow!("boom")));
        assert_eq!(internal.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(internal.body.message, "storage failed");
    }

    #[test]
    fn iam_errors_keep_request_id() {
        let err = IamError::Api {
            code: 1_902_500,
            message: "boom".to_string(),
            request_id: "req-9".to_string(),
        };
        let api = api_iam_unavailable("iam failed", &err);
        assert_eq!(api.status, StatusCode::BAD_GATEWAY);
        assert_eq!(api.body.code, "iam_unavailable");
        assert_eq!(api.body.request_id.as_deref(), Some("req-9"));

        let api = api_iam_unavailable("iam failed", &IamError::Decode("bad".to_string()));
        assert_eq!(api.body.request_id, None);
    }
}
