mod common;
mod http_helpers;

use axum::http::StatusCode;
use common::{app_with, read_json, registered_iam};
use http_helpers::json_request;
use serde_json::json;
use tower::ServiceExt;

fn decisions(body: &serde_json::Value) -> Vec<bool> {
    body["decisions"]
        .as_array()
        .expect("decisions")
        .iter()
        .map(|decision| decision["authorized"].as_bool().expect("authorized"))
        .collect()
}

#[tokio::test]
async fn exact_batch_keeps_input_order() {
    let iam = registered_iam();
    iam.grant("alice", "edit_business", Some(vec!["3".to_string()]))
        .await;
    let app = app_with(iam, true);
    let response = app
        .oneshot(json_request(
            "POST",
            "/v1/auth/authorize/batch",
            json!({
                "user": "alice",
                "resources": [
                    {"type": "business", "action": "update", "instance_id": 4},
                    {"type": "business", "action": "skip"},
                    {"type": "business", "action": "update", "instance_id": 3}
                ]
            }),
        ))
        .await
        .expect("authorize");
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(decisions(&body), vec![false, true, true]);
}

#[tokio::test]
async fn any_batch_accepts_partial_grants() {
    let iam = registered_iam();
    iam.grant("bob", "edit_business", Some(vec!["3".to_string()]))
        .await;
    let app = app_with(iam, true);
    let response = app
        .oneshot(json_request(
            "POST",
            "/v1/auth/authorize/any/batch",
            json!({
                "user": "bob",
                "resources": [{"type": "business", "action": "update", "instance_id": 9}]
            }),
        ))
        .await
        .expect("authorize");
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(decisions(&body), vec![true]);
}

#[tokio::test]
async fn unmappable_check_fails_whole_batch() {
    let iam = registered_iam();
    let app = app_with(iam.clone(), true);
    let response = app
        .oneshot(json_request(
            "POST",
            "/v1/auth/authorize/batch",
            json!({
                "user": "alice",
                "resources": [
                    {"type": "business", "action": "update", "instance_id": 1},
                    {
                        "type": "host_instance",
                        "action": "move_host_to_another_biz_module",
                        "layers": [{"type": "business", "instance_id": 1}]
                    }
                ]
            }),
        ))
        .await
        .expect("authorize");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = read_json(response).await;
    assert_eq!(body["code"], "unsupported_resource");
    assert!(iam.calls().await.is_empty());
}

#[tokio::test]
async fn iam_failure_is_bad_gateway() {
    let iam = registered_iam();
    iam.fail_on("authorize_batch").await;
    let app = app_with(iam, true);
    let response = app
        .oneshot(json_request(
            "POST",
            "/v1/auth/authorize/batch",
            json!({
                "user": "alice",
                "resources": [{"type": "business", "action": "update", "instance_id": 1}]
            }),
        ))
        .await
        .expect("authorize");
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = read_json(response).await;
    assert_eq!(body["code"], "iam_unavailable");
    assert_eq!(body["request_id"], "memory");
}

#[tokio::test]
async fn disabled_authorization_allows_everything() {
    let iam = registered_iam();
    let app = app_with(iam.clone(), false);
    let response = app
        .oneshot(json_request(
            "POST",
            "/v1/auth/authorize/batch",
            json!({
                "user": "alice",
                "resources": [
                    {"type": "business", "action": "update", "instance_id": 1},
                    {"type": "host_instance", "action": "archive"}
                ]
            }),
        ))
        .await
        .expect("authorize");
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(decisions(&body), vec![true, true]);
    assert!(iam.calls().await.is_empty());
}

#[tokio::test]
async fn blank_user_is_rejected() {
    let app = app_with(registered_iam(), true);
    let response = app
        .oneshot(json_request(
            "POST",
            "/v1/auth/authorize/batch",
            json!({"user": " ", "resources": []}),
        ))
        .await
        .expect("authorize");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = read_json(response).await;
    assert_eq!(body["code"], "validation_error");
}
