mod common;
mod http_helpers;

use authserver::app::build_router;
use authserver::iam::memory::InMemoryIam;
use authserver::iam::{PolicyRecord, Subject};
use axum::http::StatusCode;
use common::{app_with, read_json, registered_iam, state_with};
use http_helpers::{empty_request, json_request};
use serde_json::json;
use std::sync::Arc;
use tower::ServiceExt;

#[tokio::test]
async fn sync_registers_model_catalog_then_settles() {
    let iam = registered_iam();
    let state = state_with(iam.clone(), true);
    let app = build_router(state.clone()).into_service();

    let response = app
        .clone()
        .oneshot(empty_request("POST", "/v1/iam/sync"))
        .await
        .expect("sync");
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["outcome"], "applied");
    assert_eq!(body["summary"]["models"], 1);
    assert_eq!(body["summary"]["created"], 5);
    assert!(
        iam.catalog()
            .await
            .actions
            .iter()
            .any(|action| action.id == "edit_comobj_7")
    );
    assert_eq!(state.models.len().await, 1);

    let response = app
        .oneshot(empty_request("POST", "/v1/iam/sync"))
        .await
        .expect("sync");
    let body = read_json(response).await;
    assert_eq!(body["summary"]["created"], 0);
    assert_eq!(body["summary"]["deleted"], 0);
}

#[tokio::test]
async fn sync_against_unregistered_iam_is_bad_gateway() {
    let app = app_with(Arc::new(InMemoryIam::new()), true);
    let response = app
        .oneshot(empty_request("POST", "/v1/iam/sync"))
        .await
        .expect("sync");
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = read_json(response).await;
    assert_eq!(body["code"], "iam_unavailable");
}

#[tokio::test]
async fn register_uses_callback_host_by_default() {
    let iam = Arc::new(InMemoryIam::new());
    let app = app_with(iam.clone(), true);

    let response = app
        .clone()
        .oneshot(empty_request("GET", "/v1/iam/registered"))
        .await
        .expect("registered");
    let body = read_json(response).await;
    assert_eq!(body["registered"], false);

    let response = app
        .clone()
        .oneshot(json_request("POST", "/v1/iam/register", json!({})))
        .await
        .expect("register");
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["registered"], true);
    assert_eq!(body["created"], true);
    let system = iam.system().await.expect("system");
    assert_eq!(system.provider_config.host, "http://cmdb.local:9990");

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/v1/iam/register",
            json!({"host": "http://other:1"}),
        ))
        .await
        .expect("register");
    let body = read_json(response).await;
    assert_eq!(body["created"], false);

    let response = app
        .oneshot(empty_request("GET", "/v1/iam/registered"))
        .await
        .expect("registered");
    let body = read_json(response).await;
    assert_eq!(body["registered"], true);
}

#[tokio::test]
async fn named_entries_are_removed() {
    let iam = registered_iam();
    let app = app_with(iam.clone(), true);
    let response = app
        .clone()
        .oneshot(empty_request("POST", "/v1/iam/sync"))
        .await
        .expect("sync");
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/v1/iam/catalog/remove",
            json!({"action_ids": ["delete_comobj_7"]}),
        ))
        .await
        .expect("remove");
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["summary"]["deleted"], 1);
    assert!(
        iam.catalog()
            .await
            .actions
            .iter()
            .all(|action| action.id != "delete_comobj_7")
    );

    let response = app
        .oneshot(json_request("POST", "/v1/iam/catalog/remove", json!({})))
        .await
        .expect("remove");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn action_policies_are_paged_through_iam() {
    let iam = registered_iam();
    for id in 1..=3 {
        iam.add_policy(
            "edit_business",
            PolicyRecord {
                id,
                subject: Subject::user(format!("user{id}")),
                expression: json!({"op": "in", "field": "business.id", "value": ["3"]}),
                expired_at: 0,
            },
        )
        .await;
    }
    let app = app_with(iam, true);
    let response = app
        .clone()
        .oneshot(empty_request(
            "GET",
            "/v1/iam/actions/edit_business/policies?page=2&page_size=2",
        ))
        .await
        .expect("policies");
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["count"], 3);
    assert_eq!(body["results"].as_array().expect("results").len(), 1);
    assert_eq!(body["results"][0]["id"], 3);

    let response = app
        .oneshot(empty_request(
            "GET",
            "/v1/iam/actions/edit_business/policies?page_size=1000",
        ))
        .await
        .expect("policies");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
