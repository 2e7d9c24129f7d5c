#![allow(dead_code)]

use authserver::app::{AppState, build_router};
use authserver::config::AuthServerConfig;
use authserver::iam::memory::InMemoryIam;
use authserver::iam::{IamClient, SystemInfo};
use authserver::store::memory::InMemoryResourceStore;
use std::sync::Arc;

pub type TestApp = axum::routing::RouterIntoService<axum::body::Body, ()>;

pub async fn read_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

pub fn config(auth_enabled: bool) -> AuthServerConfig {
    AuthServerConfig {
        bind_addr: "127.0.0.1:0".parse().expect("bind"),
        metrics_bind: "127.0.0.1:0".parse().expect("metrics bind"),
        auth_enabled,
        system_id: "bk_cmdb".to_string(),
        iam_url: None,
        iam_app_code: "bk_cmdb".to_string(),
        iam_app_secret: String::new(),
        iam_timeout_ms: 1000,
        callback_host: "http://cmdb.local:9990".to_string(),
        sync_interval_secs: 0,
        max_page_size: 50,
        seed_path: None,
    }
}

pub fn seed_store() -> InMemoryResourceStore {
    InMemoryResourceStore::from_seed(serde_json::json!({
        "cc_ApplicationBase": [
            {"bk_biz_id": 1, "bk_biz_name": "resource pool", "default": 1},
            {"bk_biz_id": 3, "bk_biz_name": "payments", "default": 0},
            {"bk_biz_id": 4, "bk_biz_name": "Payroll", "default": 0}
        ],
        "cc_SetBase": [
            {"bk_set_id": 10, "bk_set_name": "db", "bk_biz_id": 3}
        ],
        "cc_ModuleBase": [
            {"bk_module_id": 100, "bk_module_name": "mysql", "bk_biz_id": 3}
        ],
        "cc_HostBase": [
            {"bk_host_id": 1, "bk_host_innerip": "10.0.0.1", "bk_cloud_id": 0},
            {"bk_host_id": 2, "bk_host_innerip": "10.0.0.2", "bk_cloud_id": 0}
        ],
        "cc_ModuleHostConfig": [
            {"bk_host_id": 1, "bk_biz_id": 3, "bk_set_id": 10, "bk_module_id": 100},
            {"bk_host_id": 2, "bk_biz_id": 3, "bk_set_id": 10, "bk_module_id": 100}
        ],
        "cc_ObjDes": [
            {"id": 7, "bk_obj_id": "switch", "bk_obj_name": "Switch"}
        ],
        "cc_ObjectBase": [
            {"bk_inst_id": 70, "bk_inst_name": "core-sw-1", "bk_obj_id": "switch"}
        ],
        "cc_PlatBase": [
            {"bk_cloud_id": 0, "bk_cloud_name": "default area"},
            {"bk_cloud_id": 2, "bk_cloud_name": "aws"}
        ]
    }))
    .expect("seed")
}

pub fn registered_iam() -> Arc<InMemoryIam> {
    Arc::new(InMemoryIam::registered(SystemInfo::cmdb(
        "bk_cmdb",
        "http://cmdb.local:9990",
    )))
}

pub fn state_with(iam: Arc<InMemoryIam>, auth_enabled: bool) -> AppState {
    let iam: Arc<dyn IamClient> = iam;
    AppState::new(&config(auth_enabled), Arc::new(seed_store()), iam)
}

pub fn app_with(iam: Arc<InMemoryIam>, auth_enabled: bool) -> TestApp {
    build_router(state_with(iam, auth_enabled)).into_service()
}
