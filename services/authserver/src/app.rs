//! Auth server HTTP application wiring.
//!
//! # Purpose
//! Builds the Axum router, configures middleware, and defines the shared
//! application state injected into handlers.
use crate::api;
use crate::api::openapi::ApiDoc;
use crate::authorizer::BatchAuthorizer;
use crate::config::AuthServerConfig;
use crate::iam::IamClient;
use crate::lister::InstanceLister;
use crate::model::ModelCache;
use crate::observability;
use crate::reconciler::CatalogReconciler;
use crate::store::ResourceStore;
use axum::{Json, Router};
use cmdb_authz::ResourceMapper;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_opentelemetry::OpenTelemetrySpanExt;
use utoipa::OpenApi;

#[derive(Clone)]
pub struct AppState {
    pub system_id: String,
    pub api_version: String,
    /// Host IAM calls back on; used when registering without an explicit host.
    pub callback_host: String,
    pub store: Arc<dyn ResourceStore>,
    pub iam: Arc<dyn IamClient>,
    pub models: Arc<ModelCache>,
    pub authorizer: BatchAuthorizer,
    pub lister: InstanceLister,
    pub reconciler: Arc<CatalogReconciler>,
}

impl AppState {
    /// Wire the services around an already-built store and IAM client.
    pub fn new(
        config: &AuthServerConfig,
        store: Arc<dyn ResourceStore>,
        iam: Arc<dyn IamClient>,
    ) -> Self {
        let models = Arc::new(ModelCache::new());
        let authorizer = BatchAuthorizer::new(
            config.auth_enabled,
            ResourceMapper::new(config.system_id.clone()),
            iam.clone(),
        );
        let lister = InstanceLister::new(store.clone(), models.clone(), config.max_page_size);
        let reconciler = Arc::new(CatalogReconciler::new(
            config.system_id.clone(),
            iam.clone(),
            store.clone(),
            models.clone(),
        ));
        Self {
            system_id: config.system_id.clone(),
            api_version: "v1".to_string(),
            callback_host: config.callback_host.clone(),
            store,
            iam,
            models,
            authorizer,
            lister,
            reconciler,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let trace_layer =
        TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
            let parent = observability::trace_context_from_headers(request.headers());
            let span = tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri(),
                version = ?request.version()
            );
            span.set_parent(parent);
            span
        });

    Router::new()
        .route(
            "/v1/system/info",
            axum::routing::get(api::system::system_info),
        )
        .route(
            "/v1/system/health",
            axum::routing::get(api::system::system_health),
        )
        .route(
            "/auth/v3/find/resource",
            axum::routing::post(api::pull::pull_resource),
        )
        .route(
            "/v1/auth/authorize/batch",
            axum::routing::post(api::authorize::authorize_batch),
        )
        .route(
            "/v1/auth/authorize/any/batch",
            axum::routing::post(api::authorize::authorize_any_batch),
        )
        .route("/v1/iam/sync", axum::routing::post(api::catalog::sync_catalog))
        .route(
            "/v1/iam/register",
            axum::routing::post(api::catalog::register_system),
        )
        .route(
            "/v1/iam/registered",
            axum::routing::get(api::catalog::registration_status),
        )
        .route(
            "/v1/iam/catalog/remove",
            axum::routing::post(api::catalog::remove_catalog_entries),
        )
        .route(
            "/v1/iam/actions/:action_id/policies",
            axum::routing::get(api::policies::list_action_policies),
        )
        .route(
            "/v1/openapi.json",
            axum::routing::get(|| async { Json(ApiDoc::openapi()) }),
        )
        .layer(trace_layer)
        .with_state(state)
}
