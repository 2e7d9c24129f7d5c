//! CMDB auth server entry point.
//!
//! # Purpose
//! Wires configuration, the resource store and the IAM client, registers the
//! system with IAM, runs the first catalog pass and starts the HTTP API plus
//! the periodic reconcile loop.
//!
//! # Notes
//! IAM being unreachable at startup is logged and tolerated; the periodic loop
//! and the sync endpoint retry later.
mod api;
mod app;
mod authorizer;
mod config;
mod iam;
mod lister;
mod model;
mod observability;
mod reconciler;
mod store;

use anyhow::Context;
use app::{AppState, build_router};
use iam::IamClient;
use iam::http::{HttpIamClient, HttpIamConfig};
use iam::memory::InMemoryIam;
use std::future::Future;
use std::sync::Arc;
use store::ResourceStore;
use store::memory::InMemoryResourceStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = config::AuthServerConfig::from_env_or_yaml().context("auth server config")?;
    run_with_shutdown(config, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
}

async fn run_with_shutdown<F>(config: config::AuthServerConfig, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let metrics_handle = observability::init_observability("cmdb-authserver");
    let state = build_state(&config)?;
    tracing::info!(
        system_id = %state.system_id,
        iam_backend = state.iam.backend_name(),
        store_backend = state.store.backend_name(),
        auth_enabled = config.auth_enabled,
        "auth server starting"
    );
    let metrics_task = tokio::spawn(observability::serve_metrics(
        metrics_handle,
        config.metrics_bind,
    ));

    sync_on_startup(&state).await;
    let sync_task = config
        .sync_interval()
        .map(|interval| tokio::spawn(state.reconciler.clone().run_periodic(interval)));

    let app = build_router(state);
    let addr = config.bind_addr;
    tracing::info!(%addr, "auth server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tokio::pin!(shutdown);
    tokio::select! {
        result = axum::serve(listener, app.into_make_service()) => {
            result?;
        }
        _ = &mut shutdown => {}
    }

    metrics_task.abort();
    if let Some(task) = &sync_task {
        task.abort();
    }
    let _ = metrics_task.await;
    if let Some(task) = sync_task {
        let _ = task.await;
    }
    Ok(())
}

async fn sync_on_startup(state: &AppState) {
    if let Err(err) = state.reconciler.register_to_iam(&state.callback_host).await {
        tracing::warn!(error = %err, "iam system registration failed");
        return;
    }
    if let Err(err) = state.reconciler.reconcile().await {
        tracing::warn!(error = %err, "initial catalog reconcile failed");
    }
}

fn build_state(config: &config::AuthServerConfig) -> anyhow::Result<AppState> {
    let store: Arc<dyn ResourceStore> = match &config.seed_path {
        Some(path) => Arc::new(InMemoryResourceStore::load_seed(path)?),
        None => Arc::new(InMemoryResourceStore::new()),
    };
    let iam: Arc<dyn IamClient> = match &config.iam_url {
        Some(base_url) => Arc::new(HttpIamClient::new(HttpIamConfig {
            base_url: base_url.clone(),
            system_id: config.system_id.clone(),
            app_code: config.iam_app_code.clone(),
            app_secret: config.iam_app_secret.clone(),
            timeout: config.iam_timeout(),
        })?),
        None => Arc::new(InMemoryIam::new()),
    };
    Ok(AppState::new(config, store, iam))
}
