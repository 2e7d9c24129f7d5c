use crate::lister::DEFAULT_MAX_PAGE_SIZE;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_SYSTEM_ID: &str = "bk_cmdb";
const DEFAULT_IAM_TIMEOUT_MS: u64 = 5000;
const DEFAULT_SYNC_INTERVAL_SECS: u64 = 300;

// Auth server configuration sourced from environment variables.
#[derive(Debug, Clone)]
pub struct AuthServerConfig {
    pub bind_addr: SocketAddr,
    pub metrics_bind: SocketAddr,
    pub auth_enabled: bool,
    pub system_id: String,
    /// Unset selects the in-memory IAM.
    pub iam_url: Option<String>,
    pub iam_app_code: String,
    pub iam_app_secret: String,
    pub iam_timeout_ms: u64,
    /// Provider host IAM calls back for pull-resource requests.
    pub callback_host: String,
    /// Zero disables the periodic reconcile loop.
    pub sync_interval_secs: u64,
    pub max_page_size: u64,
    pub seed_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct AuthServerConfigOverride {
    bind_addr: Option<String>,
    metrics_bind: Option<String>,
    auth_enabled: Option<bool>,
    system_id: Option<String>,
    iam_url: Option<String>,
    iam_app_code: Option<String>,
    iam_app_secret: Option<String>,
    iam_timeout_ms: Option<u64>,
    callback_host: Option<String>,
    sync_interval_secs: Option<u64>,
    max_page_size: Option<u64>,
    seed_path: Option<PathBuf>,
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
}

impl AuthServerConfig {
    pub fn from_env() -> Result<Self> {
        let bind_addr = std::env::var("CMDB_AUTH_BIND")
            .unwrap_or_else(|_| "0.0.0.0:9990".to_string())
            .parse()
            .with_context(|| "parse CMDB_AUTH_BIND")?;
        let metrics_bind = std::env::var("CMDB_AUTH_METRICS_BIND")
            .unwrap_or_else(|_| "0.0.0.0:9991".to_string())
            .parse()
            .with_context(|| "parse CMDB_AUTH_METRICS_BIND")?;
        let auth_enabled = std::env::var("CMDB_AUTH_ENABLED")
            .ok()
            .map(|value| !matches!(value.as_str(), "0" | "false" | "FALSE" | "no" | "NO"))
            .unwrap_or(true);
        let system_id =
            std::env::var("CMDB_AUTH_SYSTEM_ID").unwrap_or_else(|_| DEFAULT_SYSTEM_ID.to_string());
        let iam_url = std::env::var("CMDB_AUTH_IAM_URL")
            .ok()
            .filter(|value| !value.is_empty());
        let iam_app_code = std::env::var("CMDB_AUTH_IAM_APP_CODE")
            .unwrap_or_else(|_| DEFAULT_SYSTEM_ID.to_string());
        let iam_app_secret = std::env::var("CMDB_AUTH_IAM_APP_SECRET").unwrap_or_default();
        let iam_timeout_ms = env_u64("CMDB_AUTH_IAM_TIMEOUT_MS")
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_IAM_TIMEOUT_MS);
        let callback_host = std::env::var("CMDB_AUTH_CALLBACK_HOST")
            .unwrap_or_else(|_| "http://127.0.0.1:9990".to_string());
        let sync_interval_secs =
            env_u64("CMDB_AUTH_SYNC_INTERVAL_SECS").unwrap_or(DEFAULT_SYNC_INTERVAL_SECS);
        let max_page_size = env_u64("CMDB_AUTH_MAX_PAGE_SIZE")
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_MAX_PAGE_SIZE);
        let seed_path = std::env::var("CMDB_AUTH_SEED").ok().map(PathBuf::from);
        Ok(Self {
            bind_addr,
            metrics_bind,
            auth_enabled,
            system_id,
            iam_url,
            iam_app_code,
            iam_app_secret,
            iam_timeout_ms,
            callback_host,
            sync_interval_secs,
            max_page_size,
            seed_path,
        })
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::from_env()?;
        if let Ok(path) = std::env::var("CMDB_AUTH_CONFIG") {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("read CMDB_AUTH_CONFIG: {path}"))?;
            let override_cfg: AuthServerConfigOverride = serde_yaml::from_str(&contents)
                .with_context(|| "parse auth server config yaml")?;
            config.apply(override_cfg)?;
        }
        Ok(config)
    }

    fn apply(&mut self, override_cfg: AuthServerConfigOverride) -> Result<()> {
        if let Some(value) = override_cfg.bind_addr {
            self.bind_addr = value.parse().with_context(|| "parse bind_addr")?;
        }
        if let Some(value) = override_cfg.metrics_bind {
            self.metrics_bind = value.parse().with_context(|| "parse metrics_bind")?;
        }
        if let Some(value) = override_cfg.auth_enabled {
            self.auth_enabled = value;
        }
        if let Some(value) = override_cfg.system_id {
            self.system_id = value;
        }
        if let Some(value) = override_cfg.iam_url {
            self.iam_url = Some(value).filter(|value| !value.is_empty());
        }
        if let Some(value) = override_cfg.iam_app_code {
            self.iam_app_code = value;
        }
        if let Some(value) = override_cfg.iam_app_secret {
            self.iam_app_secret = value;
        }
        if let Some(value) = override_cfg.iam_timeout_ms.filter(|value| *value > 0) {
            self.iam_timeout_ms = value;
        }
        if let Some(value) = override_cfg.callback_host {
            self.callback_host = value;
        }
        if let Some(value) = override_cfg.sync_interval_secs {
            self.sync_interval_secs = value;
        }
        if let Some(value) = override_cfg.max_page_size.filter(|value| *value > 0) {
            self.max_page_size = value;
        }
        if let Some(value) = override_cfg.seed_path {
            self.seed_path = Some(value);
        }
        Ok(())
    }

    pub fn iam_timeout(&self) -> Duration {
        Duration::from_millis(self.iam_timeout_ms)
    }

    pub fn sync_interval(&self) -> Option<Duration> {
        (self.sync_interval_secs > 0).then(|| Duration::from_secs(self.sync_interval_secs))
    }
}
