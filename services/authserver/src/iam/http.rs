//! HTTP client for a remote IAM deployment.
//!
//! # Purpose
//! Implements [`IamClient`] over IAM's model and policy APIs using `reqwest`.
//! Every request carries the app credentials as default headers and is bounded
//! by the configured timeout.
//!
//! # Notes
//! Responses are decoded from the `{code, message, data}` envelope. The IAM
//! request id header is carried into [`IamError::Api`] for correlation.
use super::{
    AuthorizeBatchRequest, Decision, IAM_NOT_FOUND_CODE, IamClient, IamError, IamResult,
    ListPoliciesQuery, PolicyPage, SystemInfo, SystemQueryField, SystemSnapshot,
};
use anyhow::Context;
use async_trait::async_trait;
use cmdb_authz::{ActionGroup, InstanceSelectionEntry, ResourceActionEntry, ResourceTypeEntry};
use reqwest::RequestBuilder;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::time::Duration;

pub const APP_CODE_HEADER: &str = "X-Bk-App-Code";
pub const APP_SECRET_HEADER: &str = "X-Bk-App-Secret";
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

#[derive(Debug, Clone)]
pub struct HttpIamConfig {
    pub base_url: String,
    pub system_id: String,
    pub app_code: String,
    pub app_secret: String,
    pub timeout: Duration,
}

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: DeserializeOwned"))]
struct Envelope<T> {
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Option<T>,
}

pub struct HttpIamClient {
    client: reqwest::Client,
    base_url: String,
    system_id: String,
}

fn id_list(ids: &[String]) -> Value {
    Value::Array(ids.iter().map(|id| json!({ "id": id })).collect())
}

impl HttpIamClient {
    pub fn new(config: HttpIamConfig) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            APP_CODE_HEADER,
            HeaderValue::from_str(&config.app_code).context("iam app code header")?,
        );
        headers.insert(
            APP_SECRET_HEADER,
            HeaderValue::from_str(&config.app_secret).context("iam app secret header")?,
        );
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .context("build iam http client")?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            system_id: config.system_id,
        })
    }

    fn model_url(&self, suffix: &str) -> String {
        format!(
            "{}/api/v1/model/systems/{}{suffix}",
            self.base_url, self.system_id
        )
    }

    async fn send<T>(&self, request: RequestBuilder) -> IamResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        let response = request.send().await?;
        let request_id = response
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = response.bytes().await?;
        let envelope: Envelope<T> = serde_json::from_slice(&body)
            .map_err(|err| IamError::Decode(format!("{err} (request {request_id})")))?;

        match envelope.code {
            0 => Ok(envelope.data),
            IAM_NOT_FOUND_CODE => Err(IamError::NotFound(envelope.message)),
            code => Err(IamError::Api {
                code,
                message: envelope.message,
                request_id,
            }),
        }
    }

    async fn send_unit(&self, request: RequestBuilder) -> IamResult<()> {
        self.send::<Value>(request).await.map(|_| ())
    }
}

#[async_trait]
impl IamClient for HttpIamClient {
    async fn register_system(&self, system: &SystemInfo) -> IamResult<()> {
        let url = format!("{}/api/v1/model/systems", self.base_url);
        self.send_unit(self.client.post(url).json(system)).await
    }

    async fn get_system_info(&self, fields: &[SystemQueryField]) -> IamResult<SystemSnapshot> {
        let fields = fields
            .iter()
            .map(|field| field.as_str())
            .collect::<Vec<_>>()
            .join(",");
        let request = self
            .client
            .get(self.model_url("/query"))
            .query(&[("fields", fields)]);
        Ok(self.send(request).await?.unwrap_or_default())
    }

    async fn register_resource_types(&self, entries: &[ResourceTypeEntry]) -> IamResult<()> {
        let request = self.client.post(self.model_url("/resource-types")).json(entries);
        self.send_unit(request).await
    }

    async fn update_resource_type(&self, entry: &ResourceTypeEntry) -> IamResult<()> {
        let url = self.model_url(&format!("/resource-types/{}", entry.id));
        self.send_unit(self.client.put(url).json(entry)).await
    }

    async fn delete_resource_types(&self, ids: &[String]) -> IamResult<()> {
        let request = self
            .client
            .delete(self.model_url("/resource-types"))
            .json(&id_list(ids));
        self.send_unit(request).await
    }

    async fn register_instance_selections(
        &self,
        entries: &[InstanceSelectionEntry],
    ) -> IamResult<()> {
        let request = self
            .client
            .post(self.model_url("/instance-selections"))
            .json(entries);
        self.send_unit(request).await
    }

    async fn update_instance_selection(&self, entry: &InstanceSelectionEntry) -> IamResult<()> {
        let url = self.model_url(&format!("/instance-selections/{}", entry.id));
        self.send_unit(self.client.put(url).json(entry)).await
    }

    async fn delete_instance_selections(&self, ids: &[String]) -> IamResult<()> {
        let request = self
            .client
            .delete(self.model_url("/instance-selections"))
            .json(&id_list(ids));
        self.send_unit(request).await
    }

    async fn register_actions(&self, entries: &[ResourceActionEntry]) -> IamResult<()> {
        let request = self.client.post(self.model_url("/actions")).json(entries);
        self.send_unit(request).await
    }

    async fn update_action(&self, entry: &ResourceActionEntry) -> IamResult<()> {
        let url = self.model_url(&format!("/actions/{}", entry.id));
        self.send_unit(self.client.put(url).json(entry)).await
    }

    async fn delete_actions(&self, ids: &[String]) -> IamResult<()> {
        let request = self
            .client
            .delete(self.model_url("/actions"))
            .json(&id_list(ids));
        self.send_unit(request).await
    }

    async fn delete_action_policies(&self, action_id: &str) -> IamResult<()> {
        let url = self.model_url(&format!("/actions/{action_id}/policies"));
        self.send_unit(self.client.delete(url)).await
    }

    async fn register_action_groups(&self, groups: &[ActionGroup]) -> IamResult<()> {
        let request = self
            .client
            .post(self.model_url("/configs/action_groups"))
            .json(groups);
        self.send_unit(request).await
    }

    async fn update_action_groups(&self, groups: &[ActionGroup]) -> IamResult<()> {
        let request = self
            .client
            .put(self.model_url("/configs/action_groups"))
            .json(groups);
        self.send_unit(request).await
    }

    async fn authorize_batch(
        &self,
        request: &AuthorizeBatchRequest,
        exact: bool,
    ) -> IamResult<Vec<Decision>> {
        let path = if exact {
            "/api/v1/authorize/batch"
        } else {
            "/api/v1/authorize/any/batch"
        };
        let url = format!("{}{path}", self.base_url);
        Ok(self
            .send(self.client.post(url).json(request))
            .await?
            .unwrap_or_default())
    }

    async fn list_policies(&self, query: &ListPoliciesQuery) -> IamResult<PolicyPage> {
        let url = format!("{}/api/v1/systems/{}/policies", self.base_url, self.system_id);
        let mut params = vec![("action_id", query.action_id.clone())];
        if query.page != 0 {
            params.push(("page", query.page.to_string()));
        }
        if query.page_size != 0 {
            params.push(("page_size", query.page_size.to_string()));
        }
        if query.timestamp != 0 {
            params.push(("timestamp", query.timestamp.to_string()));
        }
        Ok(self
            .send(self.client.get(url).query(&params))
            .await?
            .unwrap_or_default())
    }

    fn backend_name(&self) -> &'static str {
        "http"
    }
}
