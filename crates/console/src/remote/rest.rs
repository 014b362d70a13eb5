use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use ops_protocol::locator::LocatorResult;
use ops_protocol::schema::{EnumDictionary, MetadataDescriptor, PolicyDescriptor, TableDescriptor};
use ops_protocol::ExecutionRecord;
use reqwest::{Client, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::realtime::open_channel;
use super::{ExecutionFeed, RecordInspector, SchemaSource, Subscription};
use crate::config::ConsoleConfig;
use crate::error::{RemoteError, SubscriptionError};
use crate::identifier::ValidIdentifier;

const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REALTIME_PATH: &str = "/realtime/v1/websocket";
const REALTIME_VSN: &str = "1.0.0";

/// PostgREST-style backend: table reads and RPCs over HTTP, change
/// notifications over the realtime websocket.
pub struct RestBackend {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    schema: String,
    table: String,
    request_id: AtomicU64,
}

impl RestBackend {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        schema: &str,
        table: &str,
        io_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            anyhow::bail!("backend base_url is empty");
        }
        Url::parse(&base_url).with_context(|| format!("invalid backend base_url {base_url}"))?;
        let client = Client::builder()
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            .timeout(io_timeout)
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            client,
            base_url,
            api_key,
            schema: schema.to_string(),
            table: table.to_string(),
            request_id: AtomicU64::new(1),
        })
    }

    pub fn from_config(config: &ConsoleConfig) -> anyhow::Result<Self> {
        let api_key = config.backend.resolve_api_key()?;
        Self::new(
            &config.backend.base_url,
            api_key,
            &config.backend.schema,
            &config.monitor.table,
            Duration::from_millis(config.backend.request_timeout_ms),
        )
    }

    fn endpoint(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}/{path}", self.base_url)
        }
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let mut request = request
            .header("Accept", "application/json")
            .header("Accept-Profile", &self.schema)
            .header("Content-Profile", &self.schema);
        if let Some(key) = self.api_key.as_deref() {
            request = request.header("apikey", key).bearer_auth(key);
        }
        request
    }

    pub(crate) fn realtime_url(&self) -> Result<String, SubscriptionError> {
        let mut url =
            Url::parse(&self.base_url).map_err(|err| SubscriptionError::Open(err.to_string()))?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme).map_err(|_| {
            SubscriptionError::Open(format!(
                "cannot derive websocket url from {}",
                self.base_url
            ))
        })?;
        url.set_path(REALTIME_PATH);
        {
            let mut query = url.query_pairs_mut();
            if let Some(key) = self.api_key.as_deref() {
                query.append_pair("apikey", key);
            }
            query.append_pair("vsn", REALTIME_VSN);
        }
        Ok(url.to_string())
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        label: &str,
        request: RequestBuilder,
    ) -> Result<T, RemoteError> {
        let request_id = self.request_id.fetch_add(1, Ordering::Relaxed);
        debug!(event = "remote.request.start", request_id, label, "remote request");
        let response = self.authorize(request).send().await.map_err(|err| {
            warn!(
                event = "remote.request.failed",
                request_id,
                label,
                timeout = err.is_timeout(),
                connect = err.is_connect(),
                error = %err,
                "remote request failed"
            );
            RemoteError::Transport(err.to_string())
        })?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| RemoteError::Transport(err.to_string()))?;
        debug!(
            event = "remote.request.done",
            request_id,
            label,
            status = status.as_u16(),
            body_len = body.len(),
            "remote response"
        );
        if !status.is_success() {
            return Err(RemoteError::Status {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }
        serde_json::from_str(&body).map_err(|err| RemoteError::Decode(err.to_string()))
    }

    async fn rpc<T: DeserializeOwned>(&self, function: &str, args: Value) -> Result<T, RemoteError> {
        let url = self.endpoint(&format!("/rest/v1/rpc/{function}"));
        self.send_json(function, self.client.post(url).json(&args))
            .await
    }
}

/// Prefers the `message` field of a JSON error body, falling back to the raw text.
fn error_message(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "empty response".to_string();
    }
    serde_json::from_str::<Value>(trimmed)
        .ok()
        .and_then(|value| {
            value
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| trimmed.to_string())
}

#[async_trait]
impl ExecutionFeed for RestBackend {
    async fn fetch_recent_executions(
        &self,
        limit: usize,
    ) -> Result<Vec<ExecutionRecord>, RemoteError> {
        let url = self.endpoint(&format!("/rest/v1/{}", self.table));
        let limit = limit.to_string();
        let request = self.client.get(url).query(&[
            ("select", "*"),
            ("order", "created_at.desc"),
            ("limit", limit.as_str()),
        ]);
        self.send_json("fetch_recent_executions", request).await
    }

    async fn subscribe_to_execution_changes(&self) -> Result<Subscription, SubscriptionError> {
        let url = self.realtime_url()?;
        open_channel(&url, &self.schema, &self.table, self.api_key.clone()).await
    }
}

#[async_trait]
impl SchemaSource for RestBackend {
    async fn fetch_schema_overview(&self) -> Result<Vec<TableDescriptor>, RemoteError> {
        self.rpc("get_schema_overview", json!({})).await
    }

    async fn fetch_enum_dictionary(&self) -> Result<EnumDictionary, RemoteError> {
        self.rpc("get_enum_types", json!({})).await
    }

    async fn fetch_db_metadata(&self) -> Result<MetadataDescriptor, RemoteError> {
        self.rpc("get_db_metadata", json!({})).await
    }

    async fn fetch_policies(&self) -> Result<Vec<PolicyDescriptor>, RemoteError> {
        self.rpc("get_policies", json!({})).await
    }
}

#[async_trait]
impl RecordInspector for RestBackend {
    async fn inspect_record(
        &self,
        identifier: &ValidIdentifier,
    ) -> Result<LocatorResult, RemoteError> {
        self.rpc(
            "inspect_record",
            json!({ "record_id": identifier.to_string() }),
        )
        .await
    }
}
