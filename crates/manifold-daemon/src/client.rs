//! JSON-RPC client for the downloader daemon.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::error::{DaemonError, DaemonResult};
use crate::status::DownloadStatus;

/// Total timeout applied to every RPC call.
const RPC_TIMEOUT: Duration = Duration::from_secs(30);

/// Options forwarded with a submission.
#[derive(Debug, Clone, Serialize, Default)]
pub struct TransferOptions {
    /// Task-private download directory the daemon must write into.
    pub dir: String,
    /// Output filename override, when the probe discovered one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub out: Option<String>,
}

/// Daemon identity reported by `getVersion`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    /// Daemon version string.
    pub version: String,
    /// Features compiled into the daemon.
    #[serde(default)]
    pub enabled_features: Vec<String>,
}

/// RPC operations the reconciler and the submission path need.
///
/// A trait seam so tests drive the reconciler with a scripted daemon.
#[async_trait]
pub trait DaemonRpc: Send + Sync {
    /// Submit a set of URIs; returns the daemon handle.
    async fn add_uri(&self, uris: &[String], options: TransferOptions) -> DaemonResult<String>;

    /// Submit base64 torrent metainfo; returns the daemon handle.
    async fn add_torrent(&self, blob_b64: &str, options: TransferOptions) -> DaemonResult<String>;

    /// Fetch the current snapshot for a handle.
    async fn tell_status(&self, gid: &str) -> DaemonResult<DownloadStatus>;

    /// Forcibly remove a live transfer. Failures are reported but the
    /// transfer may already be gone; callers swallow errors.
    async fn force_remove(&self, gid: &str) -> DaemonResult<()>;

    /// Drop the daemon-side result record for a finished transfer.
    async fn remove_download_result(&self, gid: &str) -> DaemonResult<()>;

    /// Query the daemon identity, used as a connectivity check.
    async fn get_version(&self) -> DaemonResult<VersionInfo>;
}

/// HTTP JSON-RPC client.
///
/// Cheap to clone; rebuilt whenever the configured endpoint or secret
/// changes so the connection can be hot-swapped at runtime.
#[derive(Debug, Clone)]
pub struct RpcClient {
    http: reqwest::Client,
    rpc_url: String,
    secret: String,
}

impl RpcClient {
    /// Build a client for the given endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`DaemonError::Endpoint`] when the URL fails to parse, or a
    /// transport error when TLS setup fails.
    pub fn new(rpc_url: impl Into<String>, secret: impl Into<String>) -> DaemonResult<Self> {
        let rpc_url = rpc_url.into();
        url::Url::parse(&rpc_url).map_err(|_| DaemonError::Endpoint {
            url: rpc_url.clone(),
        })?;
        let http = reqwest::Client::builder()
            .timeout(RPC_TIMEOUT)
            .build()
            .map_err(|source| DaemonError::Transport {
                method: "client.build",
                source,
            })?;
        Ok(Self {
            http,
            rpc_url,
            secret: secret.into(),
        })
    }

    /// Configured RPC endpoint.
    #[must_use]
    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    /// Whether this client matches the given endpoint and secret.
    #[must_use]
    pub fn matches(&self, rpc_url: &str, secret: &str) -> bool {
        self.rpc_url == rpc_url && self.secret == secret
    }

    fn build_params(&self, params: Vec<Value>) -> Vec<Value> {
        if self.secret.is_empty() {
            params
        } else {
            let mut full = Vec::with_capacity(params.len() + 1);
            full.push(Value::String(format!("token:{}", self.secret)));
            full.extend(params);
            full
        }
    }

    async fn call(&self, method: &'static str, params: Vec<Value>) -> DaemonResult<Value> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": "manifold",
            "method": method,
            "params": self.build_params(params),
        });
        debug!(method, "daemon rpc call");

        let response = self
            .http
            .post(&self.rpc_url)
            .json(&payload)
            .send()
            .await
            .map_err(|source| DaemonError::Transport { method, source })?;
        let body: Value = response
            .json()
            .await
            .map_err(|source| DaemonError::Transport { method, source })?;

        if let Some(error) = body.get("error") {
            return Err(DaemonError::Rpc {
                method,
                code: error.get("code").and_then(Value::as_i64).unwrap_or(0),
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string(),
            });
        }

        Ok(body.get("result").cloned().unwrap_or(Value::Null))
    }

    fn decode<T: serde::de::DeserializeOwned>(
        method: &'static str,
        value: Value,
    ) -> DaemonResult<T> {
        serde_json::from_value(value).map_err(|source| DaemonError::Decode { method, source })
    }
}

#[async_trait]
impl DaemonRpc for RpcClient {
    async fn add_uri(&self, uris: &[String], options: TransferOptions) -> DaemonResult<String> {
        let method = "aria2.addUri";
        let options = serde_json::to_value(options)
            .map_err(|source| DaemonError::Decode { method, source })?;
        let result = self.call(method, vec![json!(uris), options]).await?;
        Self::decode(method, result)
    }

    async fn add_torrent(&self, blob_b64: &str, options: TransferOptions) -> DaemonResult<String> {
        let method = "aria2.addTorrent";
        let options = serde_json::to_value(options)
            .map_err(|source| DaemonError::Decode { method, source })?;
        // Second parameter is the webseed list, unused here.
        let result = self
            .call(method, vec![json!(blob_b64), json!([]), options])
            .await?;
        Self::decode(method, result)
    }

    async fn tell_status(&self, gid: &str) -> DaemonResult<DownloadStatus> {
        let method = "aria2.tellStatus";
        let result = self.call(method, vec![json!(gid)]).await?;
        Self::decode(method, result)
    }

    async fn force_remove(&self, gid: &str) -> DaemonResult<()> {
        self.call("aria2.forceRemove", vec![json!(gid)]).await?;
        Ok(())
    }

    async fn remove_download_result(&self, gid: &str) -> DaemonResult<()> {
        self.call("aria2.removeDownloadResult", vec![json!(gid)])
            .await?;
        Ok(())
    }

    async fn get_version(&self) -> DaemonResult<VersionInfo> {
        let method = "aria2.getVersion";
        let result = self.call(method, vec![]).await?;
        Self::decode(method, result)
    }
}
