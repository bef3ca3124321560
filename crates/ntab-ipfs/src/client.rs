use std::time::Duration;

use async_trait::async_trait;
use ntab_store::{ContentStore, NameKey, NameService, ServiceError, ServiceResult};
use ntab_types::{Digest, NamePointer};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::config::IpfsConfig;

/// IPFS node client for blob storage and IPNS naming.
pub struct IpfsClient {
    config: IpfsConfig,
    http: reqwest::Client,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AddResponse {
    hash: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct KeyEntry {
    name: String,
    id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct KeyListResponse {
    #[serde(default)]
    keys: Vec<KeyEntry>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PublishResponse {
    name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ResolveResponse {
    path: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ErrorResponse {
    message: String,
}

impl IpfsClient {
    pub fn new(config: IpfsConfig) -> ServiceResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ServiceError::Unavailable(format!("http client: {e}")))?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &IpfsConfig {
        &self.config
    }

    fn endpoint(&self, command: &str) -> String {
        format!(
            "{}/api/v0/{command}",
            self.config.api_url.trim_end_matches('/')
        )
    }

    async fn call(
        &self,
        command: &'static str,
        request: reqwest::RequestBuilder,
    ) -> ServiceResult<reqwest::Response> {
        tracing::debug!(command, "ipfs rpc call");
        let response = request
            .send()
            .await
            .map_err(|e| transport_error(command, e, self.config.request_timeout()))?;
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(rpc_error(command, status.as_u16(), &body))
    }

    async fn call_json<T: DeserializeOwned>(
        &self,
        command: &'static str,
        request: reqwest::RequestBuilder,
    ) -> ServiceResult<T> {
        let response = self.call(command, request).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| ServiceError::InvalidResponse(format!("{command}: {e}")))
    }
}

/// Map a transport-level failure (connect, timeout, body read).
fn transport_error(command: &'static str, err: reqwest::Error, after: Duration) -> ServiceError {
    if err.is_timeout() {
        return ServiceError::Timeout {
            operation: command,
            after,
        };
    }
    ServiceError::Unavailable(format!("{command}: {err}"))
}

/// Map an HTTP error answer from the node. Kubo reports failures as a JSON
/// body with a `Message` field.
fn rpc_error(command: &str, status: u16, body: &str) -> ServiceError {
    let message = serde_json::from_str::<ErrorResponse>(body)
        .map(|e| e.message)
        .unwrap_or_else(|_| body.trim().to_string());
    let lowered = message.to_ascii_lowercase();
    if lowered.contains("not found") || lowered.contains("could not resolve") {
        return ServiceError::NotFound(format!("{command}: {message}"));
    }
    ServiceError::Rejected(format!("{command} ({status}): {message}"))
}

/// Strip the `/ipfs/` namespace from a resolved path.
fn digest_from_path(path: &str) -> ServiceResult<Digest> {
    let cid = path.strip_prefix("/ipfs/").unwrap_or(path);
    let cid = cid.split('/').next().unwrap_or(cid);
    Digest::new(cid).map_err(|e| ServiceError::InvalidResponse(format!("resolved path {path:?}: {e}")))
}

#[async_trait]
impl ContentStore for IpfsClient {
    async fn put(&self, data: &[u8]) -> ServiceResult<Digest> {
        let part = reqwest::multipart::Part::bytes(data.to_vec()).file_name("table.json");
        let form = reqwest::multipart::Form::new().part("file", part);
        let request = self
            .http
            .post(self.endpoint("add"))
            .query(&[("pin", "true")])
            .multipart(form);
        let added: AddResponse = self.call_json("add", request).await?;
        tracing::debug!(cid = %added.hash, bytes = data.len(), "blob added");
        Digest::new(added.hash).map_err(|e| ServiceError::InvalidResponse(format!("add: {e}")))
    }

    async fn get(&self, digest: &Digest) -> ServiceResult<Vec<u8>> {
        let request = self
            .http
            .post(self.endpoint("cat"))
            .query(&[("arg", digest.as_str())]);
        let response = self.call("cat", request).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| transport_error("cat", e, self.config.request_timeout()))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl NameService for IpfsClient {
    async fn list_keys(&self) -> ServiceResult<Vec<NameKey>> {
        let request = self.http.post(self.endpoint("key/list"));
        let listed: KeyListResponse = self.call_json("key/list", request).await?;
        listed
            .keys
            .into_iter()
            .map(|k| {
                let pointer = NamePointer::new(k.id)
                    .map_err(|e| ServiceError::InvalidResponse(format!("key/list: {e}")))?;
                Ok(NameKey {
                    name: k.name,
                    pointer,
                })
            })
            .collect()
    }

    async fn generate_key(&self, name: &str) -> ServiceResult<NameKey> {
        let request = self
            .http
            .post(self.endpoint("key/gen"))
            .query(&[("arg", name), ("type", self.config.key_type.as_str())]);
        let key: KeyEntry = self.call_json("key/gen", request).await?;
        tracing::info!(key = %key.name, pointer = %key.id, "naming key generated");
        let pointer = NamePointer::new(key.id)
            .map_err(|e| ServiceError::InvalidResponse(format!("key/gen: {e}")))?;
        Ok(NameKey {
            name: key.name,
            pointer,
        })
    }

    async fn publish(&self, key_name: &str, digest: &Digest) -> ServiceResult<NamePointer> {
        let path = format!("/ipfs/{digest}");
        let request = self
            .http
            .post(self.endpoint("name/publish"))
            .query(&[("arg", path.as_str()), ("key", key_name)]);
        let published: PublishResponse = self.call_json("name/publish", request).await?;
        NamePointer::new(published.name)
            .map_err(|e| ServiceError::InvalidResponse(format!("name/publish: {e}")))
    }

    async fn resolve(&self, pointer: &NamePointer, timeout: Duration) -> ServiceResult<Digest> {
        let node_timeout = format!("{}s", timeout.as_secs().max(1));
        let request = self
            .http
            .post(self.endpoint("name/resolve"))
            .query(&[("arg", pointer.as_str()), ("timeout", node_timeout.as_str())])
            .timeout(timeout);
        let resolved: ResolveResponse = match self.call_json("name/resolve", request).await {
            Err(ServiceError::Timeout { operation, .. }) => {
                return Err(ServiceError::Timeout {
                    operation,
                    after: timeout,
                })
            }
            other => other?,
        };
        digest_from_path(&resolved.path)
    }
}

impl std::fmt::Debug for IpfsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpfsClient")
            .field("api_url", &self.config.api_url)
            .finish()
    }
}
