//! HTTP vault client (spec §4.E) — thin `reqwest` wrapper over the
//! bridge's loopback REST surface. These are the *raw* operations; the
//! auto-unlock wrapping described in §4.F lives in `vault::unlock` and
//! `vault::mod`'s `VaultClient` facade.
//!
//! Grounded on the teacher's own optional `reqwest` dependency (gated
//! there behind the `dashboard` feature for the TUI's control-plane
//! polling) — here made unconditional, since every build of this daemon
//! needs an HTTP client.

use std::time::Duration;

use keyring_common::{CoreError, VaultItem, VaultStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::redact::redact_json;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: VaultStatus,
}

#[derive(Debug, Serialize)]
struct UnlockRequest<'a> {
    password: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct UnlockResponse {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub raw: Option<String>,
}

pub struct VaultHttp {
    http: reqwest::Client,
    base_url: String,
    debug_http: bool,
}

impl VaultHttp {
    #[must_use]
    pub fn new(base_url: String, debug_http: bool) -> Self {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url,
            debug_http,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn check_status(
        &self,
        path: &str,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, CoreError> {
        let status = response.status();
        if status.as_u16() < 400 {
            return Ok(response);
        }
        let body = response.bytes().await.unwrap_or_default();
        if self.debug_http {
            tracing::debug!(path, status = status.as_u16(), body = %redact_json(&body), "vault bridge returned an error");
        }
        Err(CoreError::ApiError {
            status: status.as_u16(),
            path: path.to_string(),
            debug_body: redact_json(&body),
        })
    }

    pub async fn raw_status(&self) -> Result<VaultStatus, CoreError> {
        let path = "/status";
        let response = self
            .http
            .get(self.url(path))
            .send()
            .await
            .map_err(|_| CoreError::BridgeUnavailable)?;
        let response = self.check_status(path, response).await?;
        let parsed: StatusResponse = response
            .json()
            .await
            .map_err(|_| CoreError::ProtocolError("malformed status response".to_string()))?;
        Ok(parsed.status)
    }

    pub async fn raw_unlock(&self, password: &str) -> Result<UnlockResponse, CoreError> {
        let path = "/unlock";
        let response = self
            .http
            .post(self.url(path))
            .json(&UnlockRequest { password })
            .send()
            .await
            .map_err(|_| CoreError::BridgeUnavailable)?;
        let response = self.check_status(path, response).await?;
        response
            .json()
            .await
            .map_err(|_| CoreError::ProtocolError("malformed unlock response".to_string()))
    }

    pub async fn raw_lock(&self) -> Result<(), CoreError> {
        let path = "/lock";
        let response = self
            .http
            .post(self.url(path))
            .send()
            .await
            .map_err(|_| CoreError::BridgeUnavailable)?;
        self.check_status(path, response).await?;
        Ok(())
    }

    pub async fn raw_sync(&self) -> Result<(), CoreError> {
        let path = "/sync";
        let response = self
            .http
            .post(self.url(path))
            .send()
            .await
            .map_err(|_| CoreError::BridgeUnavailable)?;
        self.check_status(path, response).await?;
        Ok(())
    }

    pub async fn raw_list_items(&self) -> Result<Vec<VaultItem>, CoreError> {
        self.get_json_list("/items").await
    }

    pub async fn raw_search_items(&self, query: &str) -> Result<Vec<VaultItem>, CoreError> {
        let path = "/items/search";
        let response = self
            .http
            .get(self.url(path))
            .query(&[("query", query)])
            .send()
            .await
            .map_err(|_| CoreError::BridgeUnavailable)?;
        let response = self.check_status(path, response).await?;
        response
            .json()
            .await
            .map_err(|_| CoreError::ProtocolError("malformed list response".to_string()))
    }

    pub async fn raw_get_item(&self, id: &str) -> Result<VaultItem, CoreError> {
        let path = format!("/items/{id}");
        let response = self
            .http
            .get(self.url(&path))
            .send()
            .await
            .map_err(|_| CoreError::BridgeUnavailable)?;
        let response = self.check_status(&path, response).await?;
        response
            .json()
            .await
            .map_err(|_| CoreError::ProtocolError("malformed item response".to_string()))
    }

    pub async fn raw_create_item(&self, req: Value) -> Result<VaultItem, CoreError> {
        let path = "/items";
        let response = self
            .http
            .post(self.url(path))
            .json(&req)
            .send()
            .await
            .map_err(|_| CoreError::BridgeUnavailable)?;
        let response = self.check_status(path, response).await?;
        response
            .json()
            .await
            .map_err(|_| CoreError::ProtocolError("malformed item response".to_string()))
    }

    pub async fn raw_update_item(&self, id: &str, req: Value) -> Result<VaultItem, CoreError> {
        let path = format!("/items/{id}");
        let response = self
            .http
            .put(self.url(&path))
            .json(&req)
            .send()
            .await
            .map_err(|_| CoreError::BridgeUnavailable)?;
        let response = self.check_status(&path, response).await?;
        response
            .json()
            .await
            .map_err(|_| CoreError::ProtocolError("malformed item response".to_string()))
    }

    pub async fn raw_delete_item(&self, id: &str) -> Result<(), CoreError> {
        let path = format!("/items/{id}");
        let response = self
            .http
            .delete(self.url(&path))
            .send()
            .await
            .map_err(|_| CoreError::BridgeUnavailable)?;
        self.check_status(&path, response).await?;
        Ok(())
    }

    pub async fn raw_list_folders(&self) -> Result<Vec<Value>, CoreError> {
        self.get_json_list("/folders").await
    }

    async fn get_json_list<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<Vec<T>, CoreError> {
        let response = self
            .http
            .get(self.url(path))
            .send()
            .await
            .map_err(|_| CoreError::BridgeUnavailable)?;
        let response = self.check_status(path, response).await?;
        response
            .json()
            .await
            .map_err(|_| CoreError::ProtocolError("malformed list response".to_string()))
    }
}

