//! Anchoring Gateway Client
//!
//! Talks to an HTTP gateway that fronts the anchoring contract. The
//! gateway owns signing and gas; this client only submits roots and
//! reads back their on-chain state.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::anchor::{AnchorReceipt, AnchoredEvent, ChainAnchorer};
use crate::config::ChainConfig;
use crate::error::{AnchorError, Result};

/// `ChainAnchorer` backed by the anchoring gateway's REST API.
pub struct GatewayChainAnchorer {
    base_url: String,
    api_token: Option<String>,
    http_client: Client,
}

#[derive(Serialize)]
struct AnchorRequest<'a> {
    root: &'a str,
}

#[derive(Deserialize)]
struct VerifyResponse {
    timestamp: u64,
}

impl GatewayChainAnchorer {
    pub fn new(base_url: impl Into<String>, api_token: Option<String>, timeout: Duration) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AnchorError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_token,
            http_client,
        })
    }

    /// Client for the configured gateway, `None` if no gateway is set.
    pub fn from_config(config: &ChainConfig) -> Result<Option<Self>> {
        match &config.gateway_url {
            Some(url) => Ok(Some(Self::new(
                url.clone(),
                config.api_token.clone(),
                Duration::from_secs(config.timeout_secs),
            )?)),
            None => Ok(None),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/anchors{}", self.base_url, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| AnchorError::ChainError(format!("Gateway request failed: {}", e)))?;

        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AnchorError::ChainError(format!(
                "Gateway returned {}: {}",
                status, body
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AnchorError::ChainError(format!("Invalid gateway response: {}", e)))
    }
}

#[async_trait]
impl ChainAnchorer for GatewayChainAnchorer {
    async fn anchor_root(&self, root: &str) -> Result<AnchorReceipt> {
        info!(root = %root, "Submitting root to anchoring gateway");
        let request = self
            .http_client
            .post(self.url(""))
            .json(&AnchorRequest { root });
        self.send(request).await
    }

    async fn verify_root(&self, root: &str) -> Result<u64> {
        debug!(root = %root, "Verifying root with anchoring gateway");
        let request = self.http_client.get(self.url(&format!("/{}", root)));
        let response: VerifyResponse = self.send(request).await?;
        Ok(response.timestamp)
    }

    async fn find_root_anchored_event(&self, root: &str) -> Result<AnchoredEvent> {
        debug!(root = %root, "Looking up anchored event");
        let request = self.http_client.get(self.url(&format!("/{}/event", root)));
        self.send(request).await
    }
}
