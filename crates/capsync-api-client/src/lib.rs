//! HTTP client for the capture API.
//!
//! Provides [`ApiClient`] with JSON and multipart helpers that map every
//! failure onto [`TransferError`], plus domain methods (capture creation,
//! streamed image upload, admin transitions) in [`api`]. The client implements
//! the queue's collaborator traits, so the CLI hands it straight to the engine.

pub mod api;

use std::time::Duration;

use anyhow::{Context, Result};
use capsync_core::{Config, TransferError};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;

pub use api::{ADMIN_TOKEN_HEADER, UPLOAD_CHUNK_SIZE};

/// HTTP client for the capture API.
#[derive(Clone, Debug)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: Option<String>,
    message: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            config.api_url.clone(),
            Duration::from_secs(config.http_timeout_secs),
        )
    }

    /// Create client from environment (`CAPSYNC_API_URL`, `CAPSYNC_HTTP_TIMEOUT_SECS`).
    pub fn from_env() -> Result<Self> {
        let config = Config::from_env()?;
        Self::from_config(&config)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn build_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// POST JSON body and deserialize response.
    pub async fn post_json<T: DeserializeOwned, B: serde::Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, TransferError> {
        let request = self.client.post(self.build_url(path)).json(body);
        self.send(request).await
    }

    /// POST multipart form and deserialize response.
    pub async fn post_multipart<T: DeserializeOwned>(
        &self,
        path: &str,
        form: reqwest::multipart::Form,
    ) -> Result<T, TransferError> {
        let request = self.client.post(self.build_url(path)).multipart(form);
        self.send(request).await
    }

    /// Send a prepared request and decode a JSON success body.
    pub async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, TransferError> {
        let response = request
            .send()
            .await
            .map_err(|e| TransferError::transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(error_from_response(response).await);
        }

        response.json::<T>().await.map_err(|e| {
            if e.is_decode() {
                TransferError::MalformedResponse(e.to_string())
            } else {
                TransferError::transport(e.to_string())
            }
        })
    }
}

/// Build an HTTP error from a non-success response. The `{"error": {...}}`
/// envelope supplies code and message when present.
async fn error_from_response(response: Response) -> TransferError {
    let status = response.status().as_u16();
    let text = response.text().await.unwrap_or_default();

    match serde_json::from_str::<ErrorEnvelope>(&text) {
        Ok(envelope) => TransferError::Http {
            status,
            code: envelope.error.code,
            message: envelope
                .error
                .message
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| format!("HTTP {}", status)),
        },
        Err(_) => {
            tracing::debug!(status, body_len = text.len(), "Error response without envelope");
            TransferError::http_status(status)
        }
    }
}
