//! Artifact delivery.
//!
//! A finished GIF leaves the pipeline through an [`ArtifactSink`]. The HTTP
//! sink posts the base64 payload as the form field `img` and reads back a
//! JSON reply carrying either `url` or `error`.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use cinemagraph_common::config::DeliveryConfig;
use cinemagraph_common::error::{CinemagraphError, CinemagraphResult};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Destination for finished artifacts. Returns a locator for the stored GIF.
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(&self, gif: &[u8]) -> CinemagraphResult<String>;
}

#[derive(Debug, Deserialize)]
struct DeliveryReply {
    url: Option<String>,
    error: Option<String>,
}

/// Interpret an upload endpoint's JSON body.
pub fn parse_delivery_reply(body: &str) -> CinemagraphResult<String> {
    let reply: DeliveryReply = serde_json::from_str(body).map_err(|e| {
        CinemagraphError::upload_fault(format!("Unreadable delivery reply: {e}"))
    })?;
    match reply {
        DeliveryReply {
            error: Some(error), ..
        } => Err(CinemagraphError::upload_fault(error)),
        DeliveryReply { url: Some(url), .. } if !url.is_empty() => Ok(url),
        _ => Err(CinemagraphError::upload_fault(
            "Delivery reply carried neither url nor error",
        )),
    }
}

/// Posts GIFs to an HTTP upload endpoint.
pub struct HttpArtifactSink {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpArtifactSink {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> CinemagraphResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CinemagraphError::config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    /// Build from configuration. `None` when no endpoint is configured.
    pub fn from_config(config: &DeliveryConfig) -> CinemagraphResult<Option<Self>> {
        match &config.endpoint {
            Some(endpoint) if !endpoint.trim().is_empty() => Ok(Some(Self::new(
                endpoint.trim(),
                Duration::from_secs(config.timeout_secs),
            )?)),
            _ => Ok(None),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ArtifactSink for HttpArtifactSink {
    fn name(&self) -> &str {
        "http"
    }

    async fn deliver(&self, gif: &[u8]) -> CinemagraphResult<String> {
        let payload = BASE64.encode(gif);
        tracing::info!(
            endpoint = %self.endpoint,
            bytes = gif.len(),
            "Uploading artifact"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .form(&[("img", payload)])
            .send()
            .await
            .map_err(|e| CinemagraphError::upload_fault(format!("Upload request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CinemagraphError::upload_fault(format!("Failed to read reply: {e}")))?;

        if !status.is_success() {
            return Err(CinemagraphError::upload_fault(format!(
                "Upload endpoint returned {status}: {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        let url = parse_delivery_reply(&body)?;
        tracing::info!(url = %url, "Artifact delivered");
        Ok(url)
    }
}

/// Writes GIFs into a local directory and returns `file://` locators.
#[derive(Debug, Clone)]
pub struct FileArtifactSink {
    dir: PathBuf,
}

impl FileArtifactSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl ArtifactSink for FileArtifactSink {
    fn name(&self) -> &str {
        "file"
    }

    async fn deliver(&self, gif: &[u8]) -> CinemagraphResult<String> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| CinemagraphError::upload_fault(format!("Cannot create output dir: {e}")))?;

        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
        let path = self.dir.join(format!("cinemagraph-{stamp}.gif"));
        tokio::fs::write(&path, gif)
            .await
            .map_err(|e| CinemagraphError::upload_fault(format!("Failed to write artifact: {e}")))?;

        let absolute = tokio::fs::canonicalize(&path).await.unwrap_or(path);
        tracing::info!(path = %absolute.display(), bytes = gif.len(), "Artifact written");
        Ok(format!("file://{}", absolute.display()))
    }
}
