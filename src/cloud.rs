//! Cloud full-text index boundary.
//!
//! Defines the [`CloudIndex`] trait the retrieval coordinator and the code
//! suggestion pipeline depend on, plus two implementations:
//! - **[`HttpCloudIndex`]**: talks to the search backend's JSON API.
//! - **[`UnconfiguredCloudIndex`]**: used when `[cloud].base_url` is unset;
//!   every call fails, which the coordinator treats as a source failure.
//!
//! # Backend API
//!
//! | Method | Path | Response |
//! |--------|------|----------|
//! | `POST` | `/api/search` `{"query"}` | `[{source:{id,file_name,path}, contentSnippet, score}]` |
//! | `GET`  | `/api/files` | `[{id, file_name, path}]` |
//! | `GET`  | `/api/files/{id}` | `{content}` |
//!
//! # Retry Strategy
//!
//! - HTTP 429 and 5xx → retry with exponential backoff (1s, 2s, 4s, …)
//! - Other 4xx → fail immediately, surfacing the backend's `detail` field
//! - Network errors → retry

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::config::CloudConfig;
use crate::models::{FileRef, SearchResult};

/// Prefix that makes cloud file ids unique against other sources.
pub const CLOUD_ID_PREFIX: &str = "cloud:";

/// Network-backed full-text index.
#[async_trait]
pub trait CloudIndex: Send + Sync {
    /// Search the index. Results are ranked best-first.
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>>;

    /// List every file known to the index.
    async fn list_files(&self) -> Result<Vec<FileRef>>;

    /// Fetch the full text of a file returned by this index.
    async fn fetch_content(&self, file: &FileRef) -> Result<String>;
}

/// Build the cloud index described by the configuration.
pub fn create_cloud_index(config: &CloudConfig) -> Result<Box<dyn CloudIndex>> {
    match &config.base_url {
        Some(url) => Ok(Box::new(HttpCloudIndex::new(url, config)?)),
        None => Ok(Box::new(UnconfiguredCloudIndex)),
    }
}

// ============ Unconfigured ============

/// Stand-in used when no backend URL is configured.
pub struct UnconfiguredCloudIndex;

#[async_trait]
impl CloudIndex for UnconfiguredCloudIndex {
    async fn search(&self, _query: &str) -> Result<Vec<SearchResult>> {
        bail!("cloud index not configured (set [cloud].base_url)")
    }

    async fn list_files(&self) -> Result<Vec<FileRef>> {
        bail!("cloud index not configured (set [cloud].base_url)")
    }

    async fn fetch_content(&self, file: &FileRef) -> Result<String> {
        bail!(
            "cannot fetch {}: cloud index not configured (set [cloud].base_url)",
            file.full_path()
        )
    }
}

// ============ HTTP ============

pub struct HttpCloudIndex {
    base_url: String,
    client: reqwest::Client,
    max_retries: u32,
}

#[derive(Deserialize)]
struct RawSource {
    id: String,
    #[serde(default)]
    file_name: String,
    #[serde(default)]
    path: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawHit {
    source: RawSource,
    #[serde(default)]
    content_snippet: String,
    #[serde(default)]
    score: f64,
}

#[derive(Deserialize)]
struct RawContent {
    content: String,
}

impl HttpCloudIndex {
    pub fn new(base_url: &str, config: &CloudConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            max_retries: config.max_retries,
        })
    }

    async fn send_with_retry(
        &self,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<serde_json::Value> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            match build().send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return Ok(response.json().await?);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    let message = backend_detail(&body_text);

                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(anyhow!("cloud index error {}: {}", status, message));
                        continue;
                    }

                    bail!("cloud index error {}: {}", status, message);
                }
                Err(e) => {
                    last_err = Some(anyhow!(
                        "cloud index unreachable at {}: {}",
                        self.base_url,
                        e
                    ));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("cloud index request failed after retries")))
    }
}

#[async_trait]
impl CloudIndex for HttpCloudIndex {
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>> {
        let url = format!("{}/api/search", self.base_url);
        let body = serde_json::json!({ "query": query });
        let json = self
            .send_with_retry(|| self.client.post(&url).json(&body))
            .await?;
        parse_search_response(json)
    }

    async fn list_files(&self) -> Result<Vec<FileRef>> {
        let url = format!("{}/api/files", self.base_url);
        let json = self.send_with_retry(|| self.client.get(&url)).await?;
        let raw: Vec<RawSource> = serde_json::from_value(json)
            .map_err(|e| anyhow!("Invalid file list response: {}", e))?;
        Ok(raw.into_iter().map(to_file_ref).collect())
    }

    async fn fetch_content(&self, file: &FileRef) -> Result<String> {
        let raw_id = file
            .id
            .strip_prefix(CLOUD_ID_PREFIX)
            .ok_or_else(|| anyhow!("{} is not a cloud file", file.id))?;
        let url = format!("{}/api/files/{}", self.base_url, urlencoding::encode(raw_id));
        let json = self.send_with_retry(|| self.client.get(&url)).await?;
        let raw: RawContent = serde_json::from_value(json)
            .map_err(|e| anyhow!("Invalid file content response: {}", e))?;
        Ok(raw.content)
    }
}

fn to_file_ref(raw: RawSource) -> FileRef {
    FileRef {
        id: format!("{}{}", CLOUD_ID_PREFIX, raw.id),
        name: raw.file_name,
        containing_path: raw.path.trim_end_matches('/').to_string(),
    }
}

fn parse_search_response(json: serde_json::Value) -> Result<Vec<SearchResult>> {
    let hits: Vec<RawHit> = serde_json::from_value(json)
        .map_err(|e| anyhow!("Invalid search response: {}", e))?;

    Ok(hits
        .into_iter()
        .filter(|h| !h.content_snippet.is_empty())
        .map(|h| SearchResult {
            file: to_file_ref(h.source),
            snippet: h.content_snippet,
            relevance: h.score,
        })
        .collect())
}

/// Pull `detail` out of an error body, falling back to the raw text.
fn backend_detail(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("detail").and_then(|d| d.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}
