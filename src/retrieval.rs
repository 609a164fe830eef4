//! Retrieval coordinator.
//!
//! Queries every enabled source concurrently, tolerates partial failure, and
//! fuses what came back with [`crate::fusion::fuse`]:
//!
//! ```text
//! query ──▶ rewrite? ──▶ ┌ cloud index (network) ┐
//!                        │                       ├──▶ join_all ──▶ RRF ──▶ top-K
//!                        └ local dataset (memory)┘
//! ```
//!
//! A failing source contributes an empty list and a [`SourceWarning`]. When
//! every enabled source fails the failures are folded into a single
//! advisory. [`retrieve`] itself never fails.

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;

use crate::cloud::CloudIndex;
use crate::config::RetrievalConfig;
use crate::fusion;
use crate::generator::Generator;
use crate::local_search::search_local;
use crate::models::{GroundingConfig, SearchResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Cloud,
    Local,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::Cloud => f.write_str("cloud"),
            SourceKind::Local => f.write_str("local"),
        }
    }
}

/// A source-scoped failure. Never fatal.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceWarning {
    pub source: SourceKind,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetrievalOutcome {
    /// Fused results, best first, at most `top_k`.
    pub results: Vec<SearchResult>,
    pub warnings: Vec<SourceWarning>,
    /// Set when every enabled source failed.
    pub advisory: Option<String>,
    /// Query sent to network-backed sources (rewritten or original).
    pub query_used: String,
}

impl RetrievalOutcome {
    fn empty(query: &str) -> Self {
        Self {
            query_used: query.to_string(),
            ..Self::default()
        }
    }
}

/// Sources that will be queried for this configuration.
pub fn enabled_sources(grounding: &GroundingConfig, local_dataset: &[SearchResult]) -> Vec<SourceKind> {
    let mut sources = Vec::new();
    if grounding.use_cloud_index {
        sources.push(SourceKind::Cloud);
    }
    if grounding.use_local_dataset && !local_dataset.is_empty() {
        sources.push(SourceKind::Local);
    }
    sources
}

/// Best-effort keyword rewrite; any failure keeps the original text.
async fn rewrite_query(generator: &dyn Generator, query: &str) -> String {
    match generator.rewrite(query).await {
        Ok(rewritten) => {
            tracing::debug!(original = query, rewritten = %rewritten, "rewrote query");
            rewritten
        }
        Err(e) => {
            tracing::warn!(error = %e, "query rewrite failed, using original text");
            query.to_string()
        }
    }
}

/// Run one retrieval round.
pub async fn retrieve(
    generator: &dyn Generator,
    cloud: &dyn CloudIndex,
    query: &str,
    grounding: &GroundingConfig,
    local_dataset: &[SearchResult],
    config: &RetrievalConfig,
) -> RetrievalOutcome {
    let sources = enabled_sources(grounding, local_dataset);
    if sources.is_empty() || query.trim().is_empty() {
        return RetrievalOutcome::empty(query);
    }

    let network_enabled = sources.contains(&SourceKind::Cloud);
    let query_used = if network_enabled && query.trim().chars().count() > config.rewrite_min_chars {
        rewrite_query(generator, query).await
    } else {
        query.to_string()
    };

    let mut calls: Vec<BoxFuture<'_, (SourceKind, anyhow::Result<Vec<SearchResult>>)>> = Vec::new();
    for source in &sources {
        match source {
            SourceKind::Cloud => {
                let q = query_used.as_str();
                calls.push(async move { (SourceKind::Cloud, cloud.search(q).await) }.boxed());
            }
            SourceKind::Local => {
                let snippet_chars = config.local_snippet_chars;
                calls.push(
                    async move {
                        (
                            SourceKind::Local,
                            Ok(search_local(query, local_dataset, snippet_chars)),
                        )
                    }
                    .boxed(),
                );
            }
        }
    }

    let mut lists = Vec::with_capacity(sources.len());
    let mut warnings = Vec::new();
    for (source, result) in join_all(calls).await {
        match result {
            Ok(list) => {
                tracing::debug!(source = %source, count = list.len(), "source returned");
                lists.push(list);
            }
            Err(e) => {
                tracing::warn!(source = %source, error = %e, "retrieval source failed");
                warnings.push(SourceWarning {
                    source,
                    message: format!("{:#}", e),
                });
                lists.push(Vec::new());
            }
        }
    }

    let advisory = if warnings.len() == sources.len() {
        let detail = warnings
            .iter()
            .map(|w| format!("{}: {}", w.source, w.message))
            .collect::<Vec<_>>()
            .join("; ");
        Some(format!("All retrieval sources failed ({})", detail))
    } else {
        None
    };

    let results = fusion::fuse(&lists, config.rrf_k, config.top_k);
    tracing::info!(count = results.len(), failed = warnings.len(), "retrieval complete");

    RetrievalOutcome {
        results,
        warnings,
        advisory,
        query_used,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GenerateError;
    use crate::generator::TextStream;
    use crate::models::{FileRef, Message};
    use crate::router::Intent;
    use anyhow::bail;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RewriteOnly {
        reply: Result<String, GenerateError>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Generator for RewriteOnly {
        async fn classify(&self, _text: &str) -> Result<Intent, GenerateError> {
            unreachable!()
        }
        async fn rewrite(&self, _text: &str) -> Result<String, GenerateError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reply.clone()
        }
        async fn stream_chit_chat(&self, _m: &str, _h: &[Message]) -> Result<TextStream, GenerateError> {
            unreachable!()
        }
        async fn stream_grounded(
            &self,
            _m: &str,
            _h: &[Message],
            _c: &[SearchResult],
            _g: &GroundingConfig,
        ) -> Result<TextStream, GenerateError> {
            unreachable!()
        }
        async fn stream_code_edit(
            &self,
            _m: &str,
            _h: &[Message],
            _c: &[SearchResult],
        ) -> Result<TextStream, GenerateError> {
            unreachable!()
        }
    }

    struct FakeCloud {
        fail: bool,
        seen: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CloudIndex for FakeCloud {
        async fn search(&self, query: &str) -> anyhow::Result<Vec<SearchResult>> {
            self.seen.lock().unwrap().push(query.to_string());
            if self.fail {
                bail!("connection refused");
            }
            Ok(vec![doc("cloud:1", "remote.md", "remote hello")])
        }
        async fn list_files(&self) -> anyhow::Result<Vec<FileRef>> {
            Ok(Vec::new())
        }
        async fn fetch_content(&self, _file: &FileRef) -> anyhow::Result<String> {
            bail!("not used")
        }
    }

    fn doc(id: &str, name: &str, body: &str) -> SearchResult {
        SearchResult {
            file: FileRef {
                id: id.to_string(),
                name: name.to_string(),
                containing_path: "notes".to_string(),
            },
            snippet: body.to_string(),
            relevance: 0.0,
        }
    }

    fn generator(reply: Result<String, GenerateError>) -> RewriteOnly {
        RewriteOnly {
            reply,
            calls: AtomicUsize::new(0),
        }
    }

    fn cloud(fail: bool) -> FakeCloud {
        FakeCloud {
            fail,
            seen: std::sync::Mutex::new(Vec::new()),
        }
    }

    #[tokio::test]
    async fn test_no_sources_returns_empty() {
        let g = generator(Ok("x".into()));
        let c = cloud(false);
        let out = retrieve(&g, &c, "hello", &GroundingConfig::none(), &[], &RetrievalConfig::default()).await;
        assert!(out.results.is_empty());
        assert!(out.advisory.is_none());
        assert!(c.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_local_only_finds_match_without_rewrite() {
        let g = generator(Ok("unused".into()));
        let c = cloud(false);
        let dataset = vec![doc("local:notes.md", "notes.md", "hello world")];
        let out = retrieve(
            &g,
            &c,
            "hello there friendly world",
            &GroundingConfig::local_only(),
            &dataset,
            &RetrievalConfig::default(),
        )
        .await;
        assert_eq!(out.results.len(), 1);
        assert_eq!(g.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cloud_failure_is_advisory() {
        let g = generator(Ok("kw".into()));
        let c = cloud(true);
        let out = retrieve(&g, &c, "hi", &GroundingConfig::baseline(), &[], &RetrievalConfig::default()).await;
        assert!(out.results.is_empty());
        assert_eq!(out.warnings.len(), 1);
        assert_eq!(out.warnings[0].source, SourceKind::Cloud);
        assert!(out.advisory.unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_other_source() {
        let g = generator(Ok("kw".into()));
        let c = cloud(true);
        let dataset = vec![doc("local:a.md", "a.md", "hello")];
        let grounding = GroundingConfig {
            use_cloud_index: true,
            use_local_dataset: true,
            ..GroundingConfig::none()
        };
        let out = retrieve(&g, &c, "hello", &grounding, &dataset, &RetrievalConfig::default()).await;
        assert_eq!(out.results.len(), 1);
        assert_eq!(out.warnings.len(), 1);
        assert!(out.advisory.is_none());
    }

    #[tokio::test]
    async fn test_long_query_is_rewritten_for_cloud() {
        let g = generator(Ok("billing release notes".into()));
        let c = cloud(false);
        let out = retrieve(
            &g,
            &c,
            "what changed about billing in the release notes?",
            &GroundingConfig::baseline(),
            &[],
            &RetrievalConfig::default(),
        )
        .await;
        assert_eq!(out.query_used, "billing release notes");
        assert_eq!(c.seen.lock().unwrap()[0], "billing release notes");
    }

    #[tokio::test]
    async fn test_rewrite_failure_falls_back() {
        let g = generator(Err(GenerateError::Other("quota".into())));
        let c = cloud(false);
        let query = "what changed about billing in the release notes?";
        let out = retrieve(&g, &c, query, &GroundingConfig::baseline(), &[], &RetrievalConfig::default()).await;
        assert_eq!(out.query_used, query);
        assert_eq!(out.results.len(), 1);
    }
}
