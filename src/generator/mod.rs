//! Generative model boundary.
//!
//! Every pipeline talks to the model through the [`Generator`] trait, so the
//! orchestration logic can be exercised with scripted fakes. [`GeminiGenerator`]
//! is the production implementation.
//!
//! | Method | Used by | Shape |
//! |--------|---------|-------|
//! | [`classify`](Generator::classify) | intent router | unary |
//! | [`rewrite`](Generator::rewrite) | retrieval coordinator | unary, best-effort |
//! | [`stream_chit_chat`](Generator::stream_chit_chat) | chit-chat pipeline | text stream |
//! | [`stream_grounded`](Generator::stream_grounded) | grounded generator | text + grounding metadata |
//! | [`stream_code_edit`](Generator::stream_code_edit) | code suggestion pipeline | serialized JSON stream |
//!
//! All calls fail with [`GenerateError`], which keeps safety-filter
//! rejections distinguishable from every other failure.

mod gemini;
pub mod prompts;

pub use gemini::GeminiGenerator;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::GenerateError;
use crate::models::{GroundingConfig, Message, SearchResult};
use crate::router::Intent;

/// One increment of a streamed generation.
///
/// `metadata` carries the provider's raw grounding payload, if the chunk had
/// one; [`crate::attribution`] turns it into [`Attribution`](crate::models::Attribution)s.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamChunk {
    pub text: String,
    pub metadata: Option<serde_json::Value>,
}

impl StreamChunk {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: None,
        }
    }
}

/// A generation stream, consumed fragment by fragment in order.
pub type TextStream = BoxStream<'static, Result<StreamChunk, GenerateError>>;

#[async_trait]
pub trait Generator: Send + Sync {
    /// Classify the intent of a user message.
    async fn classify(&self, text: &str) -> Result<Intent, GenerateError>;

    /// Rewrite a user message into a keyword-dense search phrase.
    async fn rewrite(&self, text: &str) -> Result<String, GenerateError>;

    /// Stream a conversational reply to `history`.
    async fn stream_chit_chat(
        &self,
        model: &str,
        history: &[Message],
    ) -> Result<TextStream, GenerateError>;

    /// Stream an answer grounded in `context`.
    ///
    /// With an empty `context`, implementations enable the external search
    /// tools selected in `grounding` instead.
    async fn stream_grounded(
        &self,
        model: &str,
        history: &[Message],
        context: &[SearchResult],
        grounding: &GroundingConfig,
    ) -> Result<TextStream, GenerateError>;

    /// Stream a single-file edit proposal as a serialized JSON object.
    async fn stream_code_edit(
        &self,
        model: &str,
        history: &[Message],
        context: &[SearchResult],
    ) -> Result<TextStream, GenerateError>;
}
