//! Intent routing.
//!
//! A user turn is dispatched to exactly one [`Pipeline`]. The decision has
//! two stages:
//!
//! 1. **Classification**: one unary call to the generator, skipped entirely
//!    when no grounding source is enabled and nothing is attached.
//! 2. **Routing**: [`route`], a pure table over
//!    `(intent, grounding, attachment_present, code_gen_enabled)`.
//!
//! A classifier failure never blocks the turn: the intent falls back to
//! [`Intent::QueryDocuments`] and the failure is reported as an advisory.

use crate::generator::Generator;
use crate::models::GroundingConfig;

/// Classification outcome for a user message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    QueryDocuments,
    GenerateCode,
    ChitChat,
    Unknown,
}

impl Intent {
    /// Normalize a raw classifier reply into an intent.
    ///
    /// Case, surrounding quotes, trailing punctuation and `-`/`_` spelling
    /// are ignored. A `Label:` prefix echoed back by the model is tolerated.
    pub fn from_label(label: &str) -> Self {
        let first_line = label.trim().lines().next().unwrap_or("");
        let lowered = first_line.to_lowercase();
        let without_prefix = lowered.strip_prefix("label:").unwrap_or(&lowered);
        let normalized: String = without_prefix
            .trim()
            .trim_matches(|c: char| !c.is_alphanumeric() && c != '_' && c != '-')
            .replace(['-', ' '], "_");

        match normalized.as_str() {
            "query_documents" => Intent::QueryDocuments,
            "generate_code" => Intent::GenerateCode,
            "chit_chat" => Intent::ChitChat,
            _ => Intent::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::QueryDocuments => "query_documents",
            Intent::GenerateCode => "generate_code",
            Intent::ChitChat => "chit_chat",
            Intent::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Downstream pipeline selected for a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pipeline {
    ChitChat,
    Grounded,
    CodeSuggestion,
}

/// Outcome of [`decide`].
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingDecision {
    /// `None` when classification was skipped.
    pub intent: Option<Intent>,
    pub pipeline: Pipeline,
    pub advisory: Option<String>,
}

/// Whether the classifier should be consulted at all.
pub fn needs_classification(grounding: &GroundingConfig, attachment_present: bool) -> bool {
    grounding.any_enabled() || attachment_present
}

/// Routing table.
pub fn route(
    intent: Intent,
    grounding: &GroundingConfig,
    attachment_present: bool,
    code_gen_enabled: bool,
) -> Pipeline {
    if !needs_classification(grounding, attachment_present) {
        return Pipeline::ChitChat;
    }

    match intent {
        Intent::GenerateCode if code_gen_enabled => Pipeline::CodeSuggestion,
        // An attachment always implies grounding intent.
        Intent::ChitChat if attachment_present => Pipeline::Grounded,
        // Web search stands in for small talk when it is the only source.
        Intent::ChitChat if grounding.web_search_only() => Pipeline::Grounded,
        _ => Pipeline::Grounded,
    }
}

/// Classify `text` (when needed) and pick a pipeline.
pub async fn decide(
    generator: &dyn Generator,
    text: &str,
    grounding: &GroundingConfig,
    attachment_present: bool,
    code_gen_enabled: bool,
) -> RoutingDecision {
    if !needs_classification(grounding, attachment_present) {
        tracing::debug!("no grounding source or attachment, skipping classification");
        return RoutingDecision {
            intent: None,
            pipeline: Pipeline::ChitChat,
            advisory: None,
        };
    }

    let (intent, advisory) = match generator.classify(text).await {
        Ok(intent) => (intent, None),
        Err(e) => {
            tracing::warn!(error = %e, "intent classification failed, assuming query_documents");
            (
                Intent::QueryDocuments,
                Some(format!("Intent classification failed ({}); searching documents instead.", e)),
            )
        }
    };

    let pipeline = route(intent, grounding, attachment_present, code_gen_enabled);
    tracing::debug!(intent = %intent, pipeline = ?pipeline, "routed turn");

    RoutingDecision {
        intent: Some(intent),
        pipeline,
        advisory,
    }
}
