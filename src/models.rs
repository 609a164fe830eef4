//! Core data models used throughout Groundwork.
//!
//! These types represent the sessions, messages, retrieval results, and edit
//! proposals that flow through a chat turn. All of them serialize to the
//! camelCase JSON shape used by the persisted state snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Title given to sessions created from "new chat".
pub const DEFAULT_SESSION_TITLE: &str = "New Chat";

/// Identity of a file known to a retrieval source.
///
/// `id` is source-qualified (`"local:src/main.rs"`, `"cloud:abc123"`) and is
/// the only identity key; `name` and `containing_path` are display data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRef {
    pub id: String,
    pub name: String,
    pub containing_path: String,
}

impl FileRef {
    /// The path used to resolve model-proposed edits: `containing_path/name`.
    pub fn full_path(&self) -> String {
        format!("{}/{}", self.containing_path, self.name)
    }

    /// Lowercased file extension, if the name has one.
    pub fn extension(&self) -> Option<String> {
        let (stem, ext) = self.name.rsplit_once('.')?;
        if stem.is_empty() && !self.name.starts_with('.') {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }
}

/// A single retrieval hit.
///
/// `relevance` is only meaningful relative to other results from the same
/// source until the lists have been fused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub file: FileRef,
    pub snippet: String,
    pub relevance: f64,
}

/// Which grounding sources are enabled for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroundingConfig {
    #[serde(default)]
    pub use_cloud_index: bool,
    #[serde(default)]
    pub use_local_dataset: bool,
    #[serde(default)]
    pub use_web_search: bool,
    #[serde(default)]
    pub use_maps_search: bool,
}

impl GroundingConfig {
    /// Baseline applied to new chats and to restored sessions without a config.
    pub const fn baseline() -> Self {
        Self {
            use_cloud_index: true,
            use_local_dataset: false,
            use_web_search: false,
            use_maps_search: false,
        }
    }

    pub const fn none() -> Self {
        Self {
            use_cloud_index: false,
            use_local_dataset: false,
            use_web_search: false,
            use_maps_search: false,
        }
    }

    pub const fn local_only() -> Self {
        Self {
            use_local_dataset: true,
            ..Self::none()
        }
    }

    pub fn any_enabled(&self) -> bool {
        self.use_cloud_index || self.use_local_dataset || self.use_web_search || self.use_maps_search
    }

    /// Web or maps search can stand in when document retrieval finds nothing.
    pub fn external_search_enabled(&self) -> bool {
        self.use_web_search || self.use_maps_search
    }

    /// Web search on, every other source off.
    pub fn web_search_only(&self) -> bool {
        self.use_web_search && !self.use_cloud_index && !self.use_local_dataset && !self.use_maps_search
    }
}

impl Default for GroundingConfig {
    fn default() -> Self {
        Self::baseline()
    }
}

/// Kind of an external attribution reported by the generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributionKind {
    Web,
    Maps,
}

/// An external source (web page, place) backing a grounded answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribution {
    pub kind: AttributionKind,
    pub uri: String,
    pub title: String,
}

/// Lifecycle of a code suggestion. Leaves `Pending` exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionStatus {
    Pending,
    Accepted,
    Rejected,
}

impl std::fmt::Display for SuggestionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SuggestionStatus::Pending => write!(f, "pending"),
            SuggestionStatus::Accepted => write!(f, "accepted"),
            SuggestionStatus::Rejected => write!(f, "rejected"),
        }
    }
}

/// A single-file edit proposed by the code suggestion pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeSuggestion {
    pub target_file: FileRef,
    pub rationale: String,
    pub original_content: String,
    pub proposed_content: String,
    pub status: SuggestionStatus,
}

/// A file attached to a user message.
///
/// `data` is base64-encoded file bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub name: String,
    pub mime_type: String,
    pub data: String,
}

impl Attachment {
    pub fn is_text(&self) -> bool {
        self.mime_type.starts_with("text/")
            || matches!(
                self.mime_type.as_str(),
                "application/json" | "application/xml" | "application/toml" | "application/yaml"
            )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// How a model message was produced, used by renderers to style it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    /// Plain user input.
    Prompt,
    /// Placeholder or partially streamed content.
    Pending,
    /// Conversational answer without retrieval.
    ChitChat,
    /// Answer grounded in retrieved documents.
    Grounded,
    /// Answer grounded through web or maps search.
    ExternalSearch,
    /// Carries a code suggestion.
    CodeEdit,
    /// Informational notice (applied/discarded edits, nothing editable found).
    Info,
    /// Terminal failure of a turn.
    Error,
}

/// One entry of a session's message log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
    #[serde(default)]
    pub citation_sources: Vec<SearchResult>,
    #[serde(default)]
    pub external_attributions: Vec<Attribution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<CodeSuggestion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_edit_ref: Option<FileRef>,
    #[serde(default = "default_response_kind")]
    pub response_kind: ResponseKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_ref: Option<String>,
}

fn default_response_kind() -> ResponseKind {
    ResponseKind::ChitChat
}

impl Message {
    pub fn user(content: impl Into<String>, attachment: Option<Attachment>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            attachment,
            citation_sources: Vec::new(),
            external_attributions: Vec::new(),
            suggestion: None,
            applied_edit_ref: None,
            response_kind: ResponseKind::Prompt,
            model_ref: None,
        }
    }

    pub fn model(content: impl Into<String>, kind: ResponseKind, model_ref: Option<String>) -> Self {
        Self {
            role: Role::Model,
            content: content.into(),
            attachment: None,
            citation_sources: Vec::new(),
            external_attributions: Vec::new(),
            suggestion: None,
            applied_edit_ref: None,
            response_kind: kind,
            model_ref,
        }
    }

    /// Empty model message shown while a turn is in flight.
    pub fn placeholder(model_ref: &str) -> Self {
        Self::model("", ResponseKind::Pending, Some(model_ref.to_string()))
    }

    pub fn is_error(&self) -> bool {
        self.response_kind == ResponseKind::Error
    }
}

/// A chat session with its own message log, dataset, and grounding flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_source_ref: Option<String>,
    #[serde(default)]
    pub local_dataset: Vec<SearchResult>,
    #[serde(default)]
    pub grounding_config: GroundingConfig,
}

impl Session {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.into(),
            messages: Vec::new(),
            created_at: Utc::now(),
            data_source_ref: None,
            local_dataset: Vec::new(),
            grounding_config: GroundingConfig::baseline(),
        }
    }

    /// The most recent user message text, if any.
    pub fn latest_user_query(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }

    pub fn has_local_file(&self, id: &str) -> bool {
        self.local_dataset.iter().any(|r| r.file.id == id)
    }
}

/// Ledger entry for a file changed by an accepted suggestion.
///
/// `original_content` is captured on the first accepted edit and never
/// replaced afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditedFile {
    pub file: FileRef,
    pub original_content: String,
    pub current_content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str) -> FileRef {
        FileRef {
            id: format!("local:{}", name),
            name: name.to_string(),
            containing_path: "repo/src".to_string(),
        }
    }

    #[test]
    fn test_full_path_joins_with_slash() {
        assert_eq!(file("main.rs").full_path(), "repo/src/main.rs");
    }

    #[test]
    fn test_extension_lowercased() {
        assert_eq!(file("README.MD").extension().as_deref(), Some("md"));
        assert_eq!(file("Makefile").extension(), None);
        assert_eq!(file(".env").extension().as_deref(), Some("env"));
    }

    #[test]
    fn test_partial_grounding_fills_missing_flags_with_false() {
        let cfg: GroundingConfig = serde_json::from_str(r#"{"useWebSearch":true}"#).unwrap();
        assert_eq!(
            cfg,
            GroundingConfig {
                use_web_search: true,
                ..GroundingConfig::none()
            }
        );
    }

    #[test]
    fn test_web_search_only() {
        let cfg = GroundingConfig {
            use_web_search: true,
            ..GroundingConfig::none()
        };
        assert!(cfg.web_search_only());
        let cfg = GroundingConfig {
            use_web_search: true,
            use_maps_search: true,
            ..GroundingConfig::none()
        };
        assert!(!cfg.web_search_only());
    }

    #[test]
    fn test_message_backfills_missing_lists() {
        let json = r#"{"role":"model","content":"hi"}"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert!(msg.citation_sources.is_empty());
        assert!(msg.external_attributions.is_empty());
        assert_eq!(msg.response_kind, ResponseKind::ChitChat);
    }

    #[test]
    fn test_session_defaults_grounding_to_baseline() {
        let json = r#"{"id":"s1","title":"t","createdAt":"2024-01-01T00:00:00Z"}"#;
        let session: Session = serde_json::from_str(json).unwrap();
        assert_eq!(session.grounding_config, GroundingConfig::baseline());
        assert!(session.messages.is_empty());
    }
}
