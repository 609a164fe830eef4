//! Code suggestion pipeline.
//!
//! Turns an edit request into a single-file [`CodeSuggestion`]:
//!
//! 1. Append an "analyzing" placeholder.
//! 2. Retrieve candidates and keep only [`EDITABLE_EXTENSIONS`].
//! 3. Ask the generator for `{filePath, thought, newContent}` or `{error}`.
//! 4. Parse the whole response, resolve `filePath` against every known file
//!    (`containing_path/name`, exact match), and load the original content.
//! 5. Attach a pending suggestion to the tail message.
//!
//! Every failure finalizes the tail message; nothing is left "analyzing".
//!
//! [`accept_suggestion`] and [`reject_suggestion`] are the two terminal
//! transitions of a pending suggestion.

use serde::Deserialize;

use crate::cloud::CloudIndex;
use crate::dataset::LOCAL_ID_PREFIX;
use crate::error::SuggestionError;
use crate::grounded::{consume_stream, failure_message};
use crate::models::{
    CodeSuggestion, FileRef, Message, ResponseKind, SearchResult, SuggestionStatus,
};
use crate::orchestrator::Backends;
use crate::retrieval::{self, RetrievalOutcome};
use crate::session::SessionStore;

/// Extensions of files the pipeline may propose edits for.
pub const EDITABLE_EXTENSIONS: &[&str] = &[
    // source
    "rs", "py", "js", "jsx", "mjs", "ts", "tsx", "go", "java", "kt", "c", "h", "cpp", "hpp",
    "cs", "rb", "php", "swift", "scala", "sh", "sql", "vue", "svelte",
    // markup and data
    "html", "xml", "json", "yaml", "yml", "toml", "csv", "graphql",
    // config and text
    "md", "txt", "ini", "cfg", "conf",
    // styles
    "css", "scss", "less",
];

pub const ANALYZING_MESSAGE: &str = "Analyzing your request…";

pub const NO_EDITABLE_MESSAGE: &str = "I couldn't find any editable files related to your request. Try mentioning the file or feature you want to change.";

pub const MALFORMED_MESSAGE: &str =
    "I couldn't understand the model's edit proposal. Please try rephrasing your request.";

pub fn is_editable(file: &FileRef) -> bool {
    file.extension()
        .map(|ext| EDITABLE_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

// ============ Response parsing ============

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEdit {
    file_path: Option<String>,
    thought: Option<String>,
    new_content: Option<String>,
    error: Option<String>,
}

/// A parsed structured edit response.
#[derive(Debug, Clone, PartialEq)]
pub enum EditResponse {
    Proposal {
        file_path: String,
        thought: String,
        new_content: String,
    },
    /// The model declined through the `error` field.
    Declined(String),
    Malformed,
}

fn strip_markdown_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(without_open) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match without_open.find('\n') {
        Some(idx) => &without_open[idx + 1..],
        None => without_open,
    };
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// Parse the accumulated response text as one structured value.
pub fn parse_edit_response(text: &str) -> EditResponse {
    let clean = strip_markdown_fences(text);
    let raw: RawEdit = match serde_json::from_str(clean) {
        Ok(raw) => raw,
        Err(_) => {
            let fragment = clean
                .find('{')
                .zip(clean.rfind('}'))
                .filter(|(start, end)| start <= end)
                .map(|(start, end)| &clean[start..=end]);
            match fragment.and_then(|f| serde_json::from_str(f).ok()) {
                Some(raw) => raw,
                None => return EditResponse::Malformed,
            }
        }
    };

    if let Some(error) = raw.error.filter(|e| !e.trim().is_empty()) {
        return EditResponse::Declined(error);
    }

    match (raw.file_path, raw.new_content) {
        (Some(file_path), Some(new_content)) if !file_path.trim().is_empty() => {
            EditResponse::Proposal {
                file_path: file_path.trim().to_string(),
                thought: raw.thought.unwrap_or_default(),
                new_content,
            }
        }
        _ => EditResponse::Malformed,
    }
}

// ============ Resolution ============

/// Find the file whose `containing_path/name` equals `path`.
///
/// The session's local dataset is checked first, then the cloud file list.
async fn resolve_target(
    path: &str,
    dataset: &[SearchResult],
    cloud: &dyn CloudIndex,
) -> Option<FileRef> {
    if let Some(hit) = dataset.iter().find(|r| r.file.full_path() == path) {
        return Some(hit.file.clone());
    }

    match cloud.list_files().await {
        Ok(files) => files.into_iter().find(|f| f.full_path() == path),
        Err(e) => {
            tracing::warn!(error = %e, "could not list cloud files while resolving edit target");
            None
        }
    }
}

async fn load_original(
    file: &FileRef,
    dataset: &[SearchResult],
    cloud: &dyn CloudIndex,
) -> anyhow::Result<String> {
    if let Some(local) = dataset.iter().find(|r| r.file.id == file.id) {
        return Ok(local.snippet.clone());
    }
    cloud.fetch_content(file).await
}

/// Editable hits to send with the edit request. Local hits carry the full
/// dataset entry instead of the search excerpt.
fn editable_context(results: &[SearchResult], dataset: &[SearchResult]) -> Vec<SearchResult> {
    results
        .iter()
        .filter(|r| is_editable(&r.file))
        .map(|r| match dataset.iter().find(|d| d.file.id == r.file.id) {
            Some(full) => SearchResult {
                snippet: full.snippet.clone(),
                ..r.clone()
            },
            None => r.clone(),
        })
        .collect()
}

// ============ Pipeline ============

/// Run the pipeline for the latest user message in the active session.
pub async fn run_code_suggestion(
    store: &mut SessionStore,
    backends: &Backends<'_>,
) -> RetrievalOutcome {
    let Some(session) = store.active() else {
        return RetrievalOutcome::default();
    };
    let history = session.messages.clone();
    let grounding = session.grounding_config;
    let dataset = session.local_dataset.clone();
    let query = session.latest_user_query().unwrap_or_default().to_string();
    let model = store.selected_model().to_string();

    let model_message =
        |content: String, kind: ResponseKind| Message::model(content, kind, Some(model.clone()));

    store.append(model_message(ANALYZING_MESSAGE.to_string(), ResponseKind::Pending));

    let outcome = retrieval::retrieve(
        backends.generator,
        backends.cloud,
        &query,
        &grounding,
        &dataset,
        backends.retrieval,
    )
    .await;

    let editable = editable_context(&outcome.results, &dataset);

    if editable.is_empty() {
        tracing::info!(candidates = outcome.results.len(), "no editable files for code suggestion");
        store.replace_tail(model_message(NO_EDITABLE_MESSAGE.to_string(), ResponseKind::Info));
        return outcome;
    }

    let stream = match backends
        .generator
        .stream_code_edit(&model, &history, &editable)
        .await
    {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(error = %e, "could not start code edit generation");
            store.replace_tail(model_message(failure_message(&e), ResponseKind::Error));
            return outcome;
        }
    };

    let drained = consume_stream(stream, None).await;
    if let Some(e) = drained.error {
        store.replace_tail(model_message(failure_message(&e), ResponseKind::Error));
        return outcome;
    }

    let (file_path, thought, new_content) = match parse_edit_response(&drained.text) {
        EditResponse::Proposal {
            file_path,
            thought,
            new_content,
        } => (file_path, thought, new_content),
        EditResponse::Declined(reason) => {
            tracing::info!(reason = %reason, "model declined the edit");
            store.replace_tail(model_message(reason, ResponseKind::Error));
            return outcome;
        }
        EditResponse::Malformed => {
            tracing::warn!(len = drained.text.len(), "malformed code edit response");
            store.replace_tail(model_message(MALFORMED_MESSAGE.to_string(), ResponseKind::Error));
            return outcome;
        }
    };

    let Some(target) = resolve_target(&file_path, &dataset, backends.cloud).await else {
        store.replace_tail(model_message(
            format!("I couldn't match the file path `{}` to any known file.", file_path),
            ResponseKind::Error,
        ));
        return outcome;
    };

    let original = match load_original(&target, &dataset, backends.cloud).await {
        Ok(content) => content,
        Err(e) => {
            tracing::warn!(file = %target.id, error = %e, "could not fetch original content");
            store.replace_tail(model_message(
                format!("I couldn't load `{}`: {:#}", file_path, e),
                ResponseKind::Error,
            ));
            return outcome;
        }
    };

    let mut message = model_message(
        format!("Here's a proposed change to `{}`.", target.full_path()),
        ResponseKind::CodeEdit,
    );
    message.suggestion = Some(CodeSuggestion {
        target_file: target,
        rationale: thought,
        original_content: original,
        proposed_content: new_content,
        status: SuggestionStatus::Pending,
    });
    tracing::info!(file = %file_path, "code suggestion ready");
    store.replace_tail(message);

    outcome
}

// ============ Accept / reject ============

/// Result of accepting a suggestion.
#[derive(Debug, Clone, PartialEq)]
pub struct AcceptOutcome {
    pub file: FileRef,
    /// Set when the edit was recorded but its backing content could not be
    /// updated.
    pub warning: Option<String>,
}

/// Apply the pending suggestion on message `index` of the active session.
pub fn accept_suggestion(
    store: &mut SessionStore,
    index: usize,
) -> Result<AcceptOutcome, SuggestionError> {
    let suggestion = store.set_suggestion_status(index, SuggestionStatus::Accepted)?;
    let file = suggestion.target_file;
    let mut warning = None;

    let in_dataset = store
        .active()
        .map(|s| s.has_local_file(&file.id))
        .unwrap_or(false);
    if in_dataset {
        store.update_local_file(&file.id, &suggestion.proposed_content);
    } else if file.id.starts_with(LOCAL_ID_PREFIX) {
        tracing::warn!(file = %file.id, "accepted local file is missing from the dataset");
        warning = Some(format!(
            "`{}` is no longer in the local dataset; the edit was recorded but not applied to it.",
            file.full_path()
        ));
    }

    store.record_edit(&file, &suggestion.original_content, &suggestion.proposed_content);

    let mut follow_up = Message::model(
        format!("Applied the proposed change to `{}`.", file.full_path()),
        ResponseKind::Info,
        None,
    );
    follow_up.applied_edit_ref = Some(file.clone());
    store.append(follow_up);

    tracing::info!(file = %file.id, "suggestion accepted");
    Ok(AcceptOutcome { file, warning })
}

/// Discard the pending suggestion on message `index` of the active session.
pub fn reject_suggestion(store: &mut SessionStore, index: usize) -> Result<FileRef, SuggestionError> {
    let suggestion = store.set_suggestion_status(index, SuggestionStatus::Rejected)?;
    let file = suggestion.target_file;
    store.append(Message::model(
        format!("Discarded the proposed change to `{}`.", file.full_path()),
        ResponseKind::Info,
        None,
    ));
    tracing::info!(file = %file.id, "suggestion rejected");
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Session;

    fn file(id: &str, name: &str) -> FileRef {
        FileRef {
            id: id.to_string(),
            name: name.to_string(),
            containing_path: "repo/src".to_string(),
        }
    }

    #[test]
    fn test_editable_filter() {
        assert!(is_editable(&file("local:a", "main.rs")));
        assert!(is_editable(&file("local:b", "README.MD")));
        assert!(!is_editable(&file("cloud:c", "report.pdf")));
        assert!(!is_editable(&file("cloud:d", "logo.png")));
        assert!(!is_editable(&file("cloud:e", "Makefile")));
    }

    #[test]
    fn test_editable_context_uses_full_local_content() {
        let body = "fn main() {}\n".repeat(200);
        let dataset = vec![SearchResult {
            file: file("local:src/main.rs", "main.rs"),
            snippet: body.clone(),
            relevance: 0.0,
        }];
        let hits = vec![
            SearchResult {
                file: file("local:src/main.rs", "main.rs"),
                snippet: body[..120].to_string(),
                relevance: 3.0,
            },
            SearchResult {
                file: file("cloud:9", "app.py"),
                snippet: "def main(): pass".to_string(),
                relevance: 1.0,
            },
            SearchResult {
                file: file("cloud:10", "spec.pdf"),
                snippet: "main".to_string(),
                relevance: 1.0,
            },
        ];

        let context = editable_context(&hits, &dataset);
        assert_eq!(context.len(), 2);
        assert_eq!(context[0].snippet, body);
        assert_eq!(context[0].relevance, 3.0);
        assert_eq!(context[1].snippet, "def main(): pass");
    }

    #[test]
    fn test_parse_success() {
        let text = r#"{"filePath":"repo/src/main.rs","thought":"add log","newContent":"fn main() {}"}"#;
        assert_eq!(
            parse_edit_response(text),
            EditResponse::Proposal {
                file_path: "repo/src/main.rs".into(),
                thought: "add log".into(),
                new_content: "fn main() {}".into(),
            }
        );
    }

    #[test]
    fn test_parse_missing_new_content_is_malformed() {
        let text = r#"{"filePath":"repo/src/main.rs","thought":"add log"}"#;
        assert_eq!(parse_edit_response(text), EditResponse::Malformed);
    }

    #[test]
    fn test_parse_error_field() {
        assert_eq!(
            parse_edit_response(r#"{"error":"ambiguous request"}"#),
            EditResponse::Declined("ambiguous request".into())
        );
    }

    #[test]
    fn test_parse_fenced_and_wrapped() {
        let fenced = "```json\n{\"filePath\":\"a/b.md\",\"thought\":\"t\",\"newContent\":\"x\"}\n```";
        assert!(matches!(parse_edit_response(fenced), EditResponse::Proposal { .. }));
        let chatty = "Sure! {\"error\":\"needs two files\"} hope that helps";
        assert_eq!(
            parse_edit_response(chatty),
            EditResponse::Declined("needs two files".into())
        );
        assert_eq!(parse_edit_response("not json at all"), EditResponse::Malformed);
    }

    fn store_with_suggestion(target: FileRef, local: bool) -> SessionStore {
        let mut store = SessionStore::new("m");
        let mut session = Session::new("s");
        if local {
            session.local_dataset.push(SearchResult {
                file: target.clone(),
                snippet: "v0".into(),
                relevance: 0.0,
            });
        }
        store.insert_session(session);
        let mut message = Message::model("proposal", ResponseKind::CodeEdit, None);
        message.suggestion = Some(CodeSuggestion {
            target_file: target,
            rationale: "r".into(),
            original_content: "v0".into(),
            proposed_content: "v1".into(),
            status: SuggestionStatus::Pending,
        });
        store.append(message);
        store
    }

    #[test]
    fn test_accept_local_updates_dataset_and_ledger() {
        let target = file("local:src/main.rs", "main.rs");
        let mut store = store_with_suggestion(target.clone(), true);

        let outcome = accept_suggestion(&mut store, 0).unwrap();
        assert!(outcome.warning.is_none());

        let session = store.active().unwrap();
        assert_eq!(session.local_dataset[0].snippet, "v1");
        assert_eq!(session.messages.len(), 2);
        assert_eq!(session.messages[1].applied_edit_ref.as_ref(), Some(&target));

        let entry = store.edited_file(&target.id).unwrap();
        assert_eq!(entry.original_content, "v0");
        assert_eq!(entry.current_content, "v1");

        assert!(matches!(
            accept_suggestion(&mut store, 0),
            Err(SuggestionError::AlreadyResolved { .. })
        ));
    }

    #[test]
    fn test_accept_missing_local_file_warns_but_records() {
        let target = file("local:gone.rs", "gone.rs");
        let mut store = store_with_suggestion(target.clone(), false);
        let outcome = accept_suggestion(&mut store, 0).unwrap();
        assert!(outcome.warning.is_some());
        assert!(store.edited_file(&target.id).is_some());
    }

    #[test]
    fn test_accept_cloud_file_records_without_mutation() {
        let target = file("cloud:42", "app.py");
        let mut store = store_with_suggestion(target.clone(), false);
        let outcome = accept_suggestion(&mut store, 0).unwrap();
        assert!(outcome.warning.is_none());
        assert_eq!(store.edited_file(&target.id).unwrap().current_content, "v1");
    }

    #[test]
    fn test_reject_appends_notice_and_is_terminal() {
        let target = file("cloud:42", "app.py");
        let mut store = store_with_suggestion(target, false);
        reject_suggestion(&mut store, 0).unwrap();
        let session = store.active().unwrap();
        assert_eq!(session.messages.len(), 2);
        assert!(session.messages[1].content.starts_with("Discarded"));
        assert_eq!(store.edited_files().count(), 0);
        assert!(reject_suggestion(&mut store, 0).is_err());
        assert!(accept_suggestion(&mut store, 0).is_err());
    }
}
