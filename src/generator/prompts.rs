//! Prompt text sent to the model.
//!
//! Kept apart from the HTTP client so prompt wording can change without
//! touching transport code, and so tests can assert on what the model sees.

use crate::models::SearchResult;

pub const CLASSIFY_PROMPT: &str = r#"You classify messages sent to an assistant that answers questions about documents and edits code.

Reply with exactly one label:
- query_documents: the user asks a question, wants a summary, or is looking for something in their files.
- generate_code: the user wants code written, changed, refactored, fixed, or wants a document rewritten or edited.
- chit_chat: greetings, thanks, small talk, or anything unrelated to the files or code.

Message: "How is the session token refreshed?"
Label: query_documents

Message: "hey!"
Label: chit_chat

Message: "Add a retry to the upload handler."
Label: generate_code

Message: "Rename the config field to timeout_ms everywhere in settings.py"
Label: generate_code

Message: "cool, thank you"
Label: chit_chat

Message: "Make the README intro shorter."
Label: generate_code

Message: "Which services read from the orders queue?"
Label: query_documents
"#;

pub const REWRITE_PROMPT: &str = r#"Turn the user's message into a short keyword query for a full-text search engine. Reply with the keywords only.

Message: "Can you tell me what changed in the latest release notes about billing?"
Keywords: latest release notes billing changes

Message: "where do we configure the retry timeout for uploads"
Keywords: upload retry timeout configuration
"#;

pub const GROUNDED_SYSTEM: &str = "You are a helpful assistant. Answer the user's question using only the numbered context passages you are given. \
Cite the passages you rely on with their number in square brackets, for example [1] or [2]. \
If the context does not contain the answer, say that you cannot answer from the available information. Do not use outside knowledge.";

pub const EXTERNAL_SEARCH_SYSTEM: &str = "You are a helpful assistant. Use the search tools available to you to answer the user's question accurately and concisely.";

pub const CODE_EDIT_SYSTEM: &str = "You are a careful software engineer proposing an edit to exactly one file from the files shown to you. \
Respond with a JSON object. On success set `filePath` to the file's path exactly as shown, `thought` to a short explanation of the change, \
and `newContent` to the COMPLETE new content of the file (never a diff, never an excerpt). \
If the request is ambiguous, needs changes to more than one file, or targets a file that is not plain text, set only `error` to a short explanation.";

/// Classification prompt with the user message appended.
pub fn classify(text: &str) -> String {
    format!(
        "{}\nMessage: \"{}\"\nLabel:",
        CLASSIFY_PROMPT,
        text.replace('"', "'")
    )
}

/// Rewrite prompt with the user message appended.
pub fn rewrite(text: &str) -> String {
    format!("{}\nMessage: \"{}\"\nKeywords:", REWRITE_PROMPT, text.replace('"', "'"))
}

/// Numbered context block; numbers match citation markers `[n]`.
pub fn numbered_context(context: &[SearchResult]) -> String {
    context
        .iter()
        .enumerate()
        .map(|(i, r)| format!("[{}] {}\n{}", i + 1, r.file.full_path(), r.snippet))
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

/// Final user turn for a grounded answer.
pub fn grounded_question(question: &str, context: &[SearchResult]) -> String {
    let question = if question.trim().is_empty() {
        "Please provide a summary based on the context."
    } else {
        question
    };
    format!(
        "Context:\n---\n{}\n---\n\nQuestion:\n{}",
        numbered_context(context),
        question
    )
}

/// Final user turn for a code edit request.
pub fn code_edit_request(request: &str, context: &[SearchResult]) -> String {
    let files = context
        .iter()
        .map(|r| format!("File: {}\n```\n{}\n```", r.file.full_path(), r.snippet))
        .collect::<Vec<_>>()
        .join("\n\n");
    format!("Candidate files:\n\n{}\n\nRequest:\n{}", files, request)
}

/// JSON schema for the code edit response.
pub fn code_edit_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "OBJECT",
        "properties": {
            "filePath": { "type": "STRING" },
            "thought": { "type": "STRING" },
            "newContent": { "type": "STRING" },
            "error": { "type": "STRING" }
        }
    })
}
