//! Terminal rendering for the `gw` binary.
//!
//! When stdout is a TTY, answers are streamed as they arrive: a
//! [`LivePrinter`] is attached to the session store and prints each tail
//! replacement as a delta. Otherwise nothing is printed until the turn
//! finishes, so piped output holds only final messages.
//!
//! Citations, attributions and suggestions are rendered after the turn by
//! the `render_*` functions, which return strings and do no I/O.

use std::io::Write;

use crate::citations::{self, Segment};
use crate::models::{
    Attribution, AttributionKind, CodeSuggestion, EditedFile, Message, Role, Session,
};
use crate::session::{StoreChange, StoreObserver};

/// How answer text reaches stdout.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OutputMode {
    /// Stream deltas while the turn runs.
    Live,
    /// Print the final message after the turn.
    Final,
}

impl OutputMode {
    /// Default: live when stdout is a TTY, otherwise final-only.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stdout) {
            OutputMode::Live
        } else {
            OutputMode::Final
        }
    }
}

/// Prints model output to stdout as the store's tail message grows.
#[derive(Default)]
pub struct LivePrinter {
    printed: String,
}

impl LivePrinter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Text to write so the terminal shows `content`, given what is already
    /// on screen.
    fn delta(&self, content: &str) -> String {
        match content.strip_prefix(self.printed.as_str()) {
            Some(rest) => rest.to_string(),
            None if self.printed.is_empty() => content.to_string(),
            None => format!("\n{}", content),
        }
    }
}

impl StoreObserver for LivePrinter {
    fn on_change(&mut self, change: StoreChange, active: Option<&Session>) {
        let Some(tail) = active.and_then(|s| s.messages.last()) else {
            return;
        };

        let out = match change {
            StoreChange::Appended => {
                self.printed.clear();
                if tail.role == Role::User {
                    return;
                }
                self.delta(&tail.content)
            }
            StoreChange::TailReplaced => self.delta(&tail.content),
            StoreChange::Sessions => return,
        };

        if out.is_empty() {
            return;
        }
        self.printed = tail.content.clone();
        let mut stdout = std::io::stdout().lock();
        let _ = stdout.write_all(out.as_bytes());
        let _ = stdout.flush();
    }
}

/// Message text with valid citation markers kept and invalid ones left as
/// typed, followed by the list of cited sources.
pub fn render_citations(message: &Message) -> String {
    let sources = &message.citation_sources;
    if sources.is_empty() {
        return String::new();
    }

    let cited = citations::cited_numbers(&message.content, sources);
    let numbers: Vec<usize> = if cited.is_empty() {
        (1..=sources.len()).collect()
    } else {
        let mut sorted = cited;
        sorted.sort_unstable();
        sorted
    };

    let mut out = String::from("Sources:\n");
    for n in numbers {
        if let Some(source) = citations::lookup(n, sources) {
            out.push_str(&format!("  [{}] {}\n", n, source.file.full_path()));
        }
    }
    out
}

/// Message content with citation markers normalized to `[n]`.
pub fn render_content(message: &Message) -> String {
    citations::resolve(&message.content, &message.citation_sources)
        .into_iter()
        .map(|segment| match segment {
            Segment::Text(text) => text.to_string(),
            Segment::Citation { number, .. } => format!("[{}]", number),
        })
        .collect()
}

pub fn render_attributions(attributions: &[Attribution]) -> String {
    if attributions.is_empty() {
        return String::new();
    }
    let mut out = String::from("Web sources:\n");
    for a in attributions {
        let kind = match a.kind {
            AttributionKind::Web => "web",
            AttributionKind::Maps => "maps",
        };
        out.push_str(&format!("  ({}) {} <{}>\n", kind, a.title, a.uri));
    }
    out
}

pub fn render_suggestion(suggestion: &CodeSuggestion) -> String {
    let mut out = format!(
        "Suggested edit to {} [{}]\n",
        suggestion.target_file.full_path(),
        suggestion.status
    );
    if !suggestion.rationale.trim().is_empty() {
        out.push_str(&format!("  why: {}\n", suggestion.rationale.trim()));
    }
    out.push_str(&format!(
        "  {} → {} lines\n",
        suggestion.original_content.lines().count(),
        suggestion.proposed_content.lines().count()
    ));
    out.push_str("----- proposed content -----\n");
    out.push_str(&suggestion.proposed_content);
    if !suggestion.proposed_content.ends_with('\n') {
        out.push('\n');
    }
    out.push_str("----------------------------\n");
    out
}

pub fn render_session_row(session: &Session, active: bool) -> String {
    format!(
        "{} {}  {:<40}  {:>3} msgs  {}",
        if active { "*" } else { " " },
        session.id,
        session.title,
        session.messages.len(),
        session.created_at.format("%Y-%m-%d %H:%M")
    )
}

pub fn render_edited_file(entry: &EditedFile) -> String {
    format!(
        "{}  ({} → {} bytes)",
        entry.file.full_path(),
        entry.original_content.len(),
        entry.current_content.len()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FileRef, ResponseKind, SearchResult, SuggestionStatus};

    fn source(name: &str) -> SearchResult {
        SearchResult {
            file: FileRef {
                id: format!("local:{}", name),
                name: name.to_string(),
                containing_path: "docs".to_string(),
            },
            snippet: String::new(),
            relevance: 1.0,
        }
    }

    #[test]
    fn test_delta_extends_or_restarts() {
        let mut printer = LivePrinter::new();
        assert_eq!(printer.delta("Hel"), "Hel");
        printer.printed = "Hel".to_string();
        assert_eq!(printer.delta("Hello"), "lo");
        assert_eq!(printer.delta("Done."), "\nDone.");
    }

    #[test]
    fn test_render_citations_lists_cited_sources() {
        let mut message = Message::model("X [2] and Y [9]", ResponseKind::Grounded, None);
        message.citation_sources = vec![source("a.md"), source("b.md")];
        let out = render_citations(&message);
        assert!(out.contains("[2] docs/b.md"));
        assert!(!out.contains("a.md"));
        assert_eq!(render_content(&message), "X [2] and Y [9]");
    }

    #[test]
    fn test_render_suggestion() {
        let suggestion = CodeSuggestion {
            target_file: FileRef {
                id: "local:a.rs".to_string(),
                name: "a.rs".to_string(),
                containing_path: "repo".to_string(),
            },
            rationale: "add a log line".to_string(),
            original_content: "fn a() {}\n".to_string(),
            proposed_content: "fn a() {\n    log();\n}".to_string(),
            status: SuggestionStatus::Pending,
        };
        let out = render_suggestion(&suggestion);
        assert!(out.starts_with("Suggested edit to repo/a.rs [pending]"));
        assert!(out.contains("1 → 3 lines"));
    }
}
