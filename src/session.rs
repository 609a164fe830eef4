//! Session state store.
//!
//! [`SessionStore`] owns every session, the active-session pointer, the
//! selected model and the edited-file ledger. It exposes a closed set of
//! operations; pipelines never keep references into a message log across an
//! `await`, they call back into the store at the point of mutation.
//!
//! The only in-place mutation of a message log is [`SessionStore::replace_tail`],
//! used while a model message is streaming. Everything else appends.
//!
//! Operations on a missing active session are no-ops. An optional
//! [`StoreObserver`] is notified after each change so a renderer can follow
//! streaming output.

use anyhow::{bail, Result};
use std::collections::BTreeMap;

use crate::error::SuggestionError;
use crate::models::{
    CodeSuggestion, EditedFile, FileRef, GroundingConfig, Message, Role, Session,
    SuggestionStatus, DEFAULT_SESSION_TITLE,
};
use crate::persistence::Snapshot;

const TITLE_MAX_CHARS: usize = 48;

/// What changed in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreChange {
    /// A message was appended to the active session.
    Appended,
    /// The active session's last message was replaced.
    TailReplaced,
    /// Sessions were created, deleted, switched, or reconfigured.
    Sessions,
}

/// Receives store changes, e.g. to render streaming output.
pub trait StoreObserver: Send {
    fn on_change(&mut self, change: StoreChange, active: Option<&Session>);
}

pub struct SessionStore {
    sessions: Vec<Session>,
    active_id: Option<String>,
    selected_model: String,
    edited_files: BTreeMap<String, EditedFile>,
    observer: Option<Box<dyn StoreObserver>>,
}

impl SessionStore {
    pub fn new(default_model: &str) -> Self {
        Self {
            sessions: Vec::new(),
            active_id: None,
            selected_model: default_model.to_string(),
            edited_files: BTreeMap::new(),
            observer: None,
        }
    }

    /// Rebuild a store from a saved snapshot.
    ///
    /// An unknown `selectedModel` falls back to `default_model`; a dangling
    /// `activeId` falls back to the most recent session.
    pub fn from_snapshot(snapshot: Snapshot, default_model: &str, models: &[String]) -> Self {
        let selected_model = snapshot
            .selected_model
            .filter(|m| models.contains(m))
            .unwrap_or_else(|| default_model.to_string());

        let mut store = Self {
            sessions: snapshot.sessions,
            active_id: snapshot.active_id,
            selected_model,
            edited_files: snapshot.edited_files,
            observer: None,
        };

        let active_known = store
            .active_id
            .as_ref()
            .map(|id| store.sessions.iter().any(|s| &s.id == id))
            .unwrap_or(false);
        if !active_known {
            store.active_id = store.most_recent_id();
        }

        store
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            sessions: self.sessions.clone(),
            active_id: self.active_id.clone(),
            selected_model: Some(self.selected_model.clone()),
            edited_files: self.edited_files.clone(),
        }
    }

    pub fn set_observer(&mut self, observer: Box<dyn StoreObserver>) {
        self.observer = Some(observer);
    }

    fn notify(&mut self, change: StoreChange) {
        if let Some(mut observer) = self.observer.take() {
            observer.on_change(change, self.active());
            self.observer = Some(observer);
        }
    }

    // ============ Projections ============

    /// All sessions, most recently created first.
    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active_id.as_deref()
    }

    pub fn active(&self) -> Option<&Session> {
        let id = self.active_id.as_deref()?;
        self.sessions.iter().find(|s| s.id == id)
    }

    pub fn get(&self, id: &str) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id == id)
    }

    fn active_mut(&mut self) -> Option<&mut Session> {
        let id = self.active_id.as_deref()?;
        self.sessions.iter_mut().find(|s| s.id == id)
    }

    fn most_recent_id(&self) -> Option<String> {
        self.sessions
            .iter()
            .max_by_key(|s| s.created_at)
            .map(|s| s.id.clone())
    }

    // ============ Session lifecycle ============

    /// Create an empty session, prepend it, and make it active.
    pub fn create_session(&mut self) -> String {
        self.insert_session(Session::new(DEFAULT_SESSION_TITLE))
    }

    /// Prepend a prepared session and make it active.
    pub fn insert_session(&mut self, session: Session) -> String {
        let id = session.id.clone();
        tracing::debug!(session = %id, title = %session.title, "created session");
        self.sessions.insert(0, session);
        self.active_id = Some(id.clone());
        self.notify(StoreChange::Sessions);
        id
    }

    /// Make `id` the active session. Returns `false` if it does not exist.
    pub fn switch_to(&mut self, id: &str) -> bool {
        if self.get(id).is_none() {
            return false;
        }
        self.active_id = Some(id.to_string());
        self.notify(StoreChange::Sessions);
        true
    }

    /// Remove a session. Deleting the active session activates the most
    /// recent remaining one, or none.
    pub fn delete_session(&mut self, id: &str) -> bool {
        let before = self.sessions.len();
        self.sessions.retain(|s| s.id != id);
        if self.sessions.len() == before {
            return false;
        }
        if self.active_id.as_deref() == Some(id) {
            self.active_id = self.most_recent_id();
        }
        self.notify(StoreChange::Sessions);
        true
    }

    // ============ Active session mutation ============

    /// Append to the active session's log.
    ///
    /// The first user message of a session still carrying the default title
    /// also becomes its title.
    pub fn append(&mut self, message: Message) {
        let Some(session) = self.active_mut() else {
            return;
        };

        let first_user = message.role == Role::User
            && !session.messages.iter().any(|m| m.role == Role::User);
        if first_user && session.title == DEFAULT_SESSION_TITLE && !message.content.trim().is_empty() {
            session.title = title_from(&message.content);
        }

        session.messages.push(message);
        self.notify(StoreChange::Appended);
    }

    /// Replace the last message of the active session's log.
    pub fn replace_tail(&mut self, message: Message) {
        let Some(session) = self.active_mut() else {
            return;
        };
        let Some(last) = session.messages.last_mut() else {
            return;
        };
        *last = message;
        self.notify(StoreChange::TailReplaced);
    }

    /// The last message of the active session.
    pub fn tail(&self) -> Option<&Message> {
        self.active().and_then(|s| s.messages.last())
    }

    pub fn set_grounding(&mut self, grounding: GroundingConfig) {
        if let Some(session) = self.active_mut() {
            session.grounding_config = grounding;
            self.notify(StoreChange::Sessions);
        }
    }

    /// Move the suggestion on message `index` out of `Pending`.
    ///
    /// Returns the suggestion as it was before the transition.
    pub fn set_suggestion_status(
        &mut self,
        index: usize,
        status: SuggestionStatus,
    ) -> Result<CodeSuggestion, SuggestionError> {
        let session = self.active_mut().ok_or(SuggestionError::NoActiveSession)?;
        let message = session
            .messages
            .get_mut(index)
            .ok_or(SuggestionError::MessageNotFound(index))?;
        let suggestion = message
            .suggestion
            .as_mut()
            .ok_or(SuggestionError::NoSuggestion(index))?;

        if suggestion.status != SuggestionStatus::Pending {
            return Err(SuggestionError::AlreadyResolved {
                status: suggestion.status,
            });
        }

        let before = suggestion.clone();
        suggestion.status = status;
        self.notify(StoreChange::Sessions);
        Ok(before)
    }

    /// Index of the newest message in the active session with a pending
    /// suggestion.
    pub fn latest_pending_suggestion(&self) -> Option<usize> {
        let session = self.active()?;
        session.messages.iter().rposition(|m| {
            m.suggestion
                .as_ref()
                .map(|s| s.status == SuggestionStatus::Pending)
                .unwrap_or(false)
        })
    }

    /// Replace the content of a local dataset file in the active session.
    ///
    /// Returns `false` when the file is not part of the dataset.
    pub fn update_local_file(&mut self, file_id: &str, content: &str) -> bool {
        let Some(session) = self.active_mut() else {
            return false;
        };
        let Some(entry) = session.local_dataset.iter_mut().find(|r| r.file.id == file_id) else {
            return false;
        };
        entry.snippet = content.to_string();
        true
    }

    // ============ Edited-file ledger ============

    /// Record an applied edit. The original content is only captured the
    /// first time a file is edited.
    pub fn record_edit(&mut self, file: &FileRef, original: &str, current: &str) -> &EditedFile {
        let entry = self
            .edited_files
            .entry(file.id.clone())
            .or_insert_with(|| EditedFile {
                file: file.clone(),
                original_content: original.to_string(),
                current_content: String::new(),
            });
        entry.file = file.clone();
        entry.current_content = current.to_string();
        entry
    }

    pub fn edited_files(&self) -> impl Iterator<Item = &EditedFile> {
        self.edited_files.values()
    }

    pub fn edited_file(&self, id: &str) -> Option<&EditedFile> {
        self.edited_files.get(id)
    }

    // ============ Model selection ============

    pub fn selected_model(&self) -> &str {
        &self.selected_model
    }

    pub fn set_selected_model(&mut self, name: &str, models: &[String]) -> Result<()> {
        if !models.iter().any(|m| m == name) {
            bail!(
                "Unknown model '{}'. Available: {}",
                name,
                models.join(", ")
            );
        }
        self.selected_model = name.to_string();
        Ok(())
    }
}

fn title_from(content: &str) -> String {
    let line = content.trim().lines().next().unwrap_or("").trim();
    if line.chars().count() <= TITLE_MAX_CHARS {
        return line.to_string();
    }
    let truncated: String = line.chars().take(TITLE_MAX_CHARS).collect();
    format!("{}…", truncated.trim_end())
}
