//! Saving and restoring session state.
//!
//! State is written as one opaque JSON [`Snapshot`] under [`STATE_KEY`] in a
//! [`KeyValueStore`]. [`FileKeyValueStore`] keeps each key in its own file
//! under the configured storage directory and replaces it atomically
//! (write to a temp file, then rename). [`MemoryKeyValueStore`] backs tests.
//!
//! A snapshot that cannot be parsed is discarded, not repaired: loading it
//! yields `None` and a warning, as if nothing had been saved.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::models::{EditedFile, Session};

/// Fixed key under which the state snapshot is stored.
pub const STATE_KEY: &str = "groundwork.state.v1";

/// Minimal string key-value storage.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// Everything the application persists between runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Snapshot {
    pub sessions: Vec<Session>,
    pub active_id: Option<String>,
    pub selected_model: Option<String>,
    /// Edited-file ledger keyed by `FileRef.id`.
    pub edited_files: BTreeMap<String, EditedFile>,
}

/// Load the saved snapshot, or `None` when absent or corrupt.
pub fn load_snapshot(store: &dyn KeyValueStore) -> Option<Snapshot> {
    let raw = match store.get(STATE_KEY) {
        Ok(Some(raw)) => raw,
        Ok(None) => return None,
        Err(e) => {
            tracing::warn!(error = %e, "could not read saved state");
            return None;
        }
    };

    match serde_json::from_str::<Snapshot>(&raw) {
        Ok(snapshot) => {
            tracing::debug!(sessions = snapshot.sessions.len(), "restored saved state");
            Some(snapshot)
        }
        Err(e) => {
            tracing::warn!(error = %e, "discarding corrupt saved state");
            None
        }
    }
}

pub fn save_snapshot(store: &dyn KeyValueStore, snapshot: &Snapshot) -> Result<()> {
    let json = serde_json::to_string(snapshot).context("Failed to serialize state")?;
    store.set(STATE_KEY, &json)
}

// ============ File-backed ============

pub struct FileKeyValueStore {
    dir: PathBuf,
}

impl FileKeyValueStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create storage directory: {}", dir.display()))?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty()
            || key.starts_with('.')
            || key.contains(|c: char| c == '/' || c == '\\')
        {
            bail!("Invalid storage key: {:?}", key);
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key)?;
        match std::fs::read_to_string(&path) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, value)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to replace {}", path.display()))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
        }
    }
}

// ============ In-memory ============

#[derive(Default)]
pub struct MemoryKeyValueStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let values = self
            .values
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store poisoned"))?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self
            .values
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store poisoned"))?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut values = self
            .values
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store poisoned"))?;
        values.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GroundingConfig, Message};
    use tempfile::TempDir;

    #[test]
    fn test_missing_state_is_none() {
        let store = MemoryKeyValueStore::new();
        assert!(load_snapshot(&store).is_none());
    }

    #[test]
    fn test_corrupt_state_is_discarded() {
        let store = MemoryKeyValueStore::new();
        store.set(STATE_KEY, "{\"sessions\": [ not json").unwrap();
        assert!(load_snapshot(&store).is_none());
        // Not repaired: the raw value is still there.
        assert!(store.get(STATE_KEY).unwrap().is_some());
    }

    #[test]
    fn test_restore_backfills_optional_fields() {
        let raw = r#"{
            "sessions": [{
                "id": "s1",
                "title": "Old",
                "createdAt": "2024-05-01T10:00:00Z",
                "messages": [
                    {"role": "user", "content": "hi"},
                    {"role": "model", "content": "hello"}
                ]
            }],
            "activeId": "s1"
        }"#;
        let store = MemoryKeyValueStore::new();
        store.set(STATE_KEY, raw).unwrap();

        let snapshot = load_snapshot(&store).unwrap();
        let session = &snapshot.sessions[0];
        assert_eq!(session.grounding_config, GroundingConfig::baseline());
        assert!(session.messages[1].citation_sources.is_empty());
        assert!(session.messages[1].external_attributions.is_empty());
        assert!(snapshot.selected_model.is_none());
        assert!(snapshot.edited_files.is_empty());
    }

    #[test]
    fn test_file_store_save_and_load() {
        let tmp = TempDir::new().unwrap();
        let store = FileKeyValueStore::open(&tmp.path().join("state")).unwrap();

        let mut session = Session::new("Saved");
        session.messages.push(Message::user("hello", None));
        let snapshot = Snapshot {
            active_id: Some(session.id.clone()),
            sessions: vec![session],
            selected_model: Some("gemini-2.5-pro".to_string()),
            edited_files: BTreeMap::new(),
        };
        save_snapshot(&store, &snapshot).unwrap();

        assert!(tmp.path().join("state").join("groundwork.state.v1.json").exists());
        assert_eq!(load_snapshot(&store), Some(snapshot));

        store.remove(STATE_KEY).unwrap();
        assert!(load_snapshot(&store).is_none());
    }

    #[test]
    fn test_file_store_rejects_path_keys() {
        let tmp = TempDir::new().unwrap();
        let store = FileKeyValueStore::open(tmp.path()).unwrap();
        assert!(store.set("../escape", "x").is_err());
    }
}
