//! Local dataset loading (data-source-connect).
//!
//! Walks a directory, applies include/exclude globs, and turns every
//! readable text file into a [`SearchResult`] whose snippet is the full file
//! text. The result becomes a session's local dataset, searched in memory by
//! [`crate::local_search`].
//!
//! Files that are too large or not valid UTF-8 are skipped with a debug log.

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use walkdir::WalkDir;

use crate::config::DatasetConfig;
use crate::models::{FileRef, GroundingConfig, SearchResult, Session};

/// Prefix that makes local file ids unique against other sources.
pub const LOCAL_ID_PREFIX: &str = "local:";

pub fn load_directory(root: &Path, config: &DatasetConfig) -> Result<Vec<SearchResult>> {
    if !root.is_dir() {
        bail!("Dataset root is not a directory: {}", root.display());
    }

    let root_name = root
        .canonicalize()
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().to_string()))
        .unwrap_or_else(|| root.display().to_string());

    let include_set = build_globset(&config.include_globs)?;

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    default_excludes.extend(config.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut items = Vec::new();

    let walker = WalkDir::new(root).follow_links(config.follow_symlinks);
    for entry in walker {
        let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect();
        let rel_str = parts.join("/");

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        if size > config.max_file_bytes {
            tracing::debug!(path = %rel_str, size, "skipping large file");
            continue;
        }

        let body = match std::fs::read(path).map(String::from_utf8) {
            Ok(Ok(body)) => body,
            Ok(Err(_)) => {
                tracing::debug!(path = %rel_str, "skipping non-UTF-8 file");
                continue;
            }
            Err(e) => {
                tracing::warn!(path = %rel_str, error = %e, "could not read file");
                continue;
            }
        };

        items.push(to_result(&root_name, &parts, &rel_str, body));
    }

    items.sort_by(|a, b| a.file.id.cmp(&b.file.id));
    tracing::info!(root = %root.display(), files = items.len(), "loaded local dataset");

    Ok(items)
}

/// New session for a connected directory, grounded on its dataset only.
pub fn connect_session(root: &Path, config: &DatasetConfig) -> Result<Session> {
    let dataset = load_directory(root, config)?;
    let absolute = root
        .canonicalize()
        .with_context(|| format!("Failed to resolve {}", root.display()))?;
    let title = absolute
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| absolute.display().to_string());

    let mut session = Session::new(title);
    session.local_dataset = dataset;
    session.grounding_config = GroundingConfig::local_only();
    session.data_source_ref = Some(format!("{}{}", LOCAL_ID_PREFIX, absolute.display()));
    Ok(session)
}

fn to_result(root_name: &str, parts: &[String], rel_str: &str, body: String) -> SearchResult {
    let (name, parents) = match parts.split_last() {
        Some((name, parents)) => (name.clone(), parents),
        None => (rel_str.to_string(), &[][..]),
    };

    let containing_path = if parents.is_empty() {
        root_name.to_string()
    } else {
        format!("{}/{}", root_name, parents.join("/"))
    };

    SearchResult {
        file: FileRef {
            id: format!("{}{}", LOCAL_ID_PREFIX, rel_str),
            name,
            containing_path,
        },
        snippet: body,
        relevance: 0.0,
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn fixture() -> TempDir {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("proj");
        fs::create_dir_all(root.join("src")).unwrap();
        fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        fs::write(root.join("notes.md"), "hello world").unwrap();
        fs::write(root.join("src/main.rs"), "fn main() {}").unwrap();
        fs::write(root.join("node_modules/pkg/index.js"), "x").unwrap();
        fs::write(root.join("image.png"), [0x89u8, 0x50, 0x4e, 0x47]).unwrap();
        tmp
    }

    #[test]
    fn test_load_directory_builds_file_refs() {
        let tmp = fixture();
        let items = load_directory(&tmp.path().join("proj"), &DatasetConfig::default()).unwrap();
        let ids: Vec<&str> = items.iter().map(|r| r.file.id.as_str()).collect();
        assert_eq!(ids, vec!["local:notes.md", "local:src/main.rs"]);

        let main = &items[1];
        assert_eq!(main.file.name, "main.rs");
        assert_eq!(main.file.containing_path, "proj/src");
        assert_eq!(main.file.full_path(), "proj/src/main.rs");
        assert_eq!(main.snippet, "fn main() {}");
        assert_eq!(items[0].file.containing_path, "proj");
    }

    #[test]
    fn test_load_directory_skips_large_files() {
        let tmp = fixture();
        let config = DatasetConfig {
            max_file_bytes: 5,
            ..DatasetConfig::default()
        };
        let items = load_directory(&tmp.path().join("proj"), &config).unwrap();
        assert!(items.is_empty());
    }

    #[test]
    fn test_missing_root_fails() {
        let tmp = TempDir::new().unwrap();
        assert!(load_directory(&tmp.path().join("nope"), &DatasetConfig::default()).is_err());
    }

    #[test]
    fn test_connect_session_is_local_only() {
        let tmp = fixture();
        let session = connect_session(&tmp.path().join("proj"), &DatasetConfig::default()).unwrap();
        assert_eq!(session.title, "proj");
        assert_eq!(session.grounding_config, GroundingConfig::local_only());
        assert_eq!(session.local_dataset.len(), 2);
        assert!(session.data_source_ref.unwrap().starts_with("local:"));
    }
}
