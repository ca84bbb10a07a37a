//! Processed-files manifest.
//!
//! A JSON array of file names that the builder has already indexed. The
//! builder skips anything listed here, the dataset API uses it to reject
//! duplicate uploads, and its mtime is one of the freshness signals.

use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessedFiles {
    files: BTreeSet<String>,
}

impl ProcessedFiles {
    /// Load the manifest. A missing or unparsable file is an empty set.
    pub fn load(path: &Path) -> Self {
        let Ok(content) = std::fs::read_to_string(path) else {
            return Self::default();
        };
        match serde_json::from_str::<Vec<String>>(&content) {
            Ok(names) => Self {
                files: names.into_iter().collect(),
            },
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable processed-files manifest");
                Self::default()
            }
        }
    }

    /// Write the manifest atomically (temp file + rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let names: Vec<&String> = self.files.iter().collect();
        let json = serde_json::to_string(&names)?;

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("Failed to replace {}", path.display()))?;
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.files.contains(name)
    }

    /// Returns `true` if the name was not already present.
    pub fn insert(&mut self, name: impl Into<String>) -> bool {
        self.files.insert(name.into())
    }

    /// Returns `true` if the name was present.
    pub fn remove(&mut self, name: &str) -> bool {
        self.files.remove(name)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let m = ProcessedFiles::load(&dir.path().join("processed_files.json"));
        assert!(m.is_empty());
    }

    #[test]
    fn test_corrupt_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("processed_files.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(ProcessedFiles::load(&path).is_empty());

        std::fs::write(&path, r#"{"a": 1}"#).unwrap();
        assert!(ProcessedFiles::load(&path).is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("processed_files.json");

        let mut m = ProcessedFiles::default();
        assert!(m.insert("bromo.pdf"));
        assert!(m.insert("batu.txt"));
        assert!(!m.insert("bromo.pdf"));
        m.save(&path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(raw, r#"["batu.txt","bromo.pdf"]"#);

        let loaded = ProcessedFiles::load(&path);
        assert_eq!(loaded, m);
        assert!(loaded.contains("batu.txt"));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_remove() {
        let mut m = ProcessedFiles::default();
        m.insert("a.txt");
        assert!(m.remove("a.txt"));
        assert!(!m.remove("a.txt"));
        assert_eq!(m.len(), 0);
    }
}
