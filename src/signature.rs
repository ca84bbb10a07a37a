//! Dataset freshness signature.
//!
//! The signature is the newest modification time, in nanoseconds since the
//! epoch, across three sources: the version marker file, the processed-files
//! manifest, and the index store. Only `stat` calls are made; contents are
//! never read. Missing paths contribute zero.
//!
//! For the index store the database file is checked directly. A recursive
//! scan of the directory is the fallback when that file is absent.

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use walkdir::WalkDir;

use crate::config::Config;
use crate::db::INDEX_DB_FILE;

#[derive(Debug, Clone)]
pub struct SignatureTracker {
    version_file: PathBuf,
    processed_file: PathBuf,
    index_dir: PathBuf,
}

impl SignatureTracker {
    pub fn new(version_file: PathBuf, processed_file: PathBuf, index_dir: PathBuf) -> Self {
        Self {
            version_file,
            processed_file,
            index_dir,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.paths.version_file.clone(),
            config.paths.processed_file.clone(),
            config.paths.index_dir.clone(),
        )
    }

    pub fn current_signature(&self) -> u64 {
        mtime_nanos(&self.version_file)
            .max(mtime_nanos(&self.processed_file))
            .max(self.index_signature())
    }

    fn index_signature(&self) -> u64 {
        let db_file = self.index_dir.join(INDEX_DB_FILE);
        if db_file.is_file() {
            return mtime_nanos(&db_file);
        }
        if !self.index_dir.is_dir() {
            return 0;
        }

        WalkDir::new(&self.index_dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| mtime_nanos(e.path()))
            .max()
            .unwrap_or(0)
    }

    pub fn version_file(&self) -> &Path {
        &self.version_file
    }

    pub fn processed_file(&self) -> &Path {
        &self.processed_file
    }

    pub fn index_dir(&self) -> &Path {
        &self.index_dir
    }
}

fn mtime_nanos(path: &Path) -> u64 {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
