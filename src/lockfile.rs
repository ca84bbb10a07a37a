//! Cross-process build lock.
//!
//! Dataset builds and deletions from the CLI and from the dataset API all
//! serialise on one lock file. Waiting is bounded: callers that cannot get
//! the lock in time get [`LockError::Busy`] instead of queueing forever.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("build is busy (lock {} not acquired within {waited:?}); try again", path.display())]
    Busy { path: PathBuf, waited: Duration },
    #[error("cannot open lock file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Exclusive lock held until dropped.
#[derive(Debug)]
pub struct BuildLock {
    file: File,
    path: PathBuf,
}

impl BuildLock {
    /// Poll for the exclusive lock until `timeout` elapses.
    pub async fn acquire(path: &Path, timeout: Duration) -> Result<Self, LockError> {
        let io_err = |source| LockError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(io_err)?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)
            .map_err(io_err)?;

        let started = Instant::now();
        loop {
            if file.try_lock_exclusive().is_ok() {
                tracing::debug!(path = %path.display(), "build lock acquired");
                return Ok(Self {
                    file,
                    path: path.to_path_buf(),
                });
            }
            let waited = started.elapsed();
            if waited >= timeout {
                return Err(LockError::Busy {
                    path: path.to_path_buf(),
                    waited,
                });
            }
            tokio::time::sleep(POLL_INTERVAL.min(timeout - waited)).await;
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for BuildLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to release build lock");
        }
    }
}
