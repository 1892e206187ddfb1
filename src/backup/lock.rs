// Run Lock - Advisory lock file keyed by the database being backed up

use super::types::BackupError;
use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};
use uuid::Uuid;

/// Held for the duration of one backup run; removes the lock file on drop
/// unless another run has since taken it over
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    token: String,
}

impl RunLock {
    /// Take the lock at `path`.
    ///
    /// A lock file older than `stale_after` is treated as left behind by a
    /// crashed process and replaced once.
    pub fn acquire(path: &Path, stale_after: Duration) -> Result<Self, BackupError> {
        match Self::create(path) {
            Ok(lock) => Ok(lock),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                if !is_stale(path, stale_after) {
                    return Err(BackupError::RunInProgress(path.to_path_buf()));
                }

                warn!(lock = %path.display(), "Replacing stale backup run lock");
                if let Err(e) = std::fs::remove_file(path) {
                    if e.kind() != ErrorKind::NotFound {
                        return Err(BackupError::Io {
                            path: path.to_path_buf(),
                            source: e,
                        });
                    }
                }

                Self::create(path).map_err(|e| match e.kind() {
                    ErrorKind::AlreadyExists => BackupError::RunInProgress(path.to_path_buf()),
                    _ => BackupError::Io {
                        path: path.to_path_buf(),
                        source: e,
                    },
                })
            }
            Err(e) => Err(BackupError::Io {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }

    fn create(path: &Path) -> io::Result<Self> {
        Self::create_with(path, write_owner)
    }

    fn create_with<W>(path: &Path, write: W) -> io::Result<Self>
    where
        W: FnOnce(&mut File, &str) -> io::Result<()>,
    {
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        let token = Uuid::new_v4().to_string();
        if let Err(e) = write(&mut file, &token) {
            drop(file);
            // No lock file without an owner token.
            if let Err(cleanup) = std::fs::remove_file(path) {
                warn!(lock = %path.display(), error = %cleanup, "Failed to remove partially written run lock");
            }
            return Err(e);
        }
        debug!(lock = %path.display(), "Acquired backup run lock");
        Ok(Self {
            path: path.to_path_buf(),
            token,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn still_owned(&self) -> io::Result<bool> {
        let contents = std::fs::read_to_string(&self.path)?;
        Ok(contents
            .split_whitespace()
            .any(|field| field.strip_prefix("token=") == Some(self.token.as_str())))
    }
}

fn write_owner(file: &mut File, token: &str) -> io::Result<()> {
    writeln!(
        file,
        "pid={} acquired_at={} token={}",
        std::process::id(),
        Utc::now().to_rfc3339(),
        token
    )?;
    file.sync_all()
}

impl Drop for RunLock {
    fn drop(&mut self) {
        match self.still_owned() {
            Ok(true) => {
                if let Err(e) = std::fs::remove_file(&self.path) {
                    warn!(lock = %self.path.display(), error = %e, "Failed to release backup run lock");
                }
            }
            Ok(false) => {
                warn!(lock = %self.path.display(), "Run lock was taken over by another run, leaving it in place");
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(lock = %self.path.display(), "Run lock already removed");
            }
            Err(e) => {
                warn!(lock = %self.path.display(), error = %e, "Failed to read backup run lock on release");
            }
        }
    }
}

fn is_stale(path: &Path, stale_after: Duration) -> bool {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .map(|age| age > stale_after)
        .unwrap_or(false)
}
