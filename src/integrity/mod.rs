//! Checksum and integrity validation for snapshot files
//!
//! Checksums are SHA-256 over the full file, read in fixed 4 KB chunks so
//! memory stays flat regardless of snapshot size. Structural validation runs
//! the storage engine's self-check and then confirms every essential table is
//! present and queryable.

use crate::database::{DatabaseEngine, DatabaseError};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

/// Read size used when hashing snapshot files
pub const CHECKSUM_CHUNK_SIZE: usize = 4096;

/// Key under which the summed row count is stored in entity count maps
pub const TOTAL_KEY: &str = "total";

/// Integrity validation errors
#[derive(Error, Debug)]
pub enum IntegrityError {
    /// Snapshot file is missing
    #[error("Snapshot not found: {0}")]
    NotFound(PathBuf),

    /// The engine self-check reported problems
    #[error("Consistency check failed for {path}: {diagnostic}")]
    ConsistencyCheck { path: PathBuf, diagnostic: String },

    /// An essential table is absent
    #[error("Essential table '{table}' missing from {path}")]
    MissingTable { table: String, path: PathBuf },

    /// An essential table exists but cannot be read
    #[error("Essential table '{table}' not queryable in {path}: {source}")]
    TableNotQueryable {
        table: String,
        path: PathBuf,
        #[source]
        source: DatabaseError,
    },

    /// The file could not be opened by the storage engine at all
    #[error("Storage engine rejected {path}: {source}")]
    Engine {
        path: PathBuf,
        #[source]
        source: DatabaseError,
    },

    /// Recomputed digest differs from the recorded one
    #[error("Checksum mismatch for {path}: expected {expected}, computed {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// Restored row counts differ from the counts recorded at backup time
    #[error("Entity count mismatch for '{table}': expected {expected}, found {actual}")]
    EntityCountMismatch {
        table: String,
        expected: i64,
        actual: i64,
    },

    /// Reading the file failed
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Compute the hex SHA-256 digest of a file, streamed in 4 KB chunks
pub async fn checksum_file(path: &Path) -> Result<String, IntegrityError> {
    let io_err = |source| IntegrityError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(IntegrityError::NotFound(path.to_path_buf()))
        }
        Err(e) => return Err(io_err(e)),
    };

    let mut hasher = Sha256::new();
    let mut buffer = [0u8; CHECKSUM_CHUNK_SIZE];
    loop {
        let read = file.read(&mut buffer).await.map_err(io_err)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Recompute a file's checksum and compare it with `expected`
pub async fn verify_checksum(path: &Path, expected: &str) -> Result<(), IntegrityError> {
    let actual = checksum_file(path).await?;
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(IntegrityError::ChecksumMismatch {
            path: path.to_path_buf(),
            expected: expected.to_string(),
            actual,
        })
    }
}

/// Validates snapshot files against the storage engine and the essential table list
pub struct IntegrityValidator {
    engine: Arc<dyn DatabaseEngine>,
    essential_tables: Vec<String>,
}

impl IntegrityValidator {
    pub fn new(engine: Arc<dyn DatabaseEngine>, essential_tables: Vec<String>) -> Self {
        Self {
            engine,
            essential_tables,
        }
    }

    pub fn essential_tables(&self) -> &[String] {
        &self.essential_tables
    }

    /// Run the engine self-check and confirm every essential table is queryable.
    ///
    /// Row counts may be zero; only presence and readability are required.
    pub async fn validate(&self, path: &Path) -> Result<bool, IntegrityError> {
        if !path.is_file() {
            return Err(IntegrityError::NotFound(path.to_path_buf()));
        }

        let diagnostics = self
            .engine
            .integrity_check(path)
            .await
            .map_err(|source| IntegrityError::Engine {
                path: path.to_path_buf(),
                source,
            })?;

        let healthy = diagnostics.len() == 1 && diagnostics[0].eq_ignore_ascii_case("ok");
        if !healthy {
            return Err(IntegrityError::ConsistencyCheck {
                path: path.to_path_buf(),
                diagnostic: diagnostics.join("; "),
            });
        }

        for table in &self.essential_tables {
            let exists = self
                .engine
                .table_exists(path, table)
                .await
                .map_err(|source| IntegrityError::TableNotQueryable {
                    table: table.clone(),
                    path: path.to_path_buf(),
                    source,
                })?;
            if !exists {
                return Err(IntegrityError::MissingTable {
                    table: table.clone(),
                    path: path.to_path_buf(),
                });
            }

            let rows = self
                .engine
                .count_rows(path, table)
                .await
                .map_err(|source| IntegrityError::TableNotQueryable {
                    table: table.clone(),
                    path: path.to_path_buf(),
                    source,
                })?;
            debug!(path = %path.display(), table = %table, rows, "Essential table verified");
        }

        Ok(true)
    }

    /// Row counts for every essential table present in the file, plus a `total`.
    ///
    /// Tables that are missing or unreadable are skipped with a warning; use
    /// [`validate`](Self::validate) when their absence must be an error.
    pub async fn entity_counts(&self, path: &Path) -> Result<BTreeMap<String, i64>, IntegrityError> {
        if !path.is_file() {
            return Err(IntegrityError::NotFound(path.to_path_buf()));
        }

        let mut counts = BTreeMap::new();
        let mut total = 0i64;
        for table in &self.essential_tables {
            match self.engine.table_exists(path, table).await {
                Ok(true) => {}
                Ok(false) => {
                    warn!(path = %path.display(), table = %table, "Essential table absent, not counted");
                    continue;
                }
                Err(source) => {
                    return Err(IntegrityError::Engine {
                        path: path.to_path_buf(),
                        source,
                    })
                }
            }

            match self.engine.count_rows(path, table).await {
                Ok(rows) => {
                    total += rows;
                    counts.insert(table.clone(), rows);
                }
                Err(e) => {
                    warn!(path = %path.display(), table = %table, error = %e, "Failed to count rows");
                }
            }
        }
        counts.insert(TOTAL_KEY.to_string(), total);

        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_checksum_matches_known_digest() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"abc").unwrap();

        let digest = checksum_file(file.path()).await.unwrap();
        assert_eq!(
            digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn test_checksum_spans_multiple_chunks() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let data: Vec<u8> = (0..(CHECKSUM_CHUNK_SIZE * 3 + 17))
            .map(|i| (i % 251) as u8)
            .collect();
        file.write_all(&data).unwrap();

        let streamed = checksum_file(file.path()).await.unwrap();
        let expected = format!("{:x}", Sha256::digest(&data));
        assert_eq!(streamed, expected);
    }

    #[tokio::test]
    async fn test_checksum_missing_file() {
        let result = checksum_file(Path::new("/nonexistent/snapshot.db")).await;
        assert!(matches!(result, Err(IntegrityError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_verify_checksum_detects_tampering() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"original").unwrap();
        let digest = checksum_file(file.path()).await.unwrap();

        verify_checksum(file.path(), &digest).await.unwrap();

        file.write_all(b"tampered").unwrap();
        let result = verify_checksum(file.path(), &digest).await;
        assert!(matches!(result, Err(IntegrityError::ChecksumMismatch { .. })));
    }
}
