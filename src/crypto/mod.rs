//! Snapshot encryption
//!
//! Keys are derived with PBKDF2-HMAC-SHA256 from an operator passphrase and a
//! fixed salt. Files are sealed with AES-256-GCM. Encrypted snapshot layout:
//!
//! ```text
//! +----------------+--------------+------------------------+
//! | magic (8)      | nonce (12)   | ciphertext + tag (16)  |
//! | "RTMENC01"     | random       |                        |
//! +----------------+--------------+------------------------+
//! ```

use crate::database::{DatabaseEngine, DatabaseError};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;
use sha2::Sha256;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// PBKDF2 iteration floor; lower configured values are raised to this
pub const MIN_KDF_ITERATIONS: u32 = 100_000;

/// Derived key length (AES-256)
pub const KEY_LEN: usize = 32;

/// AES-GCM nonce length
pub const NONCE_LEN: usize = 12;

/// Header identifying an encrypted snapshot
pub const ENCRYPTED_MAGIC: &[u8; 8] = b"RTMENC01";

/// Salt used when none is configured
pub const DEFAULT_SALT: &str = "rtm-backup-snapshot-salt-v1";

/// Encryption layer errors
#[derive(Error, Debug)]
pub enum EncryptionError {
    #[error("Encryption required but no passphrase is configured")]
    MissingPassphrase,

    #[error("Cipher initialization failed: {0}")]
    CipherInit(String),

    #[error("Encryption failed: {0}")]
    Encrypt(String),

    #[error("Decryption failed for {path}: wrong passphrase or corrupted ciphertext")]
    Decrypt { path: PathBuf },

    #[error("Not an encrypted snapshot: {0}")]
    InvalidFormat(PathBuf),

    #[error("Refusing to overwrite existing file: {0}")]
    AlreadyExists(PathBuf),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Sensitive data detection failed: {0}")]
    Detection(#[from] DatabaseError),

    #[error("Encryption task aborted: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Passphrase-derived AES-256-GCM cipher for snapshot files
#[derive(Clone)]
pub struct SnapshotCipher {
    passphrase: Zeroizing<String>,
    salt: Vec<u8>,
    iterations: u32,
    key: Zeroizing<[u8; KEY_LEN]>,
}

impl std::fmt::Debug for SnapshotCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotCipher")
            .field("iterations", &self.iterations)
            .field("salt_len", &self.salt.len())
            .finish_non_exhaustive()
    }
}

impl SnapshotCipher {
    /// Derive a cipher from `passphrase` and `salt`.
    ///
    /// `iterations` below [`MIN_KDF_ITERATIONS`] are raised to the floor.
    pub fn from_passphrase(
        passphrase: &str,
        salt: &[u8],
        iterations: u32,
    ) -> Result<Self, EncryptionError> {
        if passphrase.is_empty() {
            return Err(EncryptionError::MissingPassphrase);
        }

        let iterations = iterations.max(MIN_KDF_ITERATIONS);
        let key = derive_key(passphrase, salt, iterations);

        Ok(Self {
            passphrase: Zeroizing::new(passphrase.to_string()),
            salt: salt.to_vec(),
            iterations,
            key,
        })
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Build the AES-GCM instance, re-deriving the key once if the first
    /// initialization is rejected.
    fn init_cipher(&self) -> Result<Aes256Gcm, EncryptionError> {
        match Aes256Gcm::new_from_slice(&self.key[..]) {
            Ok(cipher) => Ok(cipher),
            Err(e) => {
                warn!(error = %e, "Cipher initialization failed, re-deriving key");
                let fresh = derive_key(&self.passphrase, &self.salt, self.iterations);
                Aes256Gcm::new_from_slice(&fresh[..])
                    .map_err(|e| EncryptionError::CipherInit(e.to_string()))
            }
        }
    }

    /// Seal `plaintext` into the encrypted snapshot layout
    pub fn encrypt_bytes(&self, plaintext: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        let cipher = self.init_cipher()?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| EncryptionError::Encrypt(e.to_string()))?;

        let mut sealed = Vec::with_capacity(ENCRYPTED_MAGIC.len() + NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(ENCRYPTED_MAGIC);
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Open data produced by [`encrypt_bytes`](Self::encrypt_bytes).
    ///
    /// `origin` is only used for error reporting.
    pub fn decrypt_bytes(&self, sealed: &[u8], origin: &Path) -> Result<Vec<u8>, EncryptionError> {
        let header_len = ENCRYPTED_MAGIC.len() + NONCE_LEN;
        if sealed.len() < header_len || &sealed[..ENCRYPTED_MAGIC.len()] != ENCRYPTED_MAGIC {
            return Err(EncryptionError::InvalidFormat(origin.to_path_buf()));
        }

        let cipher = self.init_cipher()?;
        let nonce = Nonce::from_slice(&sealed[ENCRYPTED_MAGIC.len()..header_len]);

        cipher
            .decrypt(nonce, &sealed[header_len..])
            .map_err(|_| EncryptionError::Decrypt {
                path: origin.to_path_buf(),
            })
    }

    /// Encrypt the file at `source` into a new file at `destination`.
    ///
    /// The source is left in place. Returns the size of the written ciphertext.
    pub async fn encrypt_file(&self, source: &Path, destination: &Path) -> Result<u64, EncryptionError> {
        let cipher = self.clone();
        let source = source.to_path_buf();
        let destination = destination.to_path_buf();

        tokio::task::spawn_blocking(move || {
            let plaintext = std::fs::read(&source).map_err(|e| EncryptionError::Io {
                path: source.clone(),
                source: e,
            })?;
            let sealed = cipher.encrypt_bytes(&plaintext)?;
            write_new_file(&destination, &sealed)?;

            debug!(
                source = %source.display(),
                destination = %destination.display(),
                bytes = sealed.len(),
                "Snapshot encrypted"
            );
            Ok::<u64, EncryptionError>(sealed.len() as u64)
        })
        .await?
    }

    /// Decrypt the file at `source` into a new file at `destination`.
    ///
    /// Returns the size of the recovered plaintext.
    pub async fn decrypt_file(&self, source: &Path, destination: &Path) -> Result<u64, EncryptionError> {
        let cipher = self.clone();
        let source = source.to_path_buf();
        let destination = destination.to_path_buf();

        tokio::task::spawn_blocking(move || {
            let sealed = std::fs::read(&source).map_err(|e| EncryptionError::Io {
                path: source.clone(),
                source: e,
            })?;
            let plaintext = cipher.decrypt_bytes(&sealed, &source)?;
            write_new_file(&destination, &plaintext)?;

            debug!(
                source = %source.display(),
                destination = %destination.display(),
                bytes = plaintext.len(),
                "Snapshot decrypted"
            );
            Ok::<u64, EncryptionError>(plaintext.len() as u64)
        })
        .await?
    }
}

fn derive_key(passphrase: &str, salt: &[u8], iterations: u32) -> Zeroizing<[u8; KEY_LEN]> {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    pbkdf2::pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, iterations, &mut key[..]);
    key
}

fn write_new_file(path: &Path, contents: &[u8]) -> Result<(), EncryptionError> {
    use std::io::Write;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::AlreadyExists {
                EncryptionError::AlreadyExists(path.to_path_buf())
            } else {
                EncryptionError::Io {
                    path: path.to_path_buf(),
                    source: e,
                }
            }
        })?;

    let io_err = |source| EncryptionError::Io {
        path: path.to_path_buf(),
        source,
    };
    file.write_all(contents).map_err(io_err)?;
    file.sync_all().map_err(io_err)?;
    Ok(())
}

/// Whether `path` names an encrypted snapshot by extension
pub fn is_encrypted_snapshot(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some(crate::snapshot::ENCRYPTED_EXTENSION)
}

/// Return the designated sensitive tables that exist in the database at `path`
pub async fn detect_sensitive_data(
    engine: &dyn DatabaseEngine,
    path: &Path,
    sensitive_tables: &[String],
) -> Result<Vec<String>, EncryptionError> {
    let mut present = Vec::new();
    for table in sensitive_tables {
        if engine.table_exists(path, table).await? {
            present.push(table.clone());
        }
    }

    if !present.is_empty() {
        info!(tables = ?present, "Sensitive data detected, snapshots will be encrypted");
    }
    Ok(present)
}
