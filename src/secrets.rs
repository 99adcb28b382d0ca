//! Encrypted secret persistence
//!
//! Stores opaque string blobs under string keys, one file per key, encrypted
//! at rest. The store knows nothing about what the blobs mean; the credential
//! lifecycle decides which keys exist and when they die.
//!
//! Encryption is delegated to a [`Protector`], an opaque protect/unprotect
//! capability. The default implementation uses AES-256-GCM with a random
//! per-record nonce under a host-supplied master key. A record that fails to
//! decrypt is treated as absent: a damaged secret must never crash the
//! caller, only force re-authentication.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::RngCore;
use tokio::fs;
use tracing::{debug, warn};

use crate::errors::{AppError, AppResult};

/// Length of the AES-GCM nonce prefixed to each record
const NONCE_LEN: usize = 12;

/// Opaque protect/unprotect capability
///
/// Implementations must be deterministic only in the unprotect direction:
/// protecting the same plaintext twice may yield different ciphertexts.
pub trait Protector: Send + Sync {
    /// Encrypt plaintext into an opaque text blob
    fn protect(&self, plaintext: &str) -> AppResult<String>;
    /// Decrypt a blob produced by `protect`
    ///
    /// # Errors
    ///
    /// Returns `Internal` when the blob is malformed, was produced under a
    /// different key, or has been tampered with.
    fn unprotect(&self, blob: &str) -> AppResult<String>;
}

/// AES-256-GCM protector under a 32-byte master key
///
/// Record layout: `base64(nonce || ciphertext)` with a fresh random 12-byte
/// nonce per record. GCM authentication means tampering is detected at
/// decrypt time rather than producing garbage plaintext.
pub struct MasterKeyProtector {
    cipher: Aes256Gcm,
}

impl MasterKeyProtector {
    /// Create a protector from raw key bytes
    pub fn new(key: [u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key)),
        }
    }
}

impl Protector for MasterKeyProtector {
    fn protect(&self, plaintext: &str) -> AppResult<String> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| AppError::Internal("secret encryption failed".to_owned()))?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(blob))
    }

    fn unprotect(&self, blob: &str) -> AppResult<String> {
        let bytes = BASE64
            .decode(blob.trim())
            .map_err(|_| AppError::Internal("secret record is not valid base64".to_owned()))?;
        if bytes.len() <= NONCE_LEN {
            return Err(AppError::Internal("secret record is truncated".to_owned()));
        }

        let (nonce_bytes, ciphertext) = bytes.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| AppError::Internal("secret decryption failed".to_owned()))?;
        String::from_utf8(plaintext)
            .map_err(|_| AppError::Internal("decrypted secret is not UTF-8".to_owned()))
    }
}

/// Encrypted file-per-key secret store
///
/// Records live at `<dir>/<sanitized-key>.enc`. The backing directory is
/// created on first write. Same-key concurrent writers race last-writer-wins;
/// each key is owned by exactly one lifecycle role in practice, so the store
/// provides no cross-process locking.
#[derive(Clone)]
pub struct SecretStore {
    dir: PathBuf,
    protector: Arc<dyn Protector>,
}

impl SecretStore {
    /// Create a store over the given directory and protect capability
    pub fn new(dir: impl Into<PathBuf>, protector: Arc<dyn Protector>) -> Self {
        Self {
            dir: dir.into(),
            protector,
        }
    }

    /// Encrypt and persist a secret under `key`
    ///
    /// The record is encrypted fully in memory, written to a temp file, and
    /// renamed into place, so a cancelled or crashed write never leaves a
    /// partially-written record.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` if `key` or `plaintext` is empty/whitespace
    /// - `Internal` for encryption or filesystem failures
    pub async fn save(&self, key: &str, plaintext: &str) -> AppResult<()> {
        require_non_empty(key, "secret key")?;
        require_non_empty(plaintext, "secret value")?;

        let blob = self.protector.protect(plaintext)?;
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| AppError::Internal(format!("cannot create secret directory: {e}")))?;

        let path = self.record_path(key);
        let tmp = path.with_extension("enc.tmp");
        fs::write(&tmp, blob.as_bytes())
            .await
            .map_err(|e| AppError::Internal(format!("cannot write secret record: {e}")))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| AppError::Internal(format!("cannot finalize secret record: {e}")))?;

        debug!(key, "secret saved");
        Ok(())
    }

    /// Load and decrypt the secret under `key`
    ///
    /// Returns `None` when no record exists. A record that cannot be
    /// decrypted (corrupted, or written under a foreign key) is logged as a
    /// warning and also reads as `None`; corruption is absence, never an
    /// error to the caller.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` if `key` is empty/whitespace
    /// - `Internal` for filesystem failures other than a missing record
    pub async fn load(&self, key: &str) -> AppResult<Option<String>> {
        require_non_empty(key, "secret key")?;

        let path = self.record_path(key);
        let blob = match fs::read_to_string(&path).await {
            Ok(blob) => blob,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(key, "no secret record");
                return Ok(None);
            }
            Err(e) => {
                return Err(AppError::Internal(format!(
                    "cannot read secret record: {e}"
                )));
            }
        };

        match self.protector.unprotect(&blob) {
            Ok(plaintext) => Ok(Some(plaintext)),
            Err(e) => {
                warn!(key, error = %e, "secret record failed to decrypt, treating as absent");
                Ok(None)
            }
        }
    }

    /// Delete the secret under `key`
    ///
    /// Idempotent; a missing record is not an error.
    pub async fn delete(&self, key: &str) -> AppResult<()> {
        require_non_empty(key, "secret key")?;

        match fs::remove_file(self.record_path(key)).await {
            Ok(()) => {
                debug!(key, "secret deleted");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::Internal(format!(
                "cannot delete secret record: {e}"
            ))),
        }
    }

    /// Whether a record exists under `key`
    ///
    /// Existence only; does not attempt decryption.
    pub async fn exists(&self, key: &str) -> AppResult<bool> {
        require_non_empty(key, "secret key")?;
        match fs::metadata(self.record_path(key)).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(AppError::Internal(format!(
                "cannot stat secret record: {e}"
            ))),
        }
    }

    /// Path of the record file for `key`
    fn record_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.enc", sanitize_key(key)))
    }
}

/// Map a secret key to a filesystem-safe file stem
///
/// Every character that is not alphanumeric, `.`, `_`, or `-` is replaced
/// with `_`, covering all characters invalid in a filename on any supported
/// platform.
fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Reject empty or whitespace-only required strings before any I/O
fn require_non_empty(value: &str, what: &str) -> AppResult<()> {
    if value.trim().is_empty() {
        return Err(AppError::InvalidInput(format!("{what} must not be empty")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{MasterKeyProtector, Protector, SecretStore, sanitize_key};

    fn store_in(dir: &std::path::Path) -> SecretStore {
        SecretStore::new(dir, Arc::new(MasterKeyProtector::new([42u8; 32])))
    }

    #[test]
    fn sanitize_key_replaces_path_hostile_characters() {
        assert_eq!(sanitize_key("gmail-oauth-token"), "gmail-oauth-token");
        assert_eq!(sanitize_key("a/b\\c:d*e"), "a_b_c_d_e");
        assert_eq!(sanitize_key("user@example.com"), "user_example.com");
    }

    #[test]
    fn protector_round_trips_and_detects_tampering() {
        let protector = MasterKeyProtector::new([1u8; 32]);
        let blob = protector.protect("top secret").expect("protect");
        assert_eq!(protector.unprotect(&blob).expect("unprotect"), "top secret");

        let mut tampered: Vec<char> = blob.chars().collect();
        let last = tampered.len() - 1;
        tampered[last] = if tampered[last] == 'A' { 'B' } else { 'A' };
        let tampered: String = tampered.into_iter().collect();
        assert!(protector.unprotect(&tampered).is_err());
    }

    #[test]
    fn protector_rejects_foreign_key_blobs() {
        let writer = MasterKeyProtector::new([1u8; 32]);
        let reader = MasterKeyProtector::new([2u8; 32]);
        let blob = writer.protect("hello").expect("protect");
        assert!(reader.unprotect(&blob).is_err());
    }

    #[tokio::test]
    async fn save_then_load_round_trips_without_leaking_plaintext() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store_in(dir.path());

        store.save("gmail-oauth-token", "refresh-me").await.expect("save");
        let loaded = store.load("gmail-oauth-token").await.expect("load");
        assert_eq!(loaded.as_deref(), Some("refresh-me"));

        let on_disk =
            std::fs::read_to_string(dir.path().join("gmail-oauth-token.enc")).expect("record");
        assert!(!on_disk.contains("refresh-me"));
    }

    #[tokio::test]
    async fn load_missing_key_is_none_and_delete_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store_in(dir.path());

        assert!(store.load("absent").await.expect("load").is_none());
        assert!(!store.exists("absent").await.expect("exists"));

        store.delete("absent").await.expect("first delete");
        store.delete("absent").await.expect("second delete");

        store.save("k", "v").await.expect("save");
        store.delete("k").await.expect("delete");
        assert!(store.load("k").await.expect("load").is_none());
        assert!(!store.exists("k").await.expect("exists"));
    }

    #[tokio::test]
    async fn overwrite_keeps_only_latest_value() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store_in(dir.path());

        store.save("k", "first").await.expect("save first");
        store.save("k", "second").await.expect("save second");
        assert_eq!(store.load("k").await.expect("load").as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn corrupted_record_reads_as_absent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store_in(dir.path());

        store.save("k", "value").await.expect("save");
        std::fs::write(dir.path().join("k.enc"), "definitely not ciphertext")
            .expect("corrupt record");

        assert!(store.load("k").await.expect("load").is_none());
        // The record file is still there; only decryption failed.
        assert!(store.exists("k").await.expect("exists"));
    }

    #[tokio::test]
    async fn empty_key_or_value_is_rejected_before_io() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store_in(dir.path());

        assert!(store.save("", "v").await.is_err());
        assert!(store.save("k", "  ").await.is_err());
        assert!(store.load(" ").await.is_err());
        assert!(store.delete("").await.is_err());
    }
}
