//! Encrypted file backend
//!
//! Layout on disk (JSON, owner-only permissions):
//!
//! ```text
//! { "<namespace>": { "<key>": "<base64(nonce || ciphertext)>" } }
//! ```
//!
//! Each value is sealed with AES-256-GCM under a key derived from the
//! passphrase with SHA-256, using a fresh 96-bit nonce per write.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{SecretBackend, SecretError};
use crate::utils::write_private_file;

const NONCE_LEN: usize = 12;

type Entries = BTreeMap<String, BTreeMap<String, String>>;

/// Stores secrets encrypted in a single file
pub struct EncryptedFileBackend {
    path: PathBuf,
    cipher: Aes256Gcm,
    // Serializes read-modify-write cycles within this process
    lock: Mutex<()>,
}

impl std::fmt::Debug for EncryptedFileBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedFileBackend")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl EncryptedFileBackend {
    /// Open (or prepare to create) the secret file at `path`.
    ///
    /// The file itself is created on the first write.
    ///
    /// # Errors
    /// Returns [`SecretError::Crypto`] if the passphrase is empty
    pub fn new(path: impl Into<PathBuf>, passphrase: &str) -> Result<Self, SecretError> {
        if passphrase.is_empty() {
            return Err(SecretError::Crypto("passphrase must not be empty".to_string()));
        }

        let key = Sha256::digest(passphrase.as_bytes());
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| SecretError::Crypto(format!("failed to create cipher: {e}")))?;

        Ok(Self {
            path: path.into(),
            cipher,
            lock: Mutex::new(()),
        })
    }

    /// Location of the secret file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_entries(&self) -> Result<Entries, SecretError> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Entries::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_entries(&self, entries: &Entries) -> Result<(), SecretError> {
        let json = serde_json::to_vec_pretty(entries)?;
        write_private_file(&self.path, &json)?;
        Ok(())
    }

    fn seal(&self, plaintext: &str) -> Result<String, SecretError> {
        let nonce_bytes = rand::random::<[u8; NONCE_LEN]>();
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|e| SecretError::Crypto(format!("encryption failed: {e}")))?;

        let mut sealed = nonce_bytes.to_vec();
        sealed.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(sealed))
    }

    fn open(&self, sealed: &str) -> Result<String, SecretError> {
        let bytes = STANDARD
            .decode(sealed)
            .map_err(|e| SecretError::Crypto(format!("invalid encoding: {e}")))?;
        if bytes.len() < NONCE_LEN {
            return Err(SecretError::Crypto("sealed value too short".to_string()));
        }

        let (nonce, ciphertext) = bytes.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| SecretError::Crypto("decryption failed (wrong passphrase?)".to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|e| SecretError::Crypto(format!("invalid UTF-8: {e}")))
    }

    fn guard(&self) -> Result<std::sync::MutexGuard<'_, ()>, SecretError> {
        self.lock
            .lock()
            .map_err(|_| SecretError::Backend("secret file lock poisoned".to_string()))
    }
}

impl SecretBackend for EncryptedFileBackend {
    fn set(&self, namespace: &str, key: &str, value: &str) -> Result<(), SecretError> {
        let _guard = self.guard()?;
        let mut entries = self.read_entries()?;
        let sealed = self.seal(value)?;
        entries
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), sealed);
        self.write_entries(&entries)
    }

    fn get(&self, namespace: &str, key: &str) -> Result<String, SecretError> {
        let _guard = self.guard()?;
        let entries = self.read_entries()?;
        let sealed = entries
            .get(namespace)
            .and_then(|keys| keys.get(key))
            .ok_or(SecretError::NotFound)?;
        self.open(sealed)
    }

    fn delete(&self, namespace: &str, key: &str) -> Result<(), SecretError> {
        let _guard = self.guard()?;
        let mut entries = self.read_entries()?;

        let keys = entries.get_mut(namespace).ok_or(SecretError::NotFound)?;
        keys.remove(key).ok_or(SecretError::NotFound)?;
        if keys.is_empty() {
            entries.remove(namespace);
        }

        self.write_entries(&entries)
    }
}
