//! Secret storage for tokens and client secrets
//!
//! Secrets live outside the plaintext config file, in a [`SecretBackend`]
//! chosen at construction:
//!
//! - [`KeyringBackend`] - the OS credential manager (Keychain, Credential
//!   Manager, kernel keyring)
//! - [`EncryptedFileBackend`] - an AES-256-GCM encrypted file, for hosts
//!   without a credential manager
//! - [`MemoryBackend`] - process-local, for tests
//!
//! Each entry is addressed by a `(namespace, key)` pair: the namespace names
//! the kind of secret and the key is the tenant domain.
//!
//! Access tokens can exceed the per-entry size limit of some credential
//! managers, so they are split across numbered entries
//! (`"<namespace> 0"`, `"<namespace> 1"`, ...) and concatenated on read.

mod file;
mod keyring;
mod memory;

pub use file::EncryptedFileBackend;
pub use self::keyring::KeyringBackend;
pub use memory::MemoryBackend;

use std::sync::Arc;
use thiserror::Error;

use crate::utils::chunk_str;

const REFRESH_TOKEN_NAMESPACE: &str = "tenant-auth refresh token";
const CLIENT_SECRET_NAMESPACE: &str = "tenant-auth client secret";
const CLIENT_ASSERTION_KEY_NAMESPACE: &str = "tenant-auth client assertion key";
const ACCESS_TOKEN_NAMESPACE: &str = "tenant-auth access token";

/// Largest access-token chunk written to a single entry
pub const ACCESS_TOKEN_CHUNK_BYTES: usize = 2048;

/// Most access-token chunks written, read or deleted
pub const ACCESS_TOKEN_MAX_CHUNKS: usize = 50;

/// Errors that can occur during secret storage operations
#[derive(Debug, Error)]
pub enum SecretError {
    /// No secret stored under this namespace and key
    #[error("secret not found")]
    NotFound,

    /// The underlying credential store failed
    #[error("secret store error: {0}")]
    Backend(String),

    /// Encrypted secret could not be decrypted or encrypted
    #[error("secret encryption error: {0}")]
    Crypto(String),

    /// I/O error in a file-backed store
    #[error("secret store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Secret file is not valid JSON
    #[error("secret store JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Value needs more entries than the store keeps for it
    #[error("secret of {len} bytes does not fit in {max_chunks} entries")]
    TooLarge {
        /// Size of the rejected value
        len: usize,
        /// Entries available for it
        max_chunks: usize,
    },
}

impl SecretError {
    /// Whether this error only means "nothing stored"
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

/// Key/value storage for secrets
///
/// Implementations must report a missing entry as [`SecretError::NotFound`]
/// and keep every other failure distinguishable from it.
pub trait SecretBackend: Send + Sync + std::fmt::Debug {
    /// Store `value` under `(namespace, key)`, replacing any previous value
    ///
    /// # Errors
    /// Returns error if the store rejects the write
    fn set(&self, namespace: &str, key: &str, value: &str) -> Result<(), SecretError>;

    /// Read the value under `(namespace, key)`
    ///
    /// # Errors
    /// Returns [`SecretError::NotFound`] if absent, other errors if the store fails
    fn get(&self, namespace: &str, key: &str) -> Result<String, SecretError>;

    /// Remove the value under `(namespace, key)`
    ///
    /// # Errors
    /// Returns [`SecretError::NotFound`] if absent, other errors if the store fails
    fn delete(&self, namespace: &str, key: &str) -> Result<(), SecretError>;
}

/// Typed access to the secrets kept for each tenant
#[derive(Debug, Clone)]
pub struct SecretStore {
    backend: Arc<dyn SecretBackend>,
}

impl Default for SecretStore {
    fn default() -> Self {
        Self::keyring()
    }
}

impl SecretStore {
    /// Wrap an arbitrary backend
    pub fn new(backend: impl SecretBackend + 'static) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    /// Store backed by the OS credential manager
    #[must_use]
    pub fn keyring() -> Self {
        Self::new(KeyringBackend::new())
    }

    /// Process-local store
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(MemoryBackend::new())
    }

    /// Access the raw backend
    #[must_use]
    pub fn backend(&self) -> &dyn SecretBackend {
        self.backend.as_ref()
    }

    /// Store a tenant's refresh token
    ///
    /// # Errors
    /// Returns error if the backend rejects the write
    pub fn store_refresh_token(&self, domain: &str, value: &str) -> Result<(), SecretError> {
        self.backend.set(REFRESH_TOKEN_NAMESPACE, domain, value)
    }

    /// Read a tenant's refresh token
    ///
    /// # Errors
    /// Returns [`SecretError::NotFound`] if none is stored
    pub fn refresh_token(&self, domain: &str) -> Result<String, SecretError> {
        self.backend.get(REFRESH_TOKEN_NAMESPACE, domain)
    }

    /// Store a tenant's client secret
    ///
    /// # Errors
    /// Returns error if the backend rejects the write
    pub fn store_client_secret(&self, domain: &str, value: &str) -> Result<(), SecretError> {
        self.backend.set(CLIENT_SECRET_NAMESPACE, domain, value)
    }

    /// Read a tenant's client secret
    ///
    /// # Errors
    /// Returns [`SecretError::NotFound`] if none is stored
    pub fn client_secret(&self, domain: &str) -> Result<String, SecretError> {
        self.backend.get(CLIENT_SECRET_NAMESPACE, domain)
    }

    /// Store a tenant's private key for client assertions (PEM)
    ///
    /// # Errors
    /// Returns error if the backend rejects the write
    pub fn store_client_assertion_key(&self, domain: &str, pem: &str) -> Result<(), SecretError> {
        self.backend.set(CLIENT_ASSERTION_KEY_NAMESPACE, domain, pem)
    }

    /// Read a tenant's private key for client assertions
    ///
    /// # Errors
    /// Returns [`SecretError::NotFound`] if none is stored
    pub fn client_assertion_key(&self, domain: &str) -> Result<String, SecretError> {
        self.backend.get(CLIENT_ASSERTION_KEY_NAMESPACE, domain)
    }

    /// Store a tenant's access token, split into chunks when large.
    ///
    /// Chunks left over from a previous, longer token are removed first so
    /// they cannot be appended on the next read. If any step fails, every
    /// chunk is removed (best effort) so a partial or stale token is never
    /// read back in place of the caller's fallback copy.
    ///
    /// # Errors
    /// Returns [`SecretError::TooLarge`] if the token needs more than
    /// [`ACCESS_TOKEN_MAX_CHUNKS`] entries, or the backend's error if
    /// clearing old chunks or writing a new one fails
    pub fn store_access_token(&self, domain: &str, value: &str) -> Result<(), SecretError> {
        let result = self.write_access_token_chunks(domain, value);
        if result.is_err() {
            self.purge_access_token_chunks(domain);
        }
        result
    }

    fn write_access_token_chunks(&self, domain: &str, value: &str) -> Result<(), SecretError> {
        let chunks = chunk_str(value, ACCESS_TOKEN_CHUNK_BYTES);
        if chunks.len() > ACCESS_TOKEN_MAX_CHUNKS {
            return Err(SecretError::TooLarge {
                len: value.len(),
                max_chunks: ACCESS_TOKEN_MAX_CHUNKS,
            });
        }

        self.delete_access_token_chunks(domain)?;

        for (index, chunk) in chunks.into_iter().enumerate() {
            self.backend
                .set(&access_token_namespace(index), domain, chunk)?;
        }

        Ok(())
    }

    /// Read a tenant's access token, reassembling chunks.
    ///
    /// # Errors
    /// Returns [`SecretError::NotFound`] if no chunk is stored, other errors
    /// if the backend fails
    pub fn access_token(&self, domain: &str) -> Result<String, SecretError> {
        let mut token = String::new();

        for index in 0..ACCESS_TOKEN_MAX_CHUNKS {
            match self.backend.get(&access_token_namespace(index), domain) {
                Ok(chunk) => token.push_str(&chunk),
                Err(SecretError::NotFound) if index > 0 => return Ok(token),
                Err(e) => return Err(e),
            }
        }

        Ok(token)
    }

    /// Delete every secret kept for a tenant.
    ///
    /// Missing entries are not errors. Other failures are collected and
    /// reported together after every deletion has been attempted.
    ///
    /// # Errors
    /// Returns [`SecretError::Backend`] listing each failed deletion
    pub fn delete_secrets_for_tenant(&self, domain: &str) -> Result<(), SecretError> {
        let mut failures = Vec::new();

        for (label, namespace) in [
            ("refresh token", REFRESH_TOKEN_NAMESPACE),
            ("client secret", CLIENT_SECRET_NAMESPACE),
            ("client assertion key", CLIENT_ASSERTION_KEY_NAMESPACE),
        ] {
            match self.backend.delete(namespace, domain) {
                Ok(()) | Err(SecretError::NotFound) => {}
                Err(e) => failures.push(format!("failed to delete {label}: {e}")),
            }
        }

        if let Err(e) = self.delete_access_token_chunks(domain) {
            failures.push(format!("failed to delete access token: {e}"));
        }

        if failures.is_empty() {
            tracing::debug!(domain, "Deleted stored secrets");
            Ok(())
        } else {
            Err(SecretError::Backend(failures.join(", ")))
        }
    }

    fn delete_access_token_chunks(&self, domain: &str) -> Result<(), SecretError> {
        for index in 0..ACCESS_TOKEN_MAX_CHUNKS {
            match self.backend.delete(&access_token_namespace(index), domain) {
                Ok(()) => {}
                Err(SecretError::NotFound) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    // Unlike delete_access_token_chunks, keeps going past gaps and failures
    fn purge_access_token_chunks(&self, domain: &str) {
        for index in 0..ACCESS_TOKEN_MAX_CHUNKS {
            match self.backend.delete(&access_token_namespace(index), domain) {
                Ok(()) | Err(SecretError::NotFound) => {}
                Err(e) => {
                    tracing::debug!(domain, index, "Could not remove access token chunk: {e}");
                }
            }
        }
    }
}

fn access_token_namespace(index: usize) -> String {
    format!("{ACCESS_TOKEN_NAMESPACE} {index}")
}
