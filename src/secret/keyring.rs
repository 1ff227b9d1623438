//! OS credential manager backend

use keyring::Entry;

use super::{SecretBackend, SecretError};

/// Stores secrets in the OS credential manager.
///
/// The namespace becomes the keyring service name and the key becomes the
/// account name.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeyringBackend;

impl KeyringBackend {
    /// Create a backend over the platform's default credential store
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn entry(namespace: &str, key: &str) -> Result<Entry, SecretError> {
        Entry::new(namespace, key)
            .map_err(|e| SecretError::Backend(format!("failed to access keyring: {e}")))
    }
}

fn map_keyring_error(err: keyring::Error) -> SecretError {
    match err {
        keyring::Error::NoEntry => SecretError::NotFound,
        other => SecretError::Backend(other.to_string()),
    }
}

impl SecretBackend for KeyringBackend {
    fn set(&self, namespace: &str, key: &str, value: &str) -> Result<(), SecretError> {
        Self::entry(namespace, key)?
            .set_password(value)
            .map_err(map_keyring_error)
    }

    fn get(&self, namespace: &str, key: &str) -> Result<String, SecretError> {
        Self::entry(namespace, key)?
            .get_password()
            .map_err(map_keyring_error)
    }

    fn delete(&self, namespace: &str, key: &str) -> Result<(), SecretError> {
        Self::entry(namespace, key)?
            .delete_credential()
            .map_err(map_keyring_error)
    }
}
