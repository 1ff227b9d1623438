//! Process-local secret backend

use std::collections::HashMap;
use std::sync::Mutex;

use super::{SecretBackend, SecretError};

/// Keeps secrets in a map for the lifetime of the process
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<(String, String), String>>,
}

impl MemoryBackend {
    /// Create an empty backend
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<(String, String), String>>, SecretError> {
        self.entries
            .lock()
            .map_err(|_| SecretError::Backend("memory store lock poisoned".to_string()))
    }
}

impl SecretBackend for MemoryBackend {
    fn set(&self, namespace: &str, key: &str, value: &str) -> Result<(), SecretError> {
        self.lock()?
            .insert((namespace.to_string(), key.to_string()), value.to_string());
        Ok(())
    }

    fn get(&self, namespace: &str, key: &str) -> Result<String, SecretError> {
        self.lock()?
            .get(&(namespace.to_string(), key.to_string()))
            .cloned()
            .ok_or(SecretError::NotFound)
    }

    fn delete(&self, namespace: &str, key: &str) -> Result<(), SecretError> {
        self.lock()?
            .remove(&(namespace.to_string(), key.to_string()))
            .map(|_| ())
            .ok_or(SecretError::NotFound)
    }
}
