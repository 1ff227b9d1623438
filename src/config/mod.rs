//! Multi-tenant configuration file
//!
//! One JSON file records every tenant the CLI is logged in to, which one is
//! the default, and a stable installation ID. Tokens are kept out of it when
//! the secret store works; see [`crate::secret`].
//!
//! ```json
//! {
//!     "install_id": "7c0f5b3e-...",
//!     "default_tenant": "acme.us.example.com",
//!     "tenants": {
//!         "acme.us.example.com": {
//!             "name": "acme",
//!             "domain": "acme.us.example.com",
//!             "expires_at": "2025-01-01T00:00:00Z",
//!             "client_id": "",
//!             "auth_method": "device_code"
//!         }
//!     }
//! }
//! ```
//!
//! Every mutation is written back before it returns. Writes go through a
//! temporary file and a rename, so a crash leaves either the old or the new
//! file behind.

mod tenant;

pub use tenant::{AuthMethod, TOKEN_RENEWAL_WINDOW, Tenant};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

use crate::utils::write_private_file;

const CONFIG_DIR_NAME: &str = "tenant-auth";
const CONFIG_FILE_NAME: &str = "config.json";
const INDENT: &[u8] = b"    ";

/// Errors that can occur while reading or updating the config file
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No config file yet: nobody has logged in on this machine
    #[error("config file is missing; log in first")]
    FileMissing,

    /// The config file exists but holds no tenants
    #[error("not logged in to any tenant; log in first")]
    NoAuthenticatedTenants,

    /// The config file is not valid JSON or has an unexpected shape
    #[error(transparent)]
    Corrupt(serde_json::Error),

    /// The config could not be serialized
    #[error("failed to encode config: {0}")]
    Encode(serde_json::Error),

    /// No tenant with this domain is configured
    #[error(
        "failed to find tenant {0}; list the configured tenants or log in to add a new one"
    )]
    TenantNotFound(String),

    /// Reading or writing the file failed
    #[error("config file I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Contents of the config file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Installation ID, assigned on first login and never changed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_id: Option<Uuid>,
    /// Domain of the default tenant, empty if none
    #[serde(default)]
    pub default_tenant: String,
    /// Tenants keyed by domain
    #[serde(default)]
    pub tenants: BTreeMap<String, Tenant>,
}

impl Config {
    /// Decode a config file's contents
    ///
    /// # Errors
    /// Returns [`ConfigError::Corrupt`] with the decoder's message
    pub fn from_json(bytes: &[u8]) -> Result<Self, ConfigError> {
        serde_json::from_slice(bytes).map_err(ConfigError::Corrupt)
    }

    /// Encode as 4-space indented JSON
    ///
    /// # Errors
    /// Returns [`ConfigError::Encode`] if serialization fails
    pub fn to_json(&self) -> Result<Vec<u8>, ConfigError> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(INDENT);
        let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.serialize(&mut serializer).map_err(ConfigError::Encode)?;
        Ok(buf)
    }

    /// Lexicographically smallest tenant domain
    fn first_domain(&self) -> Option<&str> {
        self.tenants.keys().next().map(String::as_str)
    }
}

/// Loaded config file plus the path it is saved to
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
    config: Config,
    on_disk: bool,
}

impl ConfigStore {
    /// Platform default location: `<config dir>/tenant-auth/config.json`
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Load the config file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::FileMissing`] if there is no file,
    /// [`ConfigError::Corrupt`] if it cannot be decoded, and
    /// [`ConfigError::Io`] for other read failures.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let config = read_config(&path)?;
        tracing::debug!(path = %path.display(), tenants = config.tenants.len(), "Loaded config");
        Ok(Self {
            path,
            config,
            on_disk: true,
        })
    }

    /// Load the config file at `path`, starting empty if it does not exist.
    ///
    /// # Errors
    ///
    /// Same as [`load`](Self::load), except that a missing file is not an error.
    pub fn load_or_empty(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        match Self::load(path.clone()) {
            Err(ConfigError::FileMissing) => Ok(Self {
                path,
                config: Config::default(),
                on_disk: false,
            }),
            other => other,
        }
    }

    /// Path the config is saved to
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current in-memory config
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Installation ID, if any tenant has been added yet
    #[must_use]
    pub fn install_id(&self) -> Option<Uuid> {
        self.config.install_id
    }

    /// Domain of the default tenant, if one is set
    #[must_use]
    pub fn default_tenant(&self) -> Option<&str> {
        Some(self.config.default_tenant.as_str()).filter(|domain| !domain.is_empty())
    }

    /// Make sure at least one tenant is configured and the default points at one.
    ///
    /// A missing or dangling default is repaired by picking the smallest
    /// domain, and the repair is saved.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::FileMissing`] if nothing was ever saved,
    /// [`ConfigError::NoAuthenticatedTenants`] if the tenant list is empty,
    /// or a save error.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if self.config.tenants.is_empty() {
            return Err(if self.on_disk {
                ConfigError::NoAuthenticatedTenants
            } else {
                ConfigError::FileMissing
            });
        }

        if self.config.tenants.contains_key(&self.config.default_tenant) {
            return Ok(());
        }

        let repaired = self.config.first_domain().unwrap_or_default().to_string();
        tracing::debug!(
            previous = %self.config.default_tenant,
            default_tenant = %repaired,
            "Repairing default tenant"
        );
        self.config.default_tenant = repaired;
        self.save()
    }

    /// Insert or replace a tenant, keyed by its domain.
    ///
    /// The file is re-read first so changes made by another process since
    /// this store was loaded are kept.
    ///
    /// # Errors
    /// Returns [`ConfigError::Corrupt`] if the file on disk cannot be decoded,
    /// or a save error.
    pub fn add_tenant(&mut self, tenant: Tenant) -> Result<(), ConfigError> {
        match read_config(&self.path) {
            Ok(config) => {
                self.config = config;
                self.on_disk = true;
            }
            Err(ConfigError::FileMissing) => {}
            Err(e) => return Err(e),
        }

        if self.config.install_id.is_none() {
            self.config.install_id = Some(Uuid::new_v4());
        }
        if self.config.default_tenant.is_empty() {
            self.config.default_tenant = tenant.domain.clone();
        }

        tracing::debug!(domain = %tenant.domain, "Saving tenant");
        self.config.tenants.insert(tenant.domain.clone(), tenant);
        self.save()
    }

    /// Remove a tenant, choosing a new default if it was the default.
    ///
    /// Missing tenants and missing files are not errors.
    ///
    /// # Errors
    /// Returns a save error
    pub fn remove_tenant(&mut self, domain: &str) -> Result<(), ConfigError> {
        if !self.on_disk {
            return Ok(());
        }

        if self.config.tenants.is_empty() {
            if self.config.default_tenant.is_empty() {
                return Ok(());
            }
            self.config.default_tenant.clear();
            return self.save();
        }

        self.config.tenants.remove(domain);

        if self.config.default_tenant == domain {
            self.config.default_tenant = self.config.first_domain().unwrap_or_default().to_string();
        }

        tracing::debug!(domain, default_tenant = %self.config.default_tenant, "Removed tenant");
        self.save()
    }

    /// Look up a tenant by domain
    ///
    /// # Errors
    /// Returns [`ConfigError::TenantNotFound`] if there is no such tenant
    pub fn get_tenant(&self, domain: &str) -> Result<Tenant, ConfigError> {
        self.config
            .tenants
            .get(domain)
            .cloned()
            .ok_or_else(|| ConfigError::TenantNotFound(domain.to_string()))
    }

    /// All tenants, ordered by domain
    ///
    /// # Errors
    /// Same as [`validate`](Self::validate)
    pub fn list_all_tenants(&mut self) -> Result<Vec<Tenant>, ConfigError> {
        self.validate()?;
        Ok(self.config.tenants.values().cloned().collect())
    }

    /// Make `domain` the default tenant
    ///
    /// # Errors
    /// Returns [`ConfigError::TenantNotFound`] if there is no such tenant, or a save error
    pub fn set_default_tenant(&mut self, domain: &str) -> Result<(), ConfigError> {
        let tenant = self.get_tenant(domain)?;
        self.config.default_tenant = tenant.domain;
        self.save()
    }

    /// Set the default application of a tenant
    ///
    /// # Errors
    /// Returns [`ConfigError::TenantNotFound`] if there is no such tenant, or a save error
    pub fn set_default_app_id_for_tenant(
        &mut self,
        domain: &str,
        app_id: &str,
    ) -> Result<(), ConfigError> {
        let tenant = self
            .config
            .tenants
            .get_mut(domain)
            .ok_or_else(|| ConfigError::TenantNotFound(domain.to_string()))?;
        tenant.default_app_id = app_id.to_string();
        self.save()
    }

    /// Write the config to disk
    ///
    /// # Errors
    /// Returns an encode or I/O error
    pub fn save(&mut self) -> Result<(), ConfigError> {
        let json = self.config.to_json()?;
        write_private_file(&self.path, &json)?;
        self.on_disk = true;
        Ok(())
    }
}

fn read_config(path: &Path) -> Result<Config, ConfigError> {
    match std::fs::read(path) {
        Ok(bytes) => Config::from_json(&bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ConfigError::FileMissing),
        Err(e) => Err(e.into()),
    }
}
