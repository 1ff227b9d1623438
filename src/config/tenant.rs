//! Tenant records and their token lifecycle rules

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::{SigningAlgorithm, decode_claims, scopes::required_scopes};
use crate::error::{Result, TenantAuthError};
use crate::secret::SecretStore;

/// Tokens expiring within this window are renewed ahead of time
pub const TOKEN_RENEWAL_WINDOW: TimeDelta = TimeDelta::minutes(5);

/// How a tenant was authenticated
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AuthMethod {
    /// Interactive device authorization; renewed with a refresh token
    #[default]
    DeviceCode,
    /// Machine login; renewed with the client secret of `client_id`
    ClientCredentials {
        /// Client ID of the machine-to-machine application
        client_id: String,
    },
    /// Machine login; renewed with an assertion signed by the stored private key
    PrivateKeyJwt {
        /// Client ID of the machine-to-machine application
        client_id: String,
        /// Algorithm assertions are signed with
        signing_alg: SigningAlgorithm,
    },
}

/// One authenticated tenant, keyed by domain in the config file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TenantRecord", into = "TenantRecord")]
pub struct Tenant {
    /// Short tenant name (first label of the domain)
    pub name: String,
    /// Tenant domain, unique per installation
    pub domain: String,
    /// Plaintext access token, used only when the secret store is unavailable
    pub access_token: String,
    /// Scopes granted at login
    pub scopes: Vec<String>,
    /// When the access token expires
    pub expires_at: DateTime<Utc>,
    /// Application selected as default for app-scoped commands
    pub default_app_id: String,
    /// Grant used to log in and to renew tokens
    pub auth_method: AuthMethod,
}

impl Tenant {
    /// Create a tenant record with no token yet
    pub fn new(name: impl Into<String>, domain: impl Into<String>, auth_method: AuthMethod) -> Self {
        Self {
            name: name.into(),
            domain: domain.into(),
            access_token: String::new(),
            scopes: Vec::new(),
            expires_at: DateTime::<Utc>::default(),
            default_app_id: String::new(),
            auth_method,
        }
    }

    /// Client ID for machine logins, empty for device logins
    #[must_use]
    pub fn client_id(&self) -> &str {
        match &self.auth_method {
            AuthMethod::ClientCredentials { client_id }
            | AuthMethod::PrivateKeyJwt { client_id, .. } => client_id,
            AuthMethod::DeviceCode => "",
        }
    }

    /// Whether the tenant was logged in as a machine, with a client secret
    /// or a private key
    #[must_use]
    pub fn is_authenticated_with_client_credentials(&self) -> bool {
        matches!(
            self.auth_method,
            AuthMethod::ClientCredentials { .. } | AuthMethod::PrivateKeyJwt { .. }
        )
    }

    /// Whether the tenant was logged in with a signed client assertion
    #[must_use]
    pub fn is_authenticated_with_private_key_jwt(&self) -> bool {
        matches!(self.auth_method, AuthMethod::PrivateKeyJwt { .. })
    }

    /// Whether the tenant was logged in with the device flow
    #[must_use]
    pub fn is_authenticated_with_device_code_flow(&self) -> bool {
        matches!(self.auth_method, AuthMethod::DeviceCode)
    }

    /// Required scopes this tenant was not granted
    #[must_use]
    pub fn missing_required_scopes(&self) -> Vec<String> {
        required_scopes()
            .into_iter()
            .filter(|scope| !self.scopes.contains(scope))
            .collect()
    }

    /// Whether every required scope was granted
    #[must_use]
    pub fn has_all_required_scopes(&self) -> bool {
        self.missing_required_scopes().is_empty()
    }

    /// Scopes granted on top of the required set
    #[must_use]
    pub fn get_extra_requested_scopes(&self) -> Vec<String> {
        let required = required_scopes();
        self.scopes
            .iter()
            .filter(|scope| !required.contains(scope))
            .cloned()
            .collect()
    }

    /// Whether the access token is expired or about to be
    #[must_use]
    pub fn has_expired_token(&self) -> bool {
        self.has_expired_token_at(Utc::now())
    }

    /// [`has_expired_token`](Self::has_expired_token) against an explicit clock
    #[must_use]
    pub fn has_expired_token_at(&self, now: DateTime<Utc>) -> bool {
        match now.checked_add_signed(TOKEN_RENEWAL_WINDOW) {
            Some(threshold) => threshold > self.expires_at,
            None => true,
        }
    }

    /// Current access token: the secret store copy if there is a non-empty
    /// one, the plaintext field otherwise.
    #[must_use]
    pub fn access_token(&self, secrets: &SecretStore) -> String {
        match secrets.access_token(&self.domain) {
            Ok(token) if !token.is_empty() => token,
            Ok(_) => self.access_token.clone(),
            Err(e) => {
                if !e.is_not_found() {
                    tracing::warn!(domain = %self.domain, "Falling back to stored plaintext token: {e}");
                }
                self.access_token.clone()
            }
        }
    }

    /// Check whether the tenant can be used without logging in again.
    ///
    /// # Errors
    ///
    /// - [`TenantAuthError::MissingRequiredScopes`] for device logins that
    ///   lack required scopes
    /// - [`TenantAuthError::InvalidToken`] when the token is absent or expiring
    /// - [`TenantAuthError::MalformedToken`] when the token is not a JWT
    pub fn check_authentication_status(&self, secrets: &SecretStore) -> Result<()> {
        if self.is_authenticated_with_device_code_flow() {
            let missing = self.missing_required_scopes();
            if !missing.is_empty() {
                return Err(TenantAuthError::MissingRequiredScopes { missing });
            }
        }

        let token = self.access_token(secrets);
        if token.is_empty() || self.has_expired_token() {
            return Err(TenantAuthError::InvalidToken);
        }

        decode_claims(&token).map_err(|_| TenantAuthError::MalformedToken)?;
        Ok(())
    }
}

/// On-disk shape of a tenant
#[derive(Serialize, Deserialize)]
struct TenantRecord {
    #[serde(default)]
    name: String,
    #[serde(default)]
    domain: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    access_token: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    scopes: Vec<String>,
    #[serde(default)]
    expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    default_app_id: String,
    #[serde(default)]
    client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    client_assertion_signing_alg: Option<SigningAlgorithm>,
    // Absent in records written before the mode was stored explicitly
    #[serde(default, skip_serializing_if = "Option::is_none")]
    auth_method: Option<AuthMethodKind>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum AuthMethodKind {
    DeviceCode,
    ClientCredentials,
    PrivateKeyJwt,
}

impl TryFrom<TenantRecord> for Tenant {
    type Error = String;

    fn try_from(record: TenantRecord) -> std::result::Result<Self, Self::Error> {
        let kind = record.auth_method.unwrap_or(if record.client_id.is_empty() {
            AuthMethodKind::DeviceCode
        } else {
            AuthMethodKind::ClientCredentials
        });

        let auth_method = match kind {
            AuthMethodKind::DeviceCode => AuthMethod::DeviceCode,
            AuthMethodKind::ClientCredentials | AuthMethodKind::PrivateKeyJwt
                if record.client_id.is_empty() =>
            {
                return Err(format!(
                    "tenant {} uses client credentials but has no client_id",
                    record.domain
                ));
            }
            AuthMethodKind::ClientCredentials => AuthMethod::ClientCredentials {
                client_id: record.client_id,
            },
            AuthMethodKind::PrivateKeyJwt => AuthMethod::PrivateKeyJwt {
                client_id: record.client_id,
                signing_alg: record.client_assertion_signing_alg.ok_or_else(|| {
                    format!(
                        "tenant {} uses a private key but has no client_assertion_signing_alg",
                        record.domain
                    )
                })?,
            },
        };

        Ok(Self {
            name: record.name,
            domain: record.domain,
            access_token: record.access_token,
            scopes: record.scopes,
            expires_at: record.expires_at,
            default_app_id: record.default_app_id,
            auth_method,
        })
    }
}

impl From<Tenant> for TenantRecord {
    fn from(tenant: Tenant) -> Self {
        let (client_id, signing_alg, kind) = match tenant.auth_method {
            AuthMethod::DeviceCode => (String::new(), None, AuthMethodKind::DeviceCode),
            AuthMethod::ClientCredentials { client_id } => {
                (client_id, None, AuthMethodKind::ClientCredentials)
            }
            AuthMethod::PrivateKeyJwt {
                client_id,
                signing_alg,
            } => (client_id, Some(signing_alg), AuthMethodKind::PrivateKeyJwt),
        };

        Self {
            name: tenant.name,
            domain: tenant.domain,
            access_token: tenant.access_token,
            scopes: tenant.scopes,
            expires_at: tenant.expires_at,
            default_app_id: tenant.default_app_id,
            client_id,
            client_assertion_signing_alg: signing_alg,
            auth_method: Some(kind),
        }
    }
}
