//! Login sessions and token renewal
//!
//! [`SessionManager`] ties the authenticators to the config file and the
//! secret store: it logs tenants in and out, hands out access tokens, and
//! renews them through whichever grant the tenant was logged in with.
//!
//! # Example
//!
//! ```no_run
//! use tenant_auth::{ConfigStore, SessionManager};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> tenant_auth::Result<()> {
//!     let path = ConfigStore::default_path().unwrap_or_else(|| "config.json".into());
//!     let mut session = SessionManager::builder()
//!         .config(ConfigStore::load_or_empty(path)?)
//!         .build();
//!
//!     let cancel = CancellationToken::new();
//!     if !session.is_logged_in_with_tenant(None) {
//!         session.login_as_user(&[], None, &cancel).await?;
//!     }
//!
//!     let token = session.access_token(None, &cancel).await?;
//!     println!("Authorization: Bearer {token}");
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use typed_builder::TypedBuilder;

use crate::auth::{
    AuthError, ClientCredentials, ClientCredentialsAuthenticator, DeviceAuthenticator,
    PrivateKeyJwtCredentials, TokenResult, decode_claims, scopes::with_additional_scopes,
};
use crate::config::{AuthMethod, ConfigStore, Tenant};
use crate::error::{Result, TenantAuthError};
use crate::secret::SecretStore;

/// Obtains a fresh access token for an already logged-in tenant
#[async_trait]
pub trait TokenRenewer: Send + Sync {
    /// Run the renewal grant for `tenant`, reading its stored credential
    /// from `secrets`.
    async fn renew(
        &self,
        tenant: &Tenant,
        secrets: &SecretStore,
        cancel: &CancellationToken,
    ) -> Result<TokenResult>;
}

#[async_trait]
impl TokenRenewer for DeviceAuthenticator {
    async fn renew(
        &self,
        tenant: &Tenant,
        secrets: &SecretStore,
        cancel: &CancellationToken,
    ) -> Result<TokenResult> {
        let refresh_token = secrets.refresh_token(&tenant.domain)?;
        Ok(self.refresh(&refresh_token, cancel).await?)
    }
}

#[async_trait]
impl TokenRenewer for ClientCredentialsAuthenticator {
    async fn renew(
        &self,
        tenant: &Tenant,
        secrets: &SecretStore,
        cancel: &CancellationToken,
    ) -> Result<TokenResult> {
        if let AuthMethod::PrivateKeyJwt {
            client_id,
            signing_alg,
        } = &tenant.auth_method
        {
            let credentials = PrivateKeyJwtCredentials::builder()
                .client_id(client_id.as_str())
                .private_key_pem(secrets.client_assertion_key(&tenant.domain)?)
                .signing_alg(*signing_alg)
                .domain(tenant.domain.as_str())
                .build();
            return Ok(self.authenticate_with_private_key(&credentials, cancel).await?);
        }

        let credentials = ClientCredentials::builder()
            .client_id(tenant.client_id())
            .client_secret(secrets.client_secret(&tenant.domain)?)
            .domain(tenant.domain.as_str())
            .build();
        Ok(self.authenticate(&credentials, cancel).await?)
    }
}

/// Logs tenants in and out and keeps their access tokens usable
#[derive(Debug, TypedBuilder)]
pub struct SessionManager {
    /// Tenant registry
    config: ConfigStore,
    /// Where tokens and client secrets are kept (default: OS keyring)
    #[builder(default)]
    secrets: SecretStore,
    /// Device flow and refresh grants
    #[builder(default)]
    device: DeviceAuthenticator,
    /// Client credentials grant
    #[builder(default)]
    client_credentials: ClientCredentialsAuthenticator,
}

impl SessionManager {
    /// Tenant registry
    #[must_use]
    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    /// Mutable tenant registry, for default-tenant and app selection
    pub fn config_mut(&mut self) -> &mut ConfigStore {
        &mut self.config
    }

    /// Secret store in use
    #[must_use]
    pub fn secrets(&self) -> &SecretStore {
        &self.secrets
    }

    /// Log a person in with the device flow.
    ///
    /// Scopes are the required set plus `additional_scopes`. With a `domain`
    /// the device code is bound to that tenant; without one the user picks
    /// a tenant in the browser.
    ///
    /// # Errors
    ///
    /// Returns an [`AuthError`] for a rejected domain, a failed device code
    /// request, a denied, expired or cancelled login, and a config error if
    /// the tenant cannot be saved. Secret store failures only log warnings.
    pub async fn login_as_user(
        &mut self,
        additional_scopes: &[String],
        domain: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Tenant> {
        let scopes = with_additional_scopes(additional_scopes);
        let audience = self
            .device
            .config()
            .ensure_audience_url(domain.unwrap_or_default())?;

        let state = tokio::select! {
            _ = cancel.cancelled() => return Err(AuthError::Cancelled.into()),
            state = self.device.request_device_code(&scopes, &audience) => state?,
        };
        self.device.present(&state);

        let login = self.device.poll_for_token(&state, cancel).await?;

        let mut tenant = Tenant::new(
            login.tenant.name,
            login.tenant.domain,
            AuthMethod::DeviceCode,
        );
        tenant.scopes = scopes;
        tenant.expires_at = login.token.expires_at;

        if let Some(refresh_token) = &login.token.refresh_token {
            if let Err(e) = self.secrets.store_refresh_token(&tenant.domain, refresh_token) {
                tracing::warn!(
                    domain = %tenant.domain,
                    "Could not store the refresh token, expect to log in again when the access token expires: {e}"
                );
            }
        }
        self.store_access_token(&mut tenant, &login.token.access_token);

        self.config.add_tenant(tenant.clone())?;
        tracing::info!(domain = %tenant.domain, "Logged in");
        Ok(tenant)
    }

    /// Log a machine in with client credentials.
    ///
    /// # Errors
    ///
    /// Returns an [`AuthError`] if the exchange fails or is cancelled, and a
    /// config error if the tenant cannot be saved. Secret store failures
    /// only log warnings.
    pub async fn login_as_machine(
        &mut self,
        credentials: &ClientCredentials,
        cancel: &CancellationToken,
    ) -> Result<Tenant> {
        let token = self
            .client_credentials
            .authenticate(credentials, cancel)
            .await?;

        let mut tenant = machine_tenant(
            &credentials.domain,
            AuthMethod::ClientCredentials {
                client_id: credentials.client_id.clone(),
            },
            credentials.scopes.clone(),
            &token,
        );

        if let Err(e) = self
            .secrets
            .store_client_secret(&tenant.domain, &credentials.client_secret)
        {
            tracing::warn!(
                domain = %tenant.domain,
                "Could not store the client secret, expect to log in again when the access token expires: {e}"
            );
        }
        self.store_access_token(&mut tenant, &token.access_token);

        self.config.add_tenant(tenant.clone())?;
        tracing::info!(domain = %tenant.domain, "Logged in with client credentials");
        Ok(tenant)
    }

    /// Log a machine in with a client assertion signed by its private key.
    ///
    /// The key is kept in the secret store so the token can be renewed
    /// without it being passed again.
    ///
    /// # Errors
    ///
    /// Returns an [`AuthError`] if the key cannot sign or the exchange fails
    /// or is cancelled, and a config error if the tenant cannot be saved.
    /// Secret store failures only log warnings.
    pub async fn login_as_machine_with_private_key(
        &mut self,
        credentials: &PrivateKeyJwtCredentials,
        cancel: &CancellationToken,
    ) -> Result<Tenant> {
        let token = self
            .client_credentials
            .authenticate_with_private_key(credentials, cancel)
            .await?;

        let mut tenant = machine_tenant(
            &credentials.domain,
            AuthMethod::PrivateKeyJwt {
                client_id: credentials.client_id.clone(),
                signing_alg: credentials.signing_alg,
            },
            credentials.scopes.clone(),
            &token,
        );

        if let Err(e) = self
            .secrets
            .store_client_assertion_key(&tenant.domain, &credentials.private_key_pem)
        {
            tracing::warn!(
                domain = %tenant.domain,
                "Could not store the private key, expect to log in again when the access token expires: {e}"
            );
        }
        self.store_access_token(&mut tenant, &token.access_token);

        self.config.add_tenant(tenant.clone())?;
        tracing::info!(
            domain = %tenant.domain,
            alg = %credentials.signing_alg,
            "Logged in with a client assertion"
        );
        Ok(tenant)
    }

    /// Forget a tenant and delete its secrets
    ///
    /// # Errors
    /// Returns a config error if the file cannot be saved, or a secret error
    /// listing the entries that could not be deleted
    pub fn logout(&mut self, domain: &str) -> Result<()> {
        self.config.remove_tenant(domain)?;
        self.secrets.delete_secrets_for_tenant(domain)?;
        tracing::info!(domain, "Logged out");
        Ok(())
    }

    /// Look up a tenant, falling back to the default tenant
    ///
    /// # Errors
    /// Returns a config error if nobody is logged in or the tenant is unknown
    pub fn resolve_tenant(&mut self, domain: Option<&str>) -> Result<Tenant> {
        let domain = match domain {
            Some(domain) => domain.to_string(),
            None => {
                self.config.validate()?;
                self.config.default_tenant().unwrap_or_default().to_string()
            }
        };
        Ok(self.config.get_tenant(&domain)?)
    }

    /// A usable access token for `domain` (or the default tenant), renewed
    /// first if it is missing, malformed or about to expire.
    ///
    /// # Errors
    ///
    /// Returns [`TenantAuthError::MissingRequiredScopes`] when a device login
    /// must be repeated to grant new scopes, config errors when not logged
    /// in, and renewal errors otherwise.
    pub async fn access_token(
        &mut self,
        domain: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let mut tenant = self.resolve_tenant(domain)?;

        match tenant.check_authentication_status(&self.secrets) {
            Ok(()) => return Ok(tenant.access_token(&self.secrets)),
            Err(TenantAuthError::InvalidToken | TenantAuthError::MalformedToken) => {}
            Err(e) => return Err(e),
        }

        tracing::debug!(domain = %tenant.domain, "Access token needs renewal");
        let token = self.regenerate_access_token(&mut tenant, cancel).await?;
        Ok(token.access_token)
    }

    /// Renew a tenant's access token and save the result.
    ///
    /// The new token goes to the secret store; if that write fails it is
    /// kept in the config file instead. A rotated refresh token replaces
    /// the stored one.
    ///
    /// # Errors
    ///
    /// Returns a secret error if the refresh token or client secret is not
    /// stored, the grant's error if renewal fails, and a config error if the
    /// tenant cannot be saved.
    pub async fn regenerate_access_token(
        &mut self,
        tenant: &mut Tenant,
        cancel: &CancellationToken,
    ) -> Result<TokenResult> {
        let renewer: &dyn TokenRenewer = match tenant.auth_method {
            AuthMethod::DeviceCode => &self.device,
            AuthMethod::ClientCredentials { .. } | AuthMethod::PrivateKeyJwt { .. } => {
                &self.client_credentials
            }
        };
        let token = renewer.renew(tenant, &self.secrets, cancel).await?;

        tenant.expires_at = token.expires_at;

        if let Some(refresh_token) = &token.refresh_token {
            if let Err(e) = self.secrets.store_refresh_token(&tenant.domain, refresh_token) {
                tracing::warn!(domain = %tenant.domain, "Could not store the rotated refresh token: {e}");
            }
        }
        self.store_access_token(tenant, &token.access_token);

        self.config.add_tenant(tenant.clone())?;
        tracing::debug!(domain = %tenant.domain, expires_at = %tenant.expires_at, "Access token renewed");
        Ok(token)
    }

    /// Whether `domain` (or the default tenant) holds an unexpired token
    /// issued by the configured issuer.
    ///
    /// Claims are read without signature verification; use this to decide
    /// whether to prompt for login, never to grant access.
    #[must_use]
    pub fn is_logged_in_with_tenant(&self, domain: Option<&str>) -> bool {
        let Some(domain) = domain.or_else(|| self.config.default_tenant()) else {
            return false;
        };
        let Ok(tenant) = self.config.get_tenant(domain) else {
            return false;
        };

        let token = tenant.access_token(&self.secrets);
        let Ok(claims) = decode_claims(&token) else {
            return false;
        };

        claims.iss.as_deref() == Some(self.device.config().issuer.as_str())
            && claims.exp.is_some_and(|exp| exp > Utc::now().timestamp())
    }

    /// Put the access token in the secret store, or in the tenant record if
    /// the store rejects it
    fn store_access_token(&self, tenant: &mut Tenant, access_token: &str) {
        match self.secrets.store_access_token(&tenant.domain, access_token) {
            Ok(()) => tenant.access_token.clear(),
            Err(e) => {
                tracing::warn!(
                    domain = %tenant.domain,
                    "Could not store the access token securely, saving it in the config file: {e}"
                );
                tenant.access_token = access_token.to_string();
            }
        }
    }
}

/// Tenant record for a machine login; the name is the domain's first label
fn machine_tenant(
    domain: &str,
    auth_method: AuthMethod,
    scopes: Vec<String>,
    token: &TokenResult,
) -> Tenant {
    let name = domain.split('.').next().unwrap_or(domain);
    let mut tenant = Tenant::new(name, domain, auth_method);
    tenant.scopes = scopes;
    tenant.expires_at = token.expires_at;
    tenant
}
