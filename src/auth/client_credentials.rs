//! OAuth 2.0 Client Credentials grant for machine logins
//!
//! The client authenticates either with its client secret or with a signed
//! client assertion (private key JWT).

use tokio_util::sync::CancellationToken;
use typed_builder::TypedBuilder;

use super::client_assertion::{
    CLIENT_ASSERTION_TYPE, SigningAlgorithm, assertion_audience, create_client_assertion,
};
use super::oauth::{
    AuthError, AuthResult, TokenReply, TokenResult, audience_for_domain, read_token_reply,
};
use super::scopes::required_scopes_for_client_credentials;

/// Machine credentials for one tenant
#[derive(Clone, TypedBuilder)]
pub struct ClientCredentials {
    /// Client ID of the machine-to-machine application
    #[builder(setter(into))]
    pub client_id: String,
    /// Client secret of the application
    #[builder(setter(into))]
    pub client_secret: String,
    /// Tenant domain, e.g. `acme.us.example.com`
    #[builder(setter(into))]
    pub domain: String,
    /// Scopes to request; defaults to the client-credentials scope set
    #[builder(default = required_scopes_for_client_credentials())]
    pub scopes: Vec<String>,
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("domain", &self.domain)
            .field("scopes", &self.scopes.len())
            .finish()
    }
}

/// Machine credentials that authenticate with a private key instead of a secret
#[derive(Clone, TypedBuilder)]
pub struct PrivateKeyJwtCredentials {
    /// Client ID of the machine-to-machine application
    #[builder(setter(into))]
    pub client_id: String,
    /// RSA private key in PEM format
    #[builder(setter(into))]
    pub private_key_pem: String,
    /// Algorithm the assertion is signed with
    #[builder(default)]
    pub signing_alg: SigningAlgorithm,
    /// Tenant domain, e.g. `acme.us.example.com`
    #[builder(setter(into))]
    pub domain: String,
    /// Scopes to request; defaults to the client-credentials scope set
    #[builder(default = required_scopes_for_client_credentials())]
    pub scopes: Vec<String>,
}

impl std::fmt::Debug for PrivateKeyJwtCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateKeyJwtCredentials")
            .field("client_id", &self.client_id)
            .field("private_key_pem", &"<redacted>")
            .field("signing_alg", &self.signing_alg)
            .field("domain", &self.domain)
            .field("scopes", &self.scopes.len())
            .finish()
    }
}

/// Exchanges client credentials for access tokens at `https://{domain}/oauth/token`.
///
/// No retries: a failed exchange is reported to the caller as-is.
#[derive(Debug, Clone, Default)]
pub struct ClientCredentialsAuthenticator {
    http_client: reqwest::Client,
    endpoint_override: Option<String>,
}

impl ClientCredentialsAuthenticator {
    /// Create an authenticator with a default HTTP client
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a preconfigured HTTP client
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = client;
        self
    }

    /// Send token requests to `{base_url}/oauth/token` instead of the tenant
    /// domain. The audience still names the tenant domain.
    #[must_use]
    pub fn with_endpoint_override(mut self, base_url: impl Into<String>) -> Self {
        self.endpoint_override = Some(base_url.into().trim_end_matches('/').to_string());
        self
    }

    fn token_url(&self, domain: &str) -> String {
        match &self.endpoint_override {
            Some(base) => format!("{base}/oauth/token"),
            None => format!("https://{domain}/oauth/token"),
        }
    }

    /// Run the client-credentials exchange.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Cancelled`] if `cancel` fires mid-request, the
    /// server's description for OAuth errors, a status error for other
    /// non-2xx answers, and transport/decode errors.
    pub async fn authenticate(
        &self,
        credentials: &ClientCredentials,
        cancel: &CancellationToken,
    ) -> AuthResult<TokenResult> {
        let audience = audience_for_domain(&credentials.domain);
        let scope = credentials.scopes.join(" ");
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.as_str()),
            ("audience", audience.as_str()),
            ("scope", scope.as_str()),
        ];

        tracing::debug!(domain = %credentials.domain, "Requesting client credentials token");
        self.exchange(&credentials.domain, &params, cancel).await
    }

    /// Run the client-credentials exchange with a signed client assertion.
    ///
    /// A fresh assertion (two-minute lifetime, audience `https://{domain}/`)
    /// is signed for every call.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::ClientAssertion`] if the key cannot sign, and
    /// otherwise the same errors as [`authenticate`](Self::authenticate).
    pub async fn authenticate_with_private_key(
        &self,
        credentials: &PrivateKeyJwtCredentials,
        cancel: &CancellationToken,
    ) -> AuthResult<TokenResult> {
        let assertion = create_client_assertion(
            credentials.signing_alg,
            &credentials.private_key_pem,
            &credentials.client_id,
            &assertion_audience(&credentials.domain),
        )?;
        let audience = audience_for_domain(&credentials.domain);
        let scope = credentials.scopes.join(" ");
        let params = [
            ("grant_type", "client_credentials"),
            ("client_assertion_type", CLIENT_ASSERTION_TYPE),
            ("client_assertion", assertion.as_str()),
            ("audience", audience.as_str()),
            ("scope", scope.as_str()),
        ];

        tracing::debug!(
            domain = %credentials.domain,
            alg = %credentials.signing_alg,
            "Requesting client credentials token with a client assertion"
        );
        self.exchange(&credentials.domain, &params, cancel).await
    }

    async fn exchange(
        &self,
        domain: &str,
        params: &[(&str, &str)],
        cancel: &CancellationToken,
    ) -> AuthResult<TokenResult> {
        let params: Vec<_> = params
            .iter()
            .filter(|(name, value)| *name != "scope" || !value.is_empty())
            .collect();
        let url = self.token_url(domain);

        let request = async {
            let response = self.http_client.post(&url).form(&params).send().await?;
            read_token_reply(response).await
        };

        let reply = tokio::select! {
            _ = cancel.cancelled() => return Err(AuthError::Cancelled),
            reply = request => reply?,
        };

        match reply {
            TokenReply::Token(response) => Ok(response.into()),
            TokenReply::Error(err) => Err(AuthError::protocol(err.error, err.error_description)),
        }
    }
}
