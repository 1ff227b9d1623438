//! Shared OAuth 2.0 plumbing: endpoint configuration, errors and token payloads

use chrono::{DateTime, TimeDelta, Utc};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

use crate::utils::truncate_for_display;

// Public CLI application registered on the platform's login tenant
const DEFAULT_CLIENT_ID: &str = "tKq3bJp0d8sZ1mXw7nVr4LcYh2Ue6GfA";
const DEFAULT_DEVICE_CODE_URL: &str = "https://login.example.com/oauth/device/code";
const DEFAULT_TOKEN_URL: &str = "https://login.example.com/oauth/token";
const DEFAULT_ISSUER: &str = "https://login.example.com/";
const DEFAULT_PLATFORM_DOMAIN: &str = "example.com";
const DEFAULT_POLL_GRACE: Duration = Duration::from_secs(3);

/// Path of the management API on every tenant domain
pub const AUDIENCE_PATH: &str = "/api/v2/";

const MAX_ERROR_BODY_BYTES: usize = 512;

/// Errors that can occur during OAuth operations
#[derive(Debug, Error)]
pub enum AuthError {
    /// Network-level failure talking to an endpoint
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Endpoint answered with a non-success status and no OAuth error body
    #[error("received a {status} response: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Raw response body (truncated for display)
        body: String,
    },

    /// Response body could not be decoded
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Server returned an OAuth error code; displays the server's description verbatim
    #[error("{description}")]
    Protocol {
        /// OAuth error code (e.g. `access_denied`)
        error: String,
        /// Human-readable description from the server
        description: String,
    },

    /// Operation was cancelled by the caller
    #[error("Authentication cancelled")]
    Cancelled,

    /// The device code expired before the user finished logging in
    #[error("the device code expired before the login was completed")]
    DeviceCodeExpired,

    /// No management API audience found in the access token
    #[error("audience not found for {0}")]
    AudienceNotFound(String),

    /// Access token is not a decodable JWT
    #[error("malformed access token: {0}")]
    MalformedToken(String),

    /// Domain is not a tenant domain of this platform
    #[error("not a valid {platform} domain: {domain}")]
    InvalidDomain {
        /// The rejected input
        domain: String,
        /// Platform suffix the domain should end with
        platform: String,
    },

    /// Browser could not be opened
    #[error("Could not open browser: {0}")]
    BrowserOpen(String),

    /// Client assertion algorithm is not one of RS256, RS384, PS256
    #[error("unsupported client assertion algorithm {0:?}")]
    UnsupportedAlgorithm(String),

    /// Client assertion could not be built or signed
    #[error("failed to create client assertion: {0}")]
    ClientAssertion(String),
}

/// Result type for OAuth operations
pub type AuthResult<T> = Result<T, AuthError>;

impl AuthError {
    /// Build a status error, keeping the body short enough to print
    pub fn status(status: reqwest::StatusCode, body: &str) -> Self {
        Self::Status {
            status: status.as_u16(),
            body: truncate_for_display(body.trim(), MAX_ERROR_BODY_BYTES),
        }
    }

    /// Build a protocol error; falls back to the error code when the server sent no description
    pub fn protocol(error: impl Into<String>, description: Option<String>) -> Self {
        let error = error.into();
        let description = description
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| error.clone());
        Self::Protocol { error, description }
    }

    /// OAuth error code, if this is a protocol error
    #[must_use]
    pub fn oauth_error_code(&self) -> Option<&str> {
        match self {
            Self::Protocol { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Endpoint and client configuration for the platform's login service
///
/// Passed explicitly to each authenticator; tests point the URLs at a mock server.
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    /// Client ID of the CLI application
    pub client_id: String,
    /// Device authorization endpoint
    pub device_code_url: String,
    /// Token endpoint used for device polling and refresh grants
    pub token_url: String,
    /// Expected `iss` claim of access tokens
    pub issuer: String,
    /// Audience requested when the user did not pick a tenant domain
    pub default_audience: String,
    /// Domain suffix every tenant domain ends with
    pub platform_domain: String,
    /// Extra delay added on top of the server's polling interval
    pub poll_grace: Duration,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            client_id: DEFAULT_CLIENT_ID.to_string(),
            device_code_url: DEFAULT_DEVICE_CODE_URL.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            issuer: DEFAULT_ISSUER.to_string(),
            default_audience: format!("https://*.{DEFAULT_PLATFORM_DOMAIN}{AUDIENCE_PATH}"),
            platform_domain: DEFAULT_PLATFORM_DOMAIN.to_string(),
            poll_grace: DEFAULT_POLL_GRACE,
        }
    }
}

impl OAuthConfig {
    /// Point both login endpoints at `base_url` (`{base_url}/oauth/...`)
    #[must_use]
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        self.device_code_url = format!("{base}/oauth/device/code");
        self.token_url = format!("{base}/oauth/token");
        self.issuer = format!("{base}/");
        self
    }

    /// Resolve the audience to request a device code for.
    ///
    /// An empty input means "any tenant". Otherwise the input may carry a
    /// scheme and a trailing `/api/v2`, and must end with the platform domain.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidDomain`] if the host is not on this platform.
    pub fn ensure_audience_url(&self, input: &str) -> AuthResult<String> {
        let input = input.trim();
        if input.is_empty() {
            return Ok(self.default_audience.clone());
        }

        let trimmed = input
            .trim_start_matches("http://")
            .trim_start_matches("https://")
            .trim_end_matches('/')
            .trim_end_matches("/api/v2");

        let host = trimmed.split('/').next().unwrap_or_default();
        if !self.is_platform_host(host) {
            return Err(AuthError::InvalidDomain {
                domain: input.to_string(),
                platform: self.platform_domain.clone(),
            });
        }

        Ok(audience_for_domain(host))
    }

    /// Whether `host` is the platform domain or one of its subdomains
    fn is_platform_host(&self, host: &str) -> bool {
        host == self.platform_domain
            || host
                .strip_suffix(&self.platform_domain)
                .is_some_and(|prefix| prefix.ends_with('.') && prefix.len() > 1)
    }
}

/// Management API audience of a tenant domain
#[must_use]
pub fn audience_for_domain(domain: &str) -> String {
    format!("https://{domain}{AUDIENCE_PATH}")
}

/// Token obtained from either grant, consumed right away by the session layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenResult {
    /// Bearer token for management API calls
    pub access_token: String,
    /// Refresh token (device flow only)
    pub refresh_token: Option<String>,
    /// OpenID Connect ID token (device flow only)
    pub id_token: Option<String>,
    /// Token type (usually "Bearer")
    pub token_type: String,
    /// Lifetime in seconds as reported by the server
    pub expires_in: u64,
    /// Absolute expiry computed when the response was received
    pub expires_at: DateTime<Utc>,
}

impl TokenResult {
    /// Get the Authorization header value
    #[must_use]
    pub fn authorization_header(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

impl From<TokenResponse> for TokenResult {
    fn from(response: TokenResponse) -> Self {
        let expires_in = response.expires_in.unwrap_or_else(|| {
            tracing::warn!("Token response has no expires_in, the token will be renewed on next use");
            0
        });
        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token.filter(|t| !t.is_empty()),
            id_token: response.id_token.filter(|t| !t.is_empty()),
            token_type: response
                .token_type
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "Bearer".to_string()),
            expires_in,
            expires_at: expires_at_from_now(expires_in),
        }
    }
}

/// Absolute expiry for a lifetime in seconds
#[must_use]
pub fn expires_at_from_now(expires_in: u64) -> DateTime<Utc> {
    let lifetime = i64::try_from(expires_in)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .unwrap_or_else(TimeDelta::zero);
    Utc::now()
        .checked_add_signed(lifetime)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Success response from the token endpoint
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub(crate) access_token: String,
    #[serde(default)]
    pub(crate) refresh_token: Option<String>,
    #[serde(default)]
    pub(crate) id_token: Option<String>,
    #[serde(default)]
    pub(crate) token_type: Option<String>,
    #[serde(default)]
    pub(crate) expires_in: Option<u64>,
}

/// Error response from the token endpoint
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorResponse {
    pub(crate) error: String,
    #[serde(default)]
    pub(crate) error_description: Option<String>,
}

/// Either side of a token endpoint reply
#[derive(Debug)]
pub(crate) enum TokenReply {
    Token(TokenResponse),
    Error(ErrorResponse),
}

/// Read a token endpoint response.
///
/// OAuth error bodies are recognised regardless of status, because servers
/// answer a pending device authorization with a 4xx.
pub(crate) async fn read_token_reply(response: reqwest::Response) -> AuthResult<TokenReply> {
    let status = response.status();
    let body = response.text().await?;

    if let Ok(error) = serde_json::from_str::<ErrorResponse>(&body) {
        return Ok(TokenReply::Error(error));
    }

    if !status.is_success() {
        return Err(AuthError::status(status, &body));
    }

    serde_json::from_str::<TokenResponse>(&body)
        .map(TokenReply::Token)
        .map_err(|e| AuthError::InvalidResponse(format!("failed to decode token response: {e}")))
}
