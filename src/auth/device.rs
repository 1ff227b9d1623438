//! OAuth 2.0 Device Authorization Grant (RFC 8628)

use serde::Deserialize;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::jwt::{TenantIdentity, parse_tenant};
use super::oauth::{
    AuthError, AuthResult, OAuthConfig, TokenReply, TokenResult, read_token_reply,
};

const DEVICE_CODE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";
const AUTHORIZATION_PENDING: &str = "authorization_pending";
const SLOW_DOWN: &str = "slow_down";
const SLOW_DOWN_FACTOR: f64 = 1.5;

/// Device code issued for one login attempt
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceCodeState {
    /// Code the CLI polls with
    pub device_code: String,
    /// Code the user confirms in the browser
    pub user_code: String,
    /// Verification URL with the user code already filled in
    #[serde(rename = "verification_uri_complete")]
    pub verification_uri: String,
    /// Seconds until the device code expires
    #[serde(default)]
    pub expires_in: u64,
    /// Minimum seconds between polls
    #[serde(default)]
    pub interval: u64,
}

impl DeviceCodeState {
    /// Delay between two polls: the server interval plus a grace period
    #[must_use]
    pub fn interval_duration(&self, grace: Duration) -> Duration {
        Duration::from_secs(self.interval) + grace
    }
}

/// Successful device login: the token plus the tenant it was issued for
#[derive(Debug, Clone)]
pub struct DeviceAuthorization {
    /// Tokens returned by the token endpoint
    pub token: TokenResult,
    /// Tenant derived from the access token's audience
    pub tenant: TenantIdentity,
}

/// Interval to use after the server asked us to slow down
#[must_use]
pub fn slow_down(interval: Duration) -> Duration {
    let slowed = interval.mul_f64(SLOW_DOWN_FACTOR);
    if slowed > interval {
        slowed
    } else {
        interval + Duration::from_secs(1)
    }
}

/// Builder for [`DeviceAuthenticator`]
#[derive(Debug, Default)]
pub struct DeviceAuthenticatorBuilder {
    config: Option<OAuthConfig>,
    http_client: Option<reqwest::Client>,
    auto_open_browser: bool,
}

impl DeviceAuthenticatorBuilder {
    /// Create a new builder
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: None,
            http_client: None,
            auto_open_browser: true,
        }
    }

    /// Set custom OAuth configuration
    #[must_use]
    pub fn config(mut self, config: OAuthConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Use a preconfigured HTTP client
    #[must_use]
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Set whether to automatically open browser (default: true)
    #[must_use]
    pub fn auto_open_browser(mut self, auto_open: bool) -> Self {
        self.auto_open_browser = auto_open;
        self
    }

    /// Build the authenticator
    #[must_use]
    pub fn build(self) -> DeviceAuthenticator {
        DeviceAuthenticator {
            config: self.config.unwrap_or_default(),
            http_client: self.http_client.unwrap_or_default(),
            auto_open_browser: self.auto_open_browser,
        }
    }
}

/// Runs the device authorization flow and refresh-token grants
#[derive(Debug, Clone)]
pub struct DeviceAuthenticator {
    config: OAuthConfig,
    http_client: reqwest::Client,
    auto_open_browser: bool,
}

impl Default for DeviceAuthenticator {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceAuthenticator {
    /// Create an authenticator with default configuration
    #[must_use]
    pub fn new() -> Self {
        DeviceAuthenticatorBuilder::new().build()
    }

    /// Create a builder for custom configuration
    #[must_use]
    pub fn builder() -> DeviceAuthenticatorBuilder {
        DeviceAuthenticatorBuilder::new()
    }

    /// Get the OAuth configuration
    #[must_use]
    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    /// Request a device code for `scopes` on `audience`.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the request fails, a status error
    /// (with the raw body) on a non-2xx answer, or a decode error if the
    /// body is not the expected JSON.
    pub async fn request_device_code(
        &self,
        scopes: &[String],
        audience: &str,
    ) -> AuthResult<DeviceCodeState> {
        let scope = scopes.join(" ");
        let params = [
            ("client_id", self.config.client_id.as_str()),
            ("scope", scope.as_str()),
            ("audience", audience),
        ];

        let response = self
            .http_client
            .post(&self.config.device_code_url)
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(AuthError::status(status, &body));
        }

        let state: DeviceCodeState = serde_json::from_str(&body).map_err(|e| {
            AuthError::InvalidResponse(format!("failed to decode the device code response: {e}"))
        })?;

        tracing::debug!(
            expires_in = state.expires_in,
            interval = state.interval,
            "Device code issued"
        );

        Ok(state)
    }

    /// Show the user code and open the verification page
    pub fn present(&self, state: &DeviceCodeState) {
        println!();
        println!(
            "Verify {} code in opened browser window to complete authentication.",
            state.user_code
        );
        println!();

        if self.auto_open_browser {
            if let Err(e) = Self::open_browser(&state.verification_uri) {
                tracing::debug!("Could not open browser: {e}");
                println!(
                    "Couldn't open the URL, please do it manually: {}",
                    state.verification_uri
                );
            }
        } else {
            println!("Open the following URL in a browser: {}", state.verification_uri);
        }
    }

    /// Poll the token endpoint until the user approves, denies, the code
    /// expires, or `cancel` fires.
    ///
    /// `authorization_pending` keeps polling; `slow_down` keeps polling at a
    /// longer interval; every other OAuth error ends the login.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Cancelled`] on cancellation (including during an
    /// in-flight request), [`AuthError::DeviceCodeExpired`] once the code's
    /// lifetime has passed, the server's error description for terminal OAuth
    /// errors, and transport/decode errors as they occur.
    pub async fn poll_for_token(
        &self,
        state: &DeviceCodeState,
        cancel: &CancellationToken,
    ) -> AuthResult<DeviceAuthorization> {
        let mut interval = state.interval_duration(self.config.poll_grace);
        let deadline =
            (state.expires_in > 0).then(|| Instant::now() + Duration::from_secs(state.expires_in));
        let mut attempt: u32 = 0;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Err(AuthError::Cancelled),
                _ = tokio::time::sleep(interval) => {}
            }

            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Err(AuthError::DeviceCodeExpired);
            }

            attempt += 1;
            let reply = tokio::select! {
                _ = cancel.cancelled() => return Err(AuthError::Cancelled),
                reply = self.request_device_token(&state.device_code) => reply?,
            };

            match reply {
                TokenReply::Error(err) if err.error == AUTHORIZATION_PENDING => {
                    tracing::debug!(attempt, "Authorization pending");
                }
                TokenReply::Error(err) if err.error == SLOW_DOWN => {
                    interval = slow_down(interval);
                    tracing::debug!(attempt, ?interval, "Server asked to slow down polling");
                }
                TokenReply::Error(err) => {
                    return Err(AuthError::protocol(err.error, err.error_description));
                }
                TokenReply::Token(response) => {
                    let tenant = parse_tenant(&response.access_token)?;
                    tracing::info!(domain = %tenant.domain, attempt, "Device login completed");
                    return Ok(DeviceAuthorization {
                        token: response.into(),
                        tenant,
                    });
                }
            }
        }
    }

    /// Exchange a refresh token for a new access token.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Cancelled`] if `cancel` fires mid-request, the
    /// server's description for OAuth errors, and transport/decode errors.
    pub async fn refresh(
        &self,
        refresh_token: &str,
        cancel: &CancellationToken,
    ) -> AuthResult<TokenResult> {
        let params = [
            ("grant_type", "refresh_token"),
            ("client_id", self.config.client_id.as_str()),
            ("refresh_token", refresh_token),
        ];

        let request = async {
            let response = self
                .http_client
                .post(&self.config.token_url)
                .form(&params)
                .send()
                .await?;
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

    async fn request_device_token(&self, device_code: &str) -> AuthResult<TokenReply> {
        let params = [
            ("client_id", self.config.client_id.as_str()),
            ("grant_type", DEVICE_CODE_GRANT_TYPE),
            ("device_code", device_code),
        ];

        let response = self
            .http_client
            .post(&self.config.token_url)
            .form(&params)
            .send()
            .await?;

        read_token_reply(response).await
    }

    /// Open URL in default browser
    fn open_browser(url: &str) -> AuthResult<()> {
        #[cfg(target_os = "macos")]
        {
            std::process::Command::new("open")
                .arg(url)
                .spawn()
                .map_err(|e| AuthError::BrowserOpen(e.to_string()))?;
        }

        #[cfg(target_os = "linux")]
        {
            std::process::Command::new("xdg-open")
                .arg(url)
                .spawn()
                .map_err(|e| AuthError::BrowserOpen(e.to_string()))?;
        }

        #[cfg(target_os = "windows")]
        {
            std::process::Command::new("cmd")
                .args(["/C", "start", "", url])
                .spawn()
                .map_err(|e| AuthError::BrowserOpen(e.to_string()))?;
        }

        Ok(())
    }
}
