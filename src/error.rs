//! Error types for tenant authentication

use thiserror::Error;

use crate::auth::AuthError;
use crate::config::ConfigError;
use crate::secret::SecretError;

/// Main error type for tenant authentication and session management
#[derive(Error, Debug)]
pub enum TenantAuthError {
    /// OAuth flow or token endpoint failure
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Secret store failure
    #[error(transparent)]
    Secret(#[from] SecretError),

    /// Config file failure
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Access token is absent or about to expire
    #[error("access token is missing or expired; log in again")]
    InvalidToken,

    /// Stored access token is not a JWT
    #[error("stored access token is malformed; log in again")]
    MalformedToken,

    /// Device login was granted fewer scopes than required
    #[error(
        "token is missing required scopes: {}; log in again to grant them",
        .missing.join(", ")
    )]
    MissingRequiredScopes {
        /// Scopes the tenant lacks
        missing: Vec<String>,
    },
}

/// Result type alias for tenant authentication operations
pub type Result<T> = std::result::Result<T, TenantAuthError>;

impl TenantAuthError {
    /// Whether the remedy is to log in (again).
    ///
    /// Covers a missing config, an empty tenant list and unusable tokens.
    #[must_use]
    pub fn is_not_logged_in(&self) -> bool {
        matches!(
            self,
            Self::Config(ConfigError::FileMissing | ConfigError::NoAuthenticatedTenants)
                | Self::InvalidToken
                | Self::MalformedToken
                | Self::MissingRequiredScopes { .. }
        )
    }

    /// Whether the operation was abandoned because the caller cancelled it
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Auth(AuthError::Cancelled))
    }
}
