//! # tenant-auth
//!
//! Authentication and session management for a multi-tenant identity
//! platform CLI: device-flow and client-credentials logins, token renewal,
//! a secret store for tokens, and the config file that records which
//! tenants are logged in.
//!
//! ## Quick Start
//!
//! ```no_run
//! use tenant_auth::{ConfigStore, SecretStore, SessionManager};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut session = SessionManager::builder()
//!         .config(ConfigStore::load_or_empty("config.json")?)
//!         .secrets(SecretStore::keyring())
//!         .build();
//!
//!     let cancel = CancellationToken::new();
//!     let tenant = session.login_as_user(&[], None, &cancel).await?;
//!     println!("Logged in to {}", tenant.domain);
//!
//!     let token = session.access_token(Some(&tenant.domain), &cancel).await?;
//!     println!("Token has {} bytes", token.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Machine Logins
//!
//! ```no_run
//! # use tenant_auth::{ConfigStore, SessionManager};
//! # use tenant_auth::auth::ClientCredentials;
//! # use tokio_util::sync::CancellationToken;
//! # async fn example() -> tenant_auth::Result<()> {
//! # let mut session = SessionManager::builder()
//! #     .config(ConfigStore::load_or_empty("config.json")?)
//! #     .build();
//! let credentials = ClientCredentials::builder()
//!     .client_id("m2m-client-id")
//!     .client_secret("m2m-client-secret")
//!     .domain("acme.us.example.com")
//!     .build();
//!
//! session
//!     .login_as_machine(&credentials, &CancellationToken::new())
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! Applications registered for private key JWT authentication sign a client
//! assertion instead of sending a secret; see
//! [`SessionManager::login_as_machine_with_private_key`].
//!
//! ## Architecture
//!
//! - [`auth`]: OAuth grants (device authorization, client credentials with a
//!   secret or a signed assertion, refresh) and unverified JWT inspection
//! - [`secret`]: secret storage with keyring, encrypted-file and in-memory backends
//! - [`config`]: the tenant config file and per-tenant token rules
//! - [`session`]: login, logout and token renewal on top of the above
//! - [`error`]: error types and handling
//!
//! ## Logging
//!
//! This crate uses [`tracing`](https://crates.io/crates/tracing) for structured logging.
//! Tracing events are always emitted but are zero-cost when no subscriber is attached.
//! Tokens and client secrets are never logged. To see logs, attach a
//! tracing subscriber in your application:
//!
//! ```rust,ignore
//! tracing_subscriber::fmt::init();
//! ```
//!
//! ## Error Handling
//!
//! Session operations return [`Result<T, TenantAuthError>`](Result). Use
//! [`TenantAuthError::is_not_logged_in`] to turn "log in first" conditions
//! into a prompt:
//!
//! ```no_run
//! # use tenant_auth::SessionManager;
//! # use tokio_util::sync::CancellationToken;
//! # async fn example(session: &mut SessionManager) {
//! match session.access_token(None, &CancellationToken::new()).await {
//!     Ok(token) => { /* ... */ }
//!     Err(e) if e.is_not_logged_in() => eprintln!("{e}. Run `login` first."),
//!     Err(e) => eprintln!("Error: {e}"),
//! }
//! # }
//! ```
//!
//! ## Security
//!
//! - **Secrets out of the config file** - tokens and client secrets go to the
//!   secret store; the config file only holds a token when the store fails
//! - **Owner-only files** - config and encrypted secret files are written 0600
//!   in 0700 directories on Unix
//! - **Atomic writes** - files are replaced via temp file and rename
//! - **Unverified claims** - JWT payloads are only read for display and
//!   routing, never to grant access

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod auth;
pub mod config;
pub mod error;
pub mod secret;
pub mod session;
pub mod utils;

// Re-export commonly used types
pub use auth::{
    AuthError, ClientCredentials, ClientCredentialsAuthenticator, DeviceAuthenticator,
    OAuthConfig, PrivateKeyJwtCredentials, SigningAlgorithm, TokenResult,
};
pub use config::{AuthMethod, Config, ConfigError, ConfigStore, Tenant};
pub use error::{Result, TenantAuthError};
pub use secret::{
    EncryptedFileBackend, KeyringBackend, MemoryBackend, SecretBackend, SecretError, SecretStore,
};
pub use session::{SessionManager, TokenRenewer};

/// Version of the crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
