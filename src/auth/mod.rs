//! OAuth authentication against the identity platform
//!
//! # Overview
//!
//! Two grants are supported:
//!
//! 1. **Device Authorization** for people: request a device code, show the
//!    user code, open the verification page, then poll the token endpoint
//!    until the user approves. Yields an access token and a refresh token.
//! 2. **Client Credentials** for machines (CI, servers): exchange a client
//!    ID and secret for an access token scoped to one tenant. Instead of a
//!    secret, the client can sign a short-lived assertion with its RSA
//!    private key (private key JWT).
//!
//! # Example
//!
//! ```no_run
//! use tenant_auth::auth::{DeviceAuthenticator, scopes};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let authenticator = DeviceAuthenticator::new();
//!     let audience = authenticator.config().ensure_audience_url("")?;
//!
//!     let state = authenticator
//!         .request_device_code(&scopes::required_scopes(), &audience)
//!         .await?;
//!     authenticator.present(&state);
//!
//!     let login = authenticator
//!         .poll_for_token(&state, &CancellationToken::new())
//!         .await?;
//!     println!("Logged in to {}", login.tenant.domain);
//!     Ok(())
//! }
//! ```
//!
//! # Cancellation
//!
//! Every network call takes a [`CancellationToken`](tokio_util::sync::CancellationToken)
//! and is abandoned as soon as it fires, including in the middle of a request.

mod client_assertion;
mod client_credentials;
mod device;
pub mod jwt;
mod oauth;
pub mod scopes;

pub use client_assertion::{
    CLIENT_ASSERTION_TYPE, SigningAlgorithm, assertion_audience, create_client_assertion,
};
pub use client_credentials::{
    ClientCredentials, ClientCredentialsAuthenticator, PrivateKeyJwtCredentials,
};
pub use device::{
    DeviceAuthenticator, DeviceAuthenticatorBuilder, DeviceAuthorization, DeviceCodeState,
    slow_down,
};
pub use jwt::{Claims, TenantIdentity, decode_claims, parse_tenant};
pub use oauth::{
    AUDIENCE_PATH, AuthError, AuthResult, OAuthConfig, TokenResult, audience_for_domain,
    expires_at_from_now,
};
