//! Unverified access-token inspection
//!
//! Claims are read without checking the signature. That is only acceptable
//! for deriving display data (tenant name and domain) and for routing
//! decisions such as "should we prompt for login"; nothing here may be used
//! to grant access.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::Deserialize;

use super::oauth::{AUDIENCE_PATH, AuthError, AuthResult};

/// `aud` may be a single string or an array of strings
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Default for Audience {
    fn default() -> Self {
        Self::Many(Vec::new())
    }
}

/// The subset of access-token claims this crate looks at
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Claims {
    #[serde(default)]
    aud: Audience,
    /// Issuer
    #[serde(default)]
    pub iss: Option<String>,
    /// Expiry as a unix timestamp
    #[serde(default)]
    pub exp: Option<i64>,
}

impl Claims {
    /// All audiences, whichever form the token used
    #[must_use]
    pub fn audiences(&self) -> &[String] {
        match &self.aud {
            Audience::One(aud) => std::slice::from_ref(aud),
            Audience::Many(auds) => auds,
        }
    }
}

/// Tenant name and domain derived from an access token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantIdentity {
    /// Short name: first DNS label of the domain
    pub name: String,
    /// Tenant domain (host of the management API audience)
    pub domain: String,
}

/// Decode the payload segment of a JWT without verifying it.
///
/// # Errors
///
/// Returns [`AuthError::MalformedToken`] if the token does not have three
/// segments or its payload is not base64url-encoded JSON.
pub fn decode_claims(token: &str) -> AuthResult<Claims> {
    let mut segments = token.split('.');
    let payload = match (segments.next(), segments.next(), segments.next(), segments.next()) {
        (Some(_), Some(payload), Some(_), None) => payload,
        _ => {
            return Err(AuthError::MalformedToken(
                "expected three dot-separated segments".to_string(),
            ));
        }
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| AuthError::MalformedToken(format!("payload is not base64url: {e}")))?;

    serde_json::from_slice(&bytes)
        .map_err(|e| AuthError::MalformedToken(format!("payload is not a JSON claim set: {e}")))
}

/// Derive tenant name and domain from the management API audience of a token.
///
/// The audience is the one URL whose path is `/api/v2/`; its host is the
/// domain and the host's first label is the tenant name.
///
/// # Errors
///
/// Returns [`AuthError::AudienceNotFound`] when no audience matches, or
/// [`AuthError::MalformedToken`] when the token cannot be decoded.
pub fn parse_tenant(access_token: &str) -> AuthResult<TenantIdentity> {
    let claims = decode_claims(access_token)?;

    for aud in claims.audiences() {
        let Ok(url) = url::Url::parse(aud) else {
            continue;
        };
        if url.path() != AUDIENCE_PATH {
            continue;
        }
        if let Some(host) = url.host_str() {
            let name = host.split('.').next().unwrap_or(host);
            return Ok(TenantIdentity {
                name: name.to_string(),
                domain: host.to_string(),
            });
        }
    }

    Err(AuthError::AudienceNotFound(AUDIENCE_PATH.to_string()))
}
