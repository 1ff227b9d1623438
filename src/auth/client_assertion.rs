//! Signed client assertions for private key JWT client authentication (RFC 7523)
//!
//! Instead of a shared secret, a machine proves its identity with a short-lived
//! JWT signed by its private key; the platform holds the matching public key.

use chrono::{TimeDelta, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::oauth::{AuthError, AuthResult};

/// `client_assertion_type` sent with a signed assertion
pub const CLIENT_ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

const ASSERTION_LIFETIME: TimeDelta = TimeDelta::minutes(2);

/// Algorithms accepted for signing client assertions (all RSA)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SigningAlgorithm {
    /// RSASSA-PKCS1-v1_5 with SHA-256
    #[default]
    #[serde(rename = "RS256")]
    Rs256,
    /// RSASSA-PKCS1-v1_5 with SHA-384
    #[serde(rename = "RS384")]
    Rs384,
    /// RSASSA-PSS with SHA-256
    #[serde(rename = "PS256")]
    Ps256,
}

impl SigningAlgorithm {
    /// JOSE name of the algorithm
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rs256 => "RS256",
            Self::Rs384 => "RS384",
            Self::Ps256 => "PS256",
        }
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SigningAlgorithm {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RS256" => Ok(Self::Rs256),
            "RS384" => Ok(Self::Rs384),
            "PS256" => Ok(Self::Ps256),
            other => Err(AuthError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

impl From<SigningAlgorithm> for Algorithm {
    fn from(alg: SigningAlgorithm) -> Self {
        match alg {
            SigningAlgorithm::Rs256 => Algorithm::RS256,
            SigningAlgorithm::Rs384 => Algorithm::RS384,
            SigningAlgorithm::Ps256 => Algorithm::PS256,
        }
    }
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    sub: &'a str,
    aud: &'a str,
    iat: i64,
    nbf: i64,
    exp: i64,
    jti: String,
}

/// Audience of an assertion for a tenant: its base URL
#[must_use]
pub fn assertion_audience(domain: &str) -> String {
    format!("https://{domain}/")
}

/// Sign a two-minute client assertion for `client_id`.
///
/// `private_key_pem` must be an RSA private key (PKCS#1 or PKCS#8 PEM).
///
/// # Errors
///
/// Returns [`AuthError::ClientAssertion`] if the key is not an RSA PEM key or
/// signing fails.
pub fn create_client_assertion(
    alg: SigningAlgorithm,
    private_key_pem: &str,
    client_id: &str,
    audience: &str,
) -> AuthResult<String> {
    let key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes()).map_err(|e| {
        AuthError::ClientAssertion(format!("{alg} requires an RSA private key in PEM format: {e}"))
    })?;

    let now = Utc::now();
    let claims = AssertionClaims {
        iss: client_id,
        sub: client_id,
        aud: audience,
        iat: now.timestamp(),
        nbf: now.timestamp(),
        exp: (now + ASSERTION_LIFETIME).timestamp(),
        jti: uuid::Uuid::new_v4().to_string(),
    };

    jsonwebtoken::encode(&Header::new(alg.into()), &claims, &key)
        .map_err(|e| AuthError::ClientAssertion(format!("failed to sign JWT: {e}")))
}
