//! Shared helpers for integration tests

#![allow(dead_code)]

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{TimeDelta, Utc};
use std::time::Duration;
use tenant_auth::OAuthConfig;
use wiremock::MockServer;

/// Route library logs to the test harness; `RUST_LOG=tenant_auth=debug` to see them
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Unsigned JWT whose audience names `domain`'s management API
pub fn access_token_for(domain: &str, issuer: &str) -> String {
    let claims = serde_json::json!({
        "iss": issuer,
        "exp": (Utc::now() + TimeDelta::hours(1)).timestamp(),
        "aud": [
            format!("https://{domain}/api/v2/"),
            format!("{issuer}userinfo"),
        ],
    });
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.signature")
}

/// Login endpoints pointed at the mock server, without the poll grace delay
pub fn oauth_config(server: &MockServer) -> OAuthConfig {
    OAuthConfig {
        poll_grace: Duration::ZERO,
        ..OAuthConfig::default().with_base_url(&server.uri())
    }
}

/// Issuer the mock server stands in for
pub fn issuer(server: &MockServer) -> String {
    format!("{}/", server.uri())
}

/// Token endpoint success body
pub fn token_body(access_token: &str, refresh_token: Option<&str>) -> serde_json::Value {
    let mut body = serde_json::json!({
        "access_token": access_token,
        "id_token": "id-token",
        "token_type": "Bearer",
        "expires_in": 86400,
    });
    if let Some(refresh_token) = refresh_token {
        body["refresh_token"] = refresh_token.into();
    }
    body
}
