//! Integration tests for the device authorization flow against a mock login server

mod common;

use common::{access_token_for, issuer, oauth_config, token_body};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tenant_auth::auth::{AuthError, DeviceAuthenticator, DeviceCodeState, scopes};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const DEVICE_GRANT: &str = "grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Adevice_code";

fn authenticator(server: &MockServer) -> DeviceAuthenticator {
    DeviceAuthenticator::builder()
        .config(oauth_config(server))
        .auto_open_browser(false)
        .build()
}

fn device_state(interval: u64, expires_in: u64) -> DeviceCodeState {
    DeviceCodeState {
        device_code: "device-code-123".to_string(),
        user_code: "ABCD-EFGH".to_string(),
        verification_uri: "https://login.example.com/activate?user_code=ABCD-EFGH".to_string(),
        expires_in,
        interval,
    }
}

#[tokio::test]
async fn test_request_device_code() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/device/code"))
        .and(body_string_contains("client_id="))
        .and(body_string_contains("scope=openid+offline_access"))
        .and(body_string_contains(
            "audience=https%3A%2F%2Facme.us.example.com%2Fapi%2Fv2%2F",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "device_code": "device-code-123",
            "user_code": "ABCD-EFGH",
            "verification_uri": "https://login.example.com/activate",
            "verification_uri_complete": "https://login.example.com/activate?user_code=ABCD-EFGH",
            "expires_in": 900,
            "interval": 5
        })))
        .expect(1)
        .mount(&server)
        .await;

    let state = authenticator(&server)
        .request_device_code(
            &scopes::required_scopes(),
            "https://acme.us.example.com/api/v2/",
        )
        .await
        .unwrap();

    assert_eq!(state.device_code, "device-code-123");
    assert_eq!(state.user_code, "ABCD-EFGH");
    assert_eq!(
        state.verification_uri,
        "https://login.example.com/activate?user_code=ABCD-EFGH"
    );
    assert_eq!(state.expires_in, 900);
    assert_eq!(state.interval, 5);
}

#[tokio::test]
async fn test_request_device_code_non_success_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/device/code"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream unavailable"))
        .mount(&server)
        .await;

    let err = authenticator(&server)
        .request_device_code(&scopes::required_scopes(), "https://*.example.com/api/v2/")
        .await
        .unwrap_err();

    match err {
        AuthError::Status { status, body } => {
            assert_eq!(status, 503);
            assert_eq!(body, "upstream unavailable");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_request_device_code_malformed_json() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/device/code"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let err = authenticator(&server)
        .request_device_code(&scopes::required_scopes(), "https://*.example.com/api/v2/")
        .await
        .unwrap_err();

    assert!(matches!(err, AuthError::InvalidResponse(_)));
}

#[tokio::test]
async fn test_poll_retries_once_while_pending() {
    let server = MockServer::start().await;
    let request_count = Arc::new(AtomicUsize::new(0));
    let counter = request_count.clone();
    let token = access_token_for("acme.us.example.com", &issuer(&server));
    let body = token_body(&token, Some("refresh-123"));

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains(DEVICE_GRANT))
        .and(body_string_contains("device_code=device-code-123"))
        .respond_with(move |_req: &wiremock::Request| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                ResponseTemplate::new(403).set_body_json(serde_json::json!({
                    "error": "authorization_pending",
                    "error_description": "User has yet to authorize device code."
                }))
            } else {
                ResponseTemplate::new(200).set_body_json(body.clone())
            }
        })
        .expect(2)
        .mount(&server)
        .await;

    let login = authenticator(&server)
        .poll_for_token(&device_state(0, 900), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(request_count.load(Ordering::SeqCst), 2);
    assert_eq!(login.tenant.name, "acme");
    assert_eq!(login.tenant.domain, "acme.us.example.com");
    assert_eq!(login.token.access_token, token);
    assert_eq!(login.token.refresh_token.as_deref(), Some("refresh-123"));
    assert_eq!(login.token.id_token.as_deref(), Some("id-token"));
}

#[tokio::test]
async fn test_poll_slows_down_when_asked() {
    let server = MockServer::start().await;
    let request_count = Arc::new(AtomicUsize::new(0));
    let counter = request_count.clone();
    let body = token_body(
        &access_token_for("acme.us.example.com", &issuer(&server)),
        None,
    );

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(move |_req: &wiremock::Request| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                ResponseTemplate::new(429)
                    .set_body_json(serde_json::json!({ "error": "slow_down" }))
            } else {
                ResponseTemplate::new(200).set_body_json(body.clone())
            }
        })
        .expect(2)
        .mount(&server)
        .await;

    let start = Instant::now();
    authenticator(&server)
        .poll_for_token(&device_state(1, 900), &CancellationToken::new())
        .await
        .unwrap();

    // 1s before the first poll, then 1.5s after slow_down
    assert!(start.elapsed() >= Duration::from_millis(2400));
}

#[tokio::test]
async fn test_poll_surfaces_error_description() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
            "error": "access_denied",
            "error_description": "User did not authorize the request"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let err = authenticator(&server)
        .poll_for_token(&device_state(0, 900), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.oauth_error_code(), Some("access_denied"));
    assert_eq!(err.to_string(), "User did not authorize the request");
}

#[tokio::test]
async fn test_poll_cancelled_mid_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(
            ResponseTemplate::new(403)
                .set_body_json(serde_json::json!({ "error": "authorization_pending" }))
                .set_delay(Duration::from_secs(10)),
        )
        .mount(&server)
        .await;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let start = Instant::now();
    let err = authenticator(&server)
        .poll_for_token(&device_state(0, 900), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, AuthError::Cancelled));
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_poll_cancelled_between_ticks() {
    let server = MockServer::start().await;

    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = authenticator(&server)
        .poll_for_token(&device_state(60, 900), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, AuthError::Cancelled));
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn test_poll_stops_when_device_code_expires() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(
            ResponseTemplate::new(403)
                .set_body_json(serde_json::json!({ "error": "authorization_pending" })),
        )
        .mount(&server)
        .await;

    let mut config = oauth_config(&server);
    config.poll_grace = Duration::from_millis(200);
    let authenticator = DeviceAuthenticator::builder()
        .config(config)
        .auto_open_browser(false)
        .build();

    let err = authenticator
        .poll_for_token(&device_state(0, 1), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, AuthError::DeviceCodeExpired));
}

#[tokio::test]
async fn test_poll_rejects_token_without_management_audience() {
    let server = MockServer::start().await;
    let claims = serde_json::json!({ "aud": ["https://login.example.com/userinfo"] });
    let token = format!(
        "e30.{}.sig",
        base64::Engine::encode(
            &base64::engine::general_purpose::URL_SAFE_NO_PAD,
            claims.to_string()
        )
    );

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body(&token, None)))
        .mount(&server)
        .await;

    let err = authenticator(&server)
        .poll_for_token(&device_state(0, 900), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "audience not found for /api/v2/");
}

#[tokio::test]
async fn test_refresh_grant() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=refresh-123"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(token_body("new-access", Some("rotated"))),
        )
        .expect(1)
        .mount(&server)
        .await;

    let token = authenticator(&server)
        .refresh("refresh-123", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(token.access_token, "new-access");
    assert_eq!(token.refresh_token.as_deref(), Some("rotated"));
    assert_eq!(token.expires_in, 86400);
}

#[tokio::test]
async fn test_refresh_grant_invalid_refresh_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
            "error": "invalid_grant",
            "error_description": "Unknown or invalid refresh token."
        })))
        .mount(&server)
        .await;

    let err = authenticator(&server)
        .refresh("revoked", &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.oauth_error_code(), Some("invalid_grant"));
    assert_eq!(err.to_string(), "Unknown or invalid refresh token.");
}
