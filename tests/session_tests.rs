//! End-to-end login, renewal and logout flows against a mock login server

mod common;

use chrono::{TimeDelta, Utc};
use common::{access_token_for, init_tracing, issuer, oauth_config, token_body};
use tenant_auth::auth::ClientCredentials;
use tenant_auth::{
    AuthMethod, ClientCredentialsAuthenticator, ConfigStore, DeviceAuthenticator, MemoryBackend,
    PrivateKeyJwtCredentials, SecretBackend, SecretError, SecretStore, SessionManager,
    SigningAlgorithm, Tenant, TenantAuthError,
};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const DOMAIN: &str = "acme.us.example.com";

fn session(server: &MockServer, dir: &tempfile::TempDir, secrets: SecretStore) -> SessionManager {
    init_tracing();
    SessionManager::builder()
        .config(ConfigStore::load_or_empty(dir.path().join("config.json")).unwrap())
        .secrets(secrets)
        .device(
            DeviceAuthenticator::builder()
                .config(oauth_config(server))
                .auto_open_browser(false)
                .build(),
        )
        .client_credentials(ClientCredentialsAuthenticator::new().with_endpoint_override(server.uri()))
        .build()
}

async fn mount_device_login(server: &MockServer, access_token: &str) {
    Mock::given(method("POST"))
        .and(path("/oauth/device/code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "device_code": "device-code-123",
            "user_code": "ABCD-EFGH",
            "verification_uri_complete": "https://login.example.com/activate?user_code=ABCD-EFGH",
            "expires_in": 900,
            "interval": 0
        })))
        .expect(1)
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("device_code=device-code-123"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(token_body(access_token, Some("refresh-123"))),
        )
        .expect(1)
        .mount(server)
        .await;
}

fn expired_device_tenant() -> Tenant {
    let mut tenant = Tenant::new("acme", DOMAIN, AuthMethod::DeviceCode);
    tenant.scopes = tenant_auth::auth::scopes::required_scopes();
    tenant.expires_at = Utc::now() - TimeDelta::minutes(1);
    tenant
}

/// Accepts everything except access-token writes
#[derive(Debug, Default)]
struct NoAccessTokenWrites {
    inner: MemoryBackend,
}

impl SecretBackend for NoAccessTokenWrites {
    fn set(&self, namespace: &str, key: &str, value: &str) -> Result<(), SecretError> {
        if namespace.starts_with("tenant-auth access token") {
            return Err(SecretError::Backend("value too large".to_string()));
        }
        self.inner.set(namespace, key, value)
    }

    fn get(&self, namespace: &str, key: &str) -> Result<String, SecretError> {
        self.inner.get(namespace, key)
    }

    fn delete(&self, namespace: &str, key: &str) -> Result<(), SecretError> {
        self.inner.delete(namespace, key)
    }
}

/// Rejects only the second access-token chunk
#[derive(Debug, Default)]
struct RejectsSecondChunk {
    inner: MemoryBackend,
}

impl SecretBackend for RejectsSecondChunk {
    fn set(&self, namespace: &str, key: &str, value: &str) -> Result<(), SecretError> {
        if namespace == "tenant-auth access token 1" {
            return Err(SecretError::Backend("entry rejected".to_string()));
        }
        self.inner.set(namespace, key, value)
    }

    fn get(&self, namespace: &str, key: &str) -> Result<String, SecretError> {
        self.inner.get(namespace, key)
    }

    fn delete(&self, namespace: &str, key: &str) -> Result<(), SecretError> {
        self.inner.delete(namespace, key)
    }
}

const RSA_KEY: &str = include_str!("fixtures/client_assertion_rsa.pem");

fn expired_machine_tenant(auth_method: AuthMethod) -> Tenant {
    let mut tenant = Tenant::new("acme", DOMAIN, auth_method);
    tenant.expires_at = Utc::now() - TimeDelta::hours(1);
    tenant
}

#[tokio::test]
async fn test_login_as_user_saves_tenant_and_secrets() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let token = access_token_for(DOMAIN, &issuer(&server));
    mount_device_login(&server, &token).await;

    let mut session = session(&server, &dir, SecretStore::in_memory());
    let tenant = session
        .login_as_user(&["read:custom".to_string()], None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(tenant.name, "acme");
    assert_eq!(tenant.domain, DOMAIN);
    assert!(tenant.is_authenticated_with_device_code_flow());
    assert!(tenant.has_all_required_scopes());
    assert_eq!(tenant.get_extra_requested_scopes(), vec!["read:custom"]);
    assert!(tenant.access_token.is_empty());

    assert_eq!(session.secrets().refresh_token(DOMAIN).unwrap(), "refresh-123");
    assert_eq!(session.secrets().access_token(DOMAIN).unwrap(), token);

    let reloaded = ConfigStore::load(dir.path().join("config.json")).unwrap();
    assert_eq!(reloaded.default_tenant(), Some(DOMAIN));
    assert_eq!(reloaded.get_tenant(DOMAIN).unwrap(), tenant);

    assert!(session.is_logged_in_with_tenant(None));
}

#[tokio::test]
async fn test_login_as_user_rejects_foreign_domain() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let mut session = session(&server, &dir, SecretStore::in_memory());

    let err = session
        .login_as_user(&[], Some("acme.example.org"), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        TenantAuthError::Auth(tenant_auth::AuthError::InvalidDomain { .. })
    ));
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn test_login_keeps_token_in_config_without_secret_store() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let token = access_token_for(DOMAIN, &issuer(&server));
    mount_device_login(&server, &token).await;

    let mut session = session(
        &server,
        &dir,
        SecretStore::new(NoAccessTokenWrites::default()),
    );
    let tenant = session
        .login_as_user(&[], Some(DOMAIN), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(tenant.access_token, token);
    let raw = std::fs::read_to_string(dir.path().join("config.json")).unwrap();
    assert!(raw.contains(&token));
}

#[tokio::test]
async fn test_login_as_machine() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("grant_type=client_credentials"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("m2m-token", None)))
        .expect(1)
        .mount(&server)
        .await;

    let mut session = session(&server, &dir, SecretStore::in_memory());
    let credentials = ClientCredentials::builder()
        .client_id("m2m-client")
        .client_secret("m2m-secret")
        .domain(DOMAIN)
        .build();
    let tenant = session
        .login_as_machine(&credentials, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(tenant.name, "acme");
    assert!(tenant.is_authenticated_with_client_credentials());
    assert_eq!(tenant.client_id(), "m2m-client");
    assert_eq!(session.secrets().client_secret(DOMAIN).unwrap(), "m2m-secret");
    assert_eq!(session.secrets().access_token(DOMAIN).unwrap(), "m2m-token");
}

#[tokio::test]
async fn test_expired_device_token_is_refreshed_and_rotated() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let fresh = access_token_for(DOMAIN, &issuer(&server));
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=refresh-old"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(token_body(&fresh, Some("refresh-new"))),
        )
        .expect(1)
        .mount(&server)
        .await;

    let mut session = session(&server, &dir, SecretStore::in_memory());
    session.config_mut().add_tenant(expired_device_tenant()).unwrap();
    session.secrets().store_refresh_token(DOMAIN, "refresh-old").unwrap();
    session.secrets().store_access_token(DOMAIN, "expired").unwrap();

    let token = session
        .access_token(None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(token, fresh);
    assert_eq!(session.secrets().access_token(DOMAIN).unwrap(), fresh);
    assert_eq!(session.secrets().refresh_token(DOMAIN).unwrap(), "refresh-new");

    let saved = ConfigStore::load(dir.path().join("config.json"))
        .unwrap()
        .get_tenant(DOMAIN)
        .unwrap();
    assert!(!saved.has_expired_token());
    assert!(saved.access_token.is_empty());
}

#[tokio::test]
async fn test_refreshed_token_kept_when_secret_store_rejects_it() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let fresh = access_token_for(DOMAIN, &issuer(&server));
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body(&fresh, None)))
        .expect(1)
        .mount(&server)
        .await;

    let mut session = session(
        &server,
        &dir,
        SecretStore::new(NoAccessTokenWrites::default()),
    );
    session.config_mut().add_tenant(expired_device_tenant()).unwrap();
    session.secrets().store_refresh_token(DOMAIN, "refresh-old").unwrap();

    let token = session
        .access_token(Some(DOMAIN), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(token, fresh);

    let saved = ConfigStore::load(dir.path().join("config.json"))
        .unwrap()
        .get_tenant(DOMAIN)
        .unwrap();
    assert_eq!(saved.access_token, fresh);
    assert_eq!(saved.access_token(session.secrets()), fresh);
}

#[tokio::test]
async fn test_machine_token_renewed_with_stored_secret() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("client_secret=stored-secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("renewed", None)))
        .expect(1)
        .mount(&server)
        .await;

    let mut session = session(&server, &dir, SecretStore::in_memory());
    let mut tenant = Tenant::new(
        "acme",
        DOMAIN,
        AuthMethod::ClientCredentials {
            client_id: "m2m-client".to_string(),
        },
    );
    tenant.expires_at = Utc::now() - TimeDelta::hours(1);
    session.config_mut().add_tenant(tenant).unwrap();
    session.secrets().store_client_secret(DOMAIN, "stored-secret").unwrap();

    let token = session
        .access_token(Some(DOMAIN), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(token, "renewed");
}

#[tokio::test]
async fn test_partially_stored_token_does_not_shadow_fallback() {
    let server = MockServer::start().await;
    let fresh = "x".repeat(3000);
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body(&fresh, None)))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut session = session(
        &server,
        &dir,
        SecretStore::new(RejectsSecondChunk::default()),
    );
    session
        .config_mut()
        .add_tenant(expired_machine_tenant(AuthMethod::ClientCredentials {
            client_id: "m2m-client".to_string(),
        }))
        .unwrap();
    session.secrets().store_client_secret(DOMAIN, "stored-secret").unwrap();
    session.secrets().store_access_token(DOMAIN, "expired").unwrap();

    let token = session
        .access_token(Some(DOMAIN), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(token, fresh);

    let saved = session.config().get_tenant(DOMAIN).unwrap();
    assert_eq!(saved.access_token, fresh);
    assert_eq!(saved.access_token(session.secrets()), fresh);
}

#[tokio::test]
async fn test_login_as_machine_with_private_key() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("client_assertion="))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("pkjwt-token", None)))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut session = session(&server, &dir, SecretStore::in_memory());
    let credentials = PrivateKeyJwtCredentials::builder()
        .client_id("m2m-client")
        .private_key_pem(RSA_KEY)
        .signing_alg(SigningAlgorithm::Rs384)
        .domain(DOMAIN)
        .build();
    let tenant = session
        .login_as_machine_with_private_key(&credentials, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(tenant.name, "acme");
    assert_eq!(
        tenant.auth_method,
        AuthMethod::PrivateKeyJwt {
            client_id: "m2m-client".to_string(),
            signing_alg: SigningAlgorithm::Rs384,
        }
    );
    assert_eq!(session.secrets().client_assertion_key(DOMAIN).unwrap(), RSA_KEY);
    assert_eq!(session.secrets().access_token(DOMAIN).unwrap(), "pkjwt-token");

    let reloaded = ConfigStore::load(dir.path().join("config.json")).unwrap();
    assert_eq!(reloaded.get_tenant(DOMAIN).unwrap(), tenant);

    session.logout(DOMAIN).unwrap();
    assert!(session.secrets().client_assertion_key(DOMAIN).unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_private_key_tenant_renewed_with_stored_key() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("client_assertion="))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("renewed", None)))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut session = session(&server, &dir, SecretStore::in_memory());
    session
        .config_mut()
        .add_tenant(expired_machine_tenant(AuthMethod::PrivateKeyJwt {
            client_id: "m2m-client".to_string(),
            signing_alg: SigningAlgorithm::Rs256,
        }))
        .unwrap();
    session.secrets().store_client_assertion_key(DOMAIN, RSA_KEY).unwrap();

    let token = session
        .access_token(Some(DOMAIN), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(token, "renewed");
}

#[tokio::test]
async fn test_private_key_renewal_without_stored_key_fails() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let mut session = session(&server, &dir, SecretStore::in_memory());
    session
        .config_mut()
        .add_tenant(expired_machine_tenant(AuthMethod::PrivateKeyJwt {
            client_id: "m2m-client".to_string(),
            signing_alg: SigningAlgorithm::Rs256,
        }))
        .unwrap();

    let err = session
        .access_token(Some(DOMAIN), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, TenantAuthError::Secret(SecretError::NotFound)));
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn test_renewal_without_refresh_token_fails() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let mut session = session(&server, &dir, SecretStore::in_memory());
    session.config_mut().add_tenant(expired_device_tenant()).unwrap();

    let err = session
        .access_token(Some(DOMAIN), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, TenantAuthError::Secret(SecretError::NotFound)));
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn test_logout_then_login_again() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let token = access_token_for(DOMAIN, &issuer(&server));
    mount_device_login(&server, &token).await;

    let mut session = session(&server, &dir, SecretStore::in_memory());
    session
        .login_as_user(&[], None, &CancellationToken::new())
        .await
        .unwrap();

    session.logout(DOMAIN).unwrap();

    assert!(!session.is_logged_in_with_tenant(Some(DOMAIN)));
    assert!(session.secrets().refresh_token(DOMAIN).unwrap_err().is_not_found());
    let err = session.resolve_tenant(None).unwrap_err();
    assert!(err.is_not_logged_in());
}
