#![cfg(feature = "online")]

mod common;

use common::{TEST_KEY, sign_body, test_keypair};
use std::time::Duration;
use tempfile::TempDir;
use tradeyoda_license::{
    AuthorityRequest, EntitlementAuthority, HttpAuthority, LicenseConfig, LicenseError,
    LicenseValidator, SIGNATURE_HEADER, Tier, VALIDATE_PATH, ValidatorState, names,
    verify_signature,
};
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PRO_BODY: &str = r#"{
    "success": true,
    "valid": true,
    "tier": "PRO",
    "expires_at": null,
    "capabilities": {"auto_trading": true, "openai_model": "gpt-4.1"},
    "issued_at": "2026-01-15T11:59:00Z"
}"#;

fn request() -> AuthorityRequest {
    AuthorityRequest {
        license_key: TEST_KEY.to_string(),
        device_id: "device-1".to_string(),
    }
}

fn client(server: &MockServer) -> HttpAuthority {
    HttpAuthority::new(server.uri(), Duration::from_secs(2)).unwrap()
}

// ── Responses ───────────────────────────────────────────────────

#[tokio::test]
async fn posts_license_and_device() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(VALIDATE_PATH))
        .and(body_json(serde_json::json!({
            "license_key": TEST_KEY,
            "device_id": "device-1"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_string(PRO_BODY))
        .expect(1)
        .mount(&server)
        .await;

    let record = client(&server).check(&request()).await.unwrap();
    assert!(record.valid);
    assert_eq!(record.tier, Tier::Pro);
}

#[tokio::test]
async fn denial_body_is_a_record() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(VALIDATE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"valid": false}"#))
        .mount(&server)
        .await;

    let record = client(&server).check(&request()).await.unwrap();
    assert!(!record.valid);
}

#[tokio::test]
async fn grant_without_issue_time_is_accepted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(VALIDATE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"valid": true, "tier": "PRO", "expires_at": null, "capabilities": {"auto_trading": true}}"#,
        ))
        .mount(&server)
        .await;

    let before = chrono::Utc::now();
    let record = client(&server).check(&request()).await.unwrap();
    assert_eq!(record.tier, Tier::Pro);
    assert!(record.issued_at >= before);
    assert!(record.capabilities.contains_key(names::AUTO_TRADING));
}

#[tokio::test]
async fn denial_with_unknown_tier_is_a_denial() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(r#"{"valid": false, "tier": "NONE"}"#),
        )
        .mount(&server)
        .await;

    let record = client(&server).check(&request()).await.unwrap();
    assert!(!record.valid);
}

#[tokio::test]
async fn server_error_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = client(&server).check(&request()).await.unwrap_err();
    assert!(matches!(err, LicenseError::Authority { status: 503 }));
    assert!(err.is_transient());
}

#[tokio::test]
async fn forbidden_with_denial_body_is_still_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(403).set_body_string(r#"{"detail": "License has been revoked"}"#),
        )
        .mount(&server)
        .await;

    let err = client(&server).check(&request()).await.unwrap_err();
    assert!(matches!(err, LicenseError::Authority { status: 403 }));
}

#[tokio::test]
async fn unparseable_body_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let err = client(&server).check(&request()).await.unwrap_err();
    assert!(matches!(err, LicenseError::MalformedResponse(_)));
}

#[tokio::test]
async fn slow_server_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(PRO_BODY)
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let authority = HttpAuthority::new(server.uri(), Duration::from_millis(200)).unwrap();
    let err = authority.check(&request()).await.unwrap_err();
    assert!(matches!(err, LicenseError::Timeout));
}

#[tokio::test]
async fn unreachable_server_is_network_error() {
    // Nothing listens on port 9 locally.
    let authority = HttpAuthority::new("http://127.0.0.1:9", Duration::from_secs(1)).unwrap();
    let err = authority.check(&request()).await.unwrap_err();
    assert!(err.is_transient());
}

#[test]
fn trailing_slash_is_trimmed() {
    let authority = HttpAuthority::new("http://example.test/", Duration::from_secs(1)).unwrap();
    assert_eq!(authority.base_url(), "http://example.test");
}

// ── Signatures ──────────────────────────────────────────────────

#[tokio::test]
async fn signed_response_accepted() {
    let (sk, pk) = test_keypair();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header(SIGNATURE_HEADER, sign_body(&sk, PRO_BODY.as_bytes()).as_str())
                .set_body_string(PRO_BODY),
        )
        .mount(&server)
        .await;

    let record = client(&server)
        .with_public_key(pk)
        .check(&request())
        .await
        .unwrap();
    assert_eq!(record.tier, Tier::Pro);
}

#[tokio::test]
async fn unsigned_response_rejected_when_key_configured() {
    let (_, pk) = test_keypair();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string(PRO_BODY))
        .mount(&server)
        .await;

    let err = client(&server)
        .with_public_key(pk)
        .check(&request())
        .await
        .unwrap_err();
    assert!(matches!(err, LicenseError::InvalidSignature));
}

#[tokio::test]
async fn tampered_body_rejected() {
    let (sk, pk) = test_keypair();
    let tampered = PRO_BODY.replace("PRO", "BASIC");
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header(SIGNATURE_HEADER, sign_body(&sk, PRO_BODY.as_bytes()).as_str())
                .set_body_string(tampered),
        )
        .mount(&server)
        .await;

    let err = client(&server)
        .with_public_key(pk)
        .check(&request())
        .await
        .unwrap_err();
    assert!(matches!(err, LicenseError::InvalidSignature));
}

#[test]
fn verify_signature_rejects_garbage() {
    let (_, pk) = test_keypair();
    assert!(verify_signature(b"{}", Some("!!!"), &pk).is_err());
    assert!(verify_signature(b"{}", Some("AAAA"), &pk).is_err());
    assert!(verify_signature(b"{}", None, &pk).is_err());
}

// ── End to end through the validator ────────────────────────────

#[tokio::test]
async fn validator_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(VALIDATE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string(PRO_BODY))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = LicenseConfig {
        authority_url: server.uri(),
        request_timeout_secs: 2,
        ..LicenseConfig::with_data_dir(dir.path())
    };
    let validator = LicenseValidator::from_config(&config).unwrap();

    assert_eq!(
        validator.activate(TEST_KEY).await.unwrap(),
        ValidatorState::ValidFresh
    );
    assert!(validator.capability_surface().is_enabled(names::AUTO_TRADING));

    // Second call hits the 502 mock and falls back to the fresh cache.
    let outcome = validator.validate().await;
    assert_eq!(outcome.state, ValidatorState::ValidCached);
    assert!(outcome.surface().is_enabled(names::AUTO_TRADING));
}
