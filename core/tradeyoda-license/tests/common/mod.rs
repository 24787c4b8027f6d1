//! Shared test helpers for license tests.

#![allow(dead_code)]

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, TimeZone, Utc};
use ed25519_dalek::{Signer, SigningKey};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tradeyoda_license::{
    AuthorityRequest, Capabilities, CapabilityValue, EntitlementAuthority, EntitlementRecord,
    FixedClock, LicenseConfig, LicenseError, LicenseResult, LicenseValidator, Tier,
    parse_response,
};

pub const TEST_KEY: &str = "TYODA-A1B2-C3D4-E5F6-0789";
pub const OTHER_KEY: &str = "TYODA-FFFF-EEEE-DDDD-CCCC";

/// Returns a deterministic Ed25519 key pair from a fixed seed.
pub fn test_keypair() -> (SigningKey, [u8; 32]) {
    let seed: [u8; 32] = [
        1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24,
        25, 26, 27, 28, 29, 30, 31, 32,
    ];
    let signing_key = SigningKey::from_bytes(&seed);
    let verifying_key = signing_key.verifying_key();
    (signing_key, verifying_key.to_bytes())
}

/// Signs a response body the way the authority does: `base64url(ed25519(body))`.
pub fn sign_body(signing_key: &SigningKey, body: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(signing_key.sign(body).to_bytes())
}

/// Fixed "now" used by validator tests.
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap()
}

/// Capabilities matching the PRO tier table.
pub fn pro_capabilities() -> Capabilities {
    let mut caps = Capabilities::new();
    caps.insert("zone_analysis".into(), CapabilityValue::Flag(true));
    caps.insert("manual_trading".into(), CapabilityValue::Flag(true));
    caps.insert("auto_trading".into(), CapabilityValue::Flag(true));
    caps.insert("openai_model".into(), CapabilityValue::Text("gpt-4.1".into()));
    caps.insert("support_level".into(), CapabilityValue::Text("premium_oncall".into()));
    caps
}

/// A valid, non-expiring grant issued a minute before [`base_time`].
pub fn grant(tier: Tier, capabilities: Capabilities) -> EntitlementRecord {
    EntitlementRecord {
        tier,
        valid: true,
        expires_at: None,
        capabilities,
        issued_at: base_time() - chrono::Duration::minutes(1),
    }
}

/// An authoritative denial.
pub fn denial() -> EntitlementRecord {
    EntitlementRecord {
        tier: Tier::Trial,
        valid: false,
        expires_at: None,
        capabilities: Capabilities::new(),
        issued_at: base_time(),
    }
}

/// What the fake authority does on the next call.
#[derive(Debug, Clone)]
pub enum Reply {
    Record(EntitlementRecord),
    Network,
    Status(u16),
    Malformed,
    /// A raw response body, parsed the way the HTTP client parses it.
    Body(String),
    /// Sleeps before answering with the record.
    Slow(Duration, EntitlementRecord),
}

/// Scripted in-process authority.
pub struct FakeAuthority {
    reply: Mutex<Reply>,
    calls: AtomicUsize,
    last_request: Mutex<Option<AuthorityRequest>>,
}

impl FakeAuthority {
    pub fn new(reply: Reply) -> Arc<Self> {
        Arc::new(Self {
            reply: Mutex::new(reply),
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        })
    }

    pub fn set(&self, reply: Reply) {
        *self.reply.lock().unwrap() = reply;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<AuthorityRequest> {
        self.last_request.lock().unwrap().clone()
    }
}

#[async_trait]
impl EntitlementAuthority for FakeAuthority {
    async fn check(&self, request: &AuthorityRequest) -> LicenseResult<EntitlementRecord> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(request.clone());
        let reply = self.reply.lock().unwrap().clone();
        match reply {
            Reply::Record(record) => Ok(record),
            Reply::Network => Err(LicenseError::Network("connection refused".into())),
            Reply::Status(status) => Err(LicenseError::Authority { status }),
            Reply::Malformed => Err(LicenseError::MalformedResponse("missing field `valid`".into())),
            Reply::Body(body) => parse_response(body.as_bytes()),
            Reply::Slow(delay, record) => {
                tokio::time::sleep(delay).await;
                Ok(record)
            }
        }
    }
}

/// A validator over a fresh temp dir, a fake authority and a fixed clock.
pub struct Harness {
    pub dir: TempDir,
    pub config: LicenseConfig,
    pub authority: Arc<FakeAuthority>,
    pub clock: Arc<FixedClock>,
    pub validator: LicenseValidator,
}

impl Harness {
    pub fn new(reply: Reply) -> Self {
        let dir = TempDir::new().unwrap();
        let config = LicenseConfig::with_data_dir(dir.path());
        Self::with_config(dir, config, reply)
    }

    pub fn with_config(dir: TempDir, config: LicenseConfig, reply: Reply) -> Self {
        let authority = FakeAuthority::new(reply);
        let clock = Arc::new(FixedClock::new(base_time()));
        let validator = LicenseValidator::open(&config, authority.clone())
            .unwrap()
            .with_clock(clock.clone());
        Self {
            dir,
            config,
            authority,
            clock,
            validator,
        }
    }

    /// Re-opens the validator over the same data dir, as after a restart.
    pub fn reopen(self) -> Self {
        let Harness {
            dir,
            config,
            authority,
            clock,
            ..
        } = self;
        let validator = LicenseValidator::open(&config, authority.clone())
            .unwrap()
            .with_clock(clock.clone());
        Self {
            dir,
            config,
            authority,
            clock,
            validator,
        }
    }
}
