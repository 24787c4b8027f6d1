//! Client side of the entitlement authority.
//!
//! The validator only sees the [`EntitlementAuthority`] trait. Every failure
//! an implementation reports (network, status, shape, signature) is treated
//! the same way by the validator: authority unreachable.

use crate::entitlement::{AuthorityRequest, AuthorityResponse, EntitlementRecord};
use crate::error::{LicenseError, LicenseResult};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};

/// Header carrying `base64url(ed25519(body))` on signed responses.
pub const SIGNATURE_HEADER: &str = "x-entitlement-signature";

/// Path of the validation endpoint relative to the authority base URL.
pub const VALIDATE_PATH: &str = "/api/licenses/validate";

/// A source of entitlement decisions.
#[async_trait]
pub trait EntitlementAuthority: Send + Sync {
    /// Asks the authority for the current decision on a license/device pair.
    async fn check(&self, request: &AuthorityRequest) -> LicenseResult<EntitlementRecord>;
}

/// Verifies an Ed25519 signature over a raw response body.
///
/// # Errors
///
/// Returns [`LicenseError::InvalidSignature`] if the signature is missing,
/// undecodable, or does not match.
pub fn verify_signature(
    body: &[u8],
    signature_b64: Option<&str>,
    pub_key_bytes: &[u8; 32],
) -> LicenseResult<()> {
    let signature_b64 = signature_b64.ok_or(LicenseError::InvalidSignature)?;
    let sig_bytes = URL_SAFE_NO_PAD
        .decode(signature_b64.trim())
        .map_err(|_| LicenseError::InvalidSignature)?;
    let signature = Signature::from_slice(&sig_bytes).map_err(|_| LicenseError::InvalidSignature)?;
    let verifying_key =
        VerifyingKey::from_bytes(pub_key_bytes).map_err(|_| LicenseError::InvalidSignature)?;
    verifying_key
        .verify(body, &signature)
        .map_err(|_| LicenseError::InvalidSignature)
}

/// Parses a (verified) response body into a record.
///
/// # Errors
///
/// Returns [`LicenseError::MalformedResponse`] for bodies of the wrong shape.
pub fn parse_response(body: &[u8]) -> LicenseResult<EntitlementRecord> {
    AuthorityResponse::from_slice(body)?.into_record(chrono::Utc::now())
}

#[cfg(feature = "online")]
pub use http::HttpAuthority;

#[cfg(feature = "online")]
mod http {
    use super::*;
    use crate::config::LicenseConfig;
    use reqwest::Client;
    use std::time::Duration;
    use tracing::debug;

    /// HTTP+JSON authority client.
    #[derive(Debug, Clone)]
    pub struct HttpAuthority {
        client: Client,
        base_url: String,
        public_key: Option<[u8; 32]>,
    }

    impl HttpAuthority {
        /// Creates a client for `base_url` with a request timeout.
        ///
        /// # Errors
        ///
        /// Returns [`LicenseError::Config`] if the HTTP client cannot be built.
        pub fn new(base_url: impl Into<String>, timeout: Duration) -> LicenseResult<Self> {
            let client = Client::builder()
                .timeout(timeout)
                .connect_timeout(timeout)
                .build()
                .map_err(|e| LicenseError::Config(format!("failed to build HTTP client: {e}")))?;
            Ok(Self {
                client,
                base_url: base_url.into().trim_end_matches('/').to_string(),
                public_key: None,
            })
        }

        /// Builds a client from the licensing configuration.
        ///
        /// # Errors
        ///
        /// Returns [`LicenseError::Config`] for an unusable key or client.
        pub fn from_config(config: &LicenseConfig) -> LicenseResult<Self> {
            let mut authority = Self::new(config.authority_url.clone(), config.request_timeout())?;
            authority.public_key = config.public_key()?;
            Ok(authority)
        }

        /// Requires every response to be signed by `key`.
        #[must_use]
        pub fn with_public_key(mut self, key: [u8; 32]) -> Self {
            self.public_key = Some(key);
            self
        }

        /// Returns the base URL.
        pub fn base_url(&self) -> &str {
            &self.base_url
        }
    }

    #[async_trait]
    impl EntitlementAuthority for HttpAuthority {
        async fn check(&self, request: &AuthorityRequest) -> LicenseResult<EntitlementRecord> {
            let url = format!("{}{}", self.base_url, VALIDATE_PATH);
            let response = self
                .client
                .post(&url)
                .json(request)
                .send()
                .await
                .map_err(|e| {
                    if e.is_timeout() {
                        LicenseError::Timeout
                    } else {
                        LicenseError::Network(e.to_string())
                    }
                })?;

            let status = response.status();
            if !status.is_success() {
                return Err(LicenseError::Authority {
                    status: status.as_u16(),
                });
            }

            let signature = response
                .headers()
                .get(SIGNATURE_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);
            let body = response.bytes().await.map_err(|e| {
                if e.is_timeout() {
                    LicenseError::Timeout
                } else {
                    LicenseError::Network(e.to_string())
                }
            })?;

            if let Some(key) = &self.public_key {
                verify_signature(&body, signature.as_deref(), key)?;
            }

            debug!("Authority answered {} ({} bytes)", status, body.len());
            parse_response(&body)
        }
    }
}
