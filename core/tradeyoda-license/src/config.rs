//! Licensing configuration.
//!
//! Grace and revalidation windows are product decisions, so they are
//! configurable rather than baked in. Values come from defaults, an optional
//! JSON file, then environment overrides.

use crate::error::{LicenseError, LicenseResult};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default licensing server for development builds.
pub const DEFAULT_AUTHORITY_URL: &str = "http://localhost:8100";

/// Default offline grace period (24 hours).
pub const DEFAULT_OFFLINE_GRACE_SECS: u64 = 24 * 60 * 60;

/// Default revalidation cadence (4 hours).
pub const DEFAULT_REVALIDATION_SECS: u64 = 4 * 60 * 60;

/// Default authority request timeout.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

const APP_DIR_NAME: &str = "TradeYoda";

/// Licensing configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LicenseConfig {
    /// Base URL of the entitlement authority.
    pub authority_url: String,
    /// Directory holding the license key, device fingerprint and cache.
    pub data_dir: PathBuf,
    /// How long a cached entitlement is trusted without the authority.
    pub offline_grace_secs: u64,
    /// Cadence of the periodic revalidation timer.
    pub revalidation_interval_secs: u64,
    /// Upper bound on a single authority request.
    pub request_timeout_secs: u64,
    /// Base64 Ed25519 key; when set, authority responses must be signed.
    pub authority_public_key: Option<String>,
}

impl Default for LicenseConfig {
    fn default() -> Self {
        Self {
            authority_url: DEFAULT_AUTHORITY_URL.to_string(),
            data_dir: default_data_dir(),
            offline_grace_secs: DEFAULT_OFFLINE_GRACE_SECS,
            revalidation_interval_secs: DEFAULT_REVALIDATION_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            authority_public_key: None,
        }
    }
}

impl LicenseConfig {
    /// Creates a default configuration rooted at `data_dir`.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Loads a configuration file. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::Config`] if the file cannot be read or parsed.
    pub fn load(path: &Path) -> LicenseResult<Self> {
        let bytes = std::fs::read(path)
            .map_err(|e| LicenseError::Config(format!("failed to read {}: {e}", path.display())))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| LicenseError::Config(format!("failed to parse {}: {e}", path.display())))
    }

    /// Applies overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::Config`] if a numeric variable does not parse.
    pub fn apply_env(&mut self) -> LicenseResult<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::Config`] if a numeric variable does not parse.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> LicenseResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("TRADEYODA_LICENSING_URL").or_else(|| lookup("LICENSING_SERVER_URL")) {
            self.authority_url = url;
        }
        if let Some(dir) = lookup("TRADEYODA_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(v) = lookup("TRADEYODA_OFFLINE_GRACE_SECS") {
            self.offline_grace_secs = parse_secs("TRADEYODA_OFFLINE_GRACE_SECS", &v)?;
        }
        if let Some(v) = lookup("TRADEYODA_REVALIDATE_SECS") {
            self.revalidation_interval_secs = parse_secs("TRADEYODA_REVALIDATE_SECS", &v)?;
        }
        if let Some(v) = lookup("TRADEYODA_REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = parse_secs("TRADEYODA_REQUEST_TIMEOUT_SECS", &v)?;
        }
        if let Some(key) = lookup("TRADEYODA_AUTHORITY_PUBKEY") {
            self.authority_public_key = Some(key);
        }
        Ok(())
    }

    /// Checks that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::Config`] describing the first problem found.
    pub fn validate(&self) -> LicenseResult<()> {
        if self.authority_url.trim().is_empty() {
            return Err(LicenseError::Config("authority_url is empty".to_string()));
        }
        if self.request_timeout_secs == 0 {
            return Err(LicenseError::Config("request_timeout_secs must be > 0".to_string()));
        }
        if self.revalidation_interval_secs == 0 {
            return Err(LicenseError::Config(
                "revalidation_interval_secs must be > 0".to_string(),
            ));
        }
        self.public_key()?;
        Ok(())
    }

    /// Returns the offline grace period.
    #[must_use]
    pub fn offline_grace(&self) -> Duration {
        Duration::from_secs(self.offline_grace_secs)
    }

    /// Returns the revalidation cadence.
    #[must_use]
    pub fn revalidation_interval(&self) -> Duration {
        Duration::from_secs(self.revalidation_interval_secs)
    }

    /// Returns the authority request timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Decodes the configured authority public key.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::Config`] if the key is not 32 bytes of base64.
    pub fn public_key(&self) -> LicenseResult<Option<[u8; 32]>> {
        let Some(encoded) = self.authority_public_key.as_deref() else {
            return Ok(None);
        };
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| LicenseError::Config(format!("invalid authority public key: {e}")))?;
        let key: [u8; 32] = bytes.try_into().map_err(|_| {
            LicenseError::Config("authority public key must be 32 bytes".to_string())
        })?;
        Ok(Some(key))
    }
}

fn parse_secs(name: &str, value: &str) -> LicenseResult<u64> {
    value
        .trim()
        .parse()
        .map_err(|e| LicenseError::Config(format!("{name}={value}: {e}")))
}

/// OS application data directory for TradeYoda.
fn default_data_dir() -> PathBuf {
    if let Some(dir) = dirs::data_dir() {
        return dir.join(APP_DIR_NAME);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(format!(".{}", APP_DIR_NAME.to_lowercase()))
}
