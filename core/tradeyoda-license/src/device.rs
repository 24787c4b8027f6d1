//! Device fingerprinting for license binding.
//!
//! A fingerprint is derived once per installation from hardware identifiers
//! plus a random salt, then persisted next to the entitlement cache. It is
//! only regenerated when the stored copy is wiped or unreadable.

use crate::cache::write_atomic;
use crate::error::{LicenseError, LicenseResult};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::env;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// File name of the persisted fingerprint inside the data directory.
pub const DEVICE_FILE: &str = "device.json";

/// A stable fingerprint that identifies this installation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceFingerprint {
    /// Base64 of the first 16 bytes of SHA-256(components | salt).
    id: String,
    generated_at: chrono::DateTime<chrono::Utc>,
}

impl DeviceFingerprint {
    /// Generates a new fingerprint for the current device.
    ///
    /// Two installations on the same hardware get different fingerprints
    /// because of the per-installation salt.
    #[must_use]
    pub fn generate() -> Self {
        let mut components = hardware_components();
        components.push(uuid::Uuid::new_v4().to_string());
        Self::from_components(&components)
    }

    fn from_components(components: &[String]) -> Self {
        let digest = Sha256::digest(components.join("|").as_bytes());
        Self {
            id: BASE64.encode(&digest[..16]),
            generated_at: chrono::Utc::now(),
        }
    }

    /// Loads the persisted fingerprint from `data_dir`, creating and storing
    /// a new one on first run or when the stored copy is unreadable.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::Storage`] if a new fingerprint cannot be
    /// written.
    pub fn load_or_create(data_dir: &Path) -> LicenseResult<Self> {
        let path = data_dir.join(DEVICE_FILE);

        match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<Self>(&bytes) {
                Ok(fp) if !fp.id.is_empty() => {
                    debug!("Loaded device fingerprint from {:?}", path);
                    return Ok(fp);
                }
                Ok(_) => warn!("Device fingerprint at {:?} is empty, regenerating", path),
                Err(e) => warn!("Device fingerprint at {:?} is corrupt ({e}), regenerating", path),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to read device fingerprint {:?}: {e}", path),
        }

        let fp = Self::generate();
        let bytes = serde_json::to_vec_pretty(&fp)?;
        write_atomic(&path, &bytes)?;
        info!("Generated new device fingerprint");
        Ok(fp)
    }

    /// Deletes the persisted fingerprint so the next load generates a new one.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::Storage`] if the file exists but cannot be removed.
    pub fn reset(data_dir: &Path) -> LicenseResult<()> {
        let path = data_dir.join(DEVICE_FILE);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LicenseError::Storage(format!(
                "failed to remove {}: {e}",
                path.display()
            ))),
        }
    }

    /// Identifier sent to the authority and stamped into the cache.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns when the fingerprint was generated.
    #[must_use]
    pub fn generated_at(&self) -> chrono::DateTime<chrono::Utc> {
        self.generated_at
    }
}

/// Host identifiers that go into the fingerprint, most stable first.
fn hardware_components() -> Vec<String> {
    let user = env::var("USER").or_else(|_| env::var("USERNAME")).ok();
    [
        Some(format!("{}-{}", env::consts::OS, env::consts::ARCH)),
        hostname::get().ok().and_then(|h| h.into_string().ok()),
        platform_machine_id(),
        user,
    ]
    .into_iter()
    .flatten()
    .collect()
}

#[cfg(target_os = "linux")]
fn platform_machine_id() -> Option<String> {
    ["/etc/machine-id", "/var/lib/dbus/machine-id"]
        .iter()
        .find_map(|p| fs::read_to_string(p).ok())
        .map(|raw| raw.trim().to_owned())
        .filter(|id| !id.is_empty())
}

#[cfg(target_os = "macos")]
fn platform_machine_id() -> Option<String> {
    let out = std::process::Command::new("ioreg")
        .args(["-rd1", "-c", "IOPlatformExpertDevice"])
        .output()
        .ok()?;
    let text = String::from_utf8(out.stdout).ok()?;
    // "IOPlatformUUID" = "XXXXXXXX-..."
    let line = text.lines().find(|l| l.contains("IOPlatformUUID"))?;
    let (_, value) = line.split_once('=')?;
    Some(value.trim().trim_matches('"').to_owned()).filter(|id| !id.is_empty())
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn platform_machine_id() -> Option<String> {
    None
}
