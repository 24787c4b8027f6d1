//! Local trust cache.
//!
//! Holds the last entitlement the authority confirmed for this device.
//! The cache is a single JSON file replaced atomically on every store, with
//! a SHA-256 digest over the entry so truncated or hand-edited files are
//! detected and treated as absent.

use crate::entitlement::EntitlementRecord;
use crate::error::{LicenseError, LicenseResult};
use crate::identifier::LicenseIdentifier;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// File name of the cache inside the data directory.
pub const CACHE_FILE: &str = "license_cache.json";

/// Current on-disk envelope version.
pub const CACHE_FORMAT_VERSION: u32 = 1;

/// The last-known-good entitlement for this installation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Fingerprint of the device the entry was cached on.
    pub device_fingerprint: String,
    /// License the entry was issued for.
    pub license_identifier: LicenseIdentifier,
    /// The authority's decision.
    pub record: EntitlementRecord,
    /// Local time of the successful authority contact.
    pub cached_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Returns the hex SHA-256 of the entry's canonical JSON.
    fn digest(&self) -> LicenseResult<String> {
        let bytes = serde_json::to_vec(self)?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }
}

#[derive(Serialize, Deserialize)]
struct CacheEnvelope {
    format_version: u32,
    digest: String,
    entry: CacheEntry,
}

/// File-backed store for the single [`CacheEntry`].
///
/// Each store is atomic on its own; the validator serialises load/store sequences.
#[derive(Debug, Clone)]
pub struct TrustCache {
    path: PathBuf,
}

impl TrustCache {
    /// Creates a cache stored at `data_dir/license_cache.json`.
    pub fn new(data_dir: &Path) -> Self {
        Self::at(data_dir.join(CACHE_FILE))
    }

    /// Creates a cache stored at an explicit path.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the cache file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the persisted entry.
    ///
    /// Missing, unreadable, or corrupt data yields `None`; this never fails.
    pub fn load(&self) -> Option<CacheEntry> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Failed to read license cache {:?}: {e}", self.path);
                return None;
            }
        };

        let envelope: CacheEnvelope = match serde_json::from_slice(&bytes) {
            Ok(env) => env,
            Err(e) => {
                warn!("License cache {:?} is corrupt: {e}", self.path);
                return None;
            }
        };

        if envelope.format_version != CACHE_FORMAT_VERSION {
            warn!(
                "License cache {:?} has unsupported version {}",
                self.path, envelope.format_version
            );
            return None;
        }

        match envelope.entry.digest() {
            Ok(digest) if digest == envelope.digest => {
                debug!("Loaded license cache from {:?}", self.path);
                Some(envelope.entry)
            }
            Ok(_) => {
                warn!("License cache {:?} failed integrity check", self.path);
                None
            }
            Err(e) => {
                warn!("License cache {:?} could not be re-encoded: {e}", self.path);
                None
            }
        }
    }

    /// Atomically replaces the persisted entry.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::Storage`] if the file cannot be written.
    pub fn store(&self, entry: &CacheEntry) -> LicenseResult<()> {
        let envelope = CacheEnvelope {
            format_version: CACHE_FORMAT_VERSION,
            digest: entry.digest()?,
            entry: entry.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&envelope)?;
        write_atomic(&self.path, &bytes)?;
        debug!("Stored license cache at {:?}", self.path);
        Ok(())
    }

    /// Deletes the persisted entry. Deleting a missing cache is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::Storage`] if the file exists but cannot be removed.
    pub fn clear(&self) -> LicenseResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!("Cleared license cache {:?}", self.path);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LicenseError::Storage(format!(
                "failed to remove {}: {e}",
                self.path.display()
            ))),
        }
    }
}

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Writes `bytes` to a unique sibling temp file, syncs it, and renames it over `path`.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> LicenseResult<()> {
    write_atomic_with(path, |file| {
        file.write_all(bytes)?;
        file.sync_all()
    })
}

/// Removes the temp file on drop unless it was renamed into place.
struct PendingFile {
    path: PathBuf,
    committed: bool,
}

impl Drop for PendingFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.path);
        }
    }
}

fn write_atomic_with<F>(path: &Path, fill: F) -> LicenseResult<()>
where
    F: FnOnce(&mut File) -> std::io::Result<()>,
{
    let storage_err = |what: &str, p: &Path, e: std::io::Error| {
        LicenseError::Storage(format!("failed to {what} {}: {e}", p.display()))
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| storage_err("create", parent, e))?;
    }

    let file_name = path
        .file_name()
        .ok_or_else(|| LicenseError::Storage(format!("{} has no file name", path.display())))?;
    let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(format!(".{}.{seq}.tmp", std::process::id()));
    let mut pending = PendingFile {
        path: path.with_file_name(tmp_name),
        committed: false,
    };

    let mut file =
        File::create(&pending.path).map_err(|e| storage_err("create", &pending.path, e))?;
    fill(&mut file).map_err(|e| storage_err("write", &pending.path, e))?;
    drop(file);

    fs::rename(&pending.path, path).map_err(|e| storage_err("replace", path, e))?;
    pending.committed = true;
    Ok(())
}
