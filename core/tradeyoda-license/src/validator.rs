//! License validator.
//!
//! Each call runs one validation attempt to completion:
//!
//! 1. No license configured: `NO_LICENSE`.
//! 2. One time-bounded call to the authority.
//! 3. Authority answered: a denial is final and wipes the cache, an expired
//!    grant is `EXPIRED`, anything else is persisted and `VALID_FRESH`.
//! 4. Authority failed: the cache decides. It must belong to this device and
//!    license and be no older than the offline grace period (`VALID_CACHED`),
//!    otherwise access is denied.
//!
//! Attempts are serialised by an async mutex. The validator never retries;
//! cadence is the caller's job (see [`crate::schedule`]).

use crate::authority::EntitlementAuthority;
use crate::cache::{CacheEntry, TrustCache, write_atomic};
use crate::clock::{Clock, SystemClock};
use crate::config::LicenseConfig;
use crate::device::DeviceFingerprint;
use crate::entitlement::{AuthorityRequest, EntitlementRecord};
use crate::error::{LicenseError, LicenseResult};
use crate::gate::{CapabilitySurface, LicenseNotice, ValidatorState, capability_surface};
use crate::identifier::LicenseIdentifier;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

/// File name of the stored license identifier inside the data directory.
pub const KEY_FILE: &str = "license_key";

/// Tolerated clock disagreement: cached entries stamped further than this in
/// the future are distrusted, and authority decisions older than the cached
/// one by more than this are stale.
const CLOCK_SKEW_TOLERANCE_SECS: i64 = 5 * 60;

/// Result of one validation attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    /// Final state of the attempt.
    pub state: ValidatorState,
    /// The record the state was derived from, if any.
    pub record: Option<EntitlementRecord>,
    /// Last successful authority contact backing `record`.
    pub cached_at: Option<DateTime<Utc>>,
    /// End of the offline grace period when running on the cache.
    pub offline_until: Option<DateTime<Utc>>,
    /// False when a fresh grant could not be written to the cache.
    pub persisted: bool,
    /// When the attempt finished, or `None` before the first attempt.
    pub checked_at: Option<DateTime<Utc>>,
}

impl ValidationOutcome {
    fn denied(state: ValidatorState, checked_at: Option<DateTime<Utc>>) -> Self {
        Self {
            state,
            record: None,
            cached_at: None,
            offline_until: None,
            persisted: false,
            checked_at,
        }
    }

    /// Outcome before any attempt has run.
    #[must_use]
    pub fn not_validated() -> Self {
        Self::denied(ValidatorState::NoLicense, None)
    }

    /// Capability surface for this outcome.
    #[must_use]
    pub fn surface(&self) -> CapabilitySurface {
        capability_surface(self.state, self.record.as_ref())
    }

    /// User-facing message for this outcome.
    #[must_use]
    pub fn notice(&self) -> LicenseNotice {
        match self.state {
            ValidatorState::ValidFresh => LicenseNotice::Licensed,
            ValidatorState::ValidCached => match self.offline_until {
                Some(until) => LicenseNotice::Offline { until },
                None => LicenseNotice::Licensed,
            },
            ValidatorState::Invalid => LicenseNotice::Denied { expired: false },
            ValidatorState::Expired => LicenseNotice::Denied { expired: true },
            ValidatorState::NoLicense => LicenseNotice::NotActivated,
            ValidatorState::Checking => LicenseNotice::Checking,
        }
    }
}

/// Decides whether this installation may operate, and with what capabilities.
///
/// Construct one per application instance and share it behind an `Arc`.
pub struct LicenseValidator {
    data_dir: PathBuf,
    cache: TrustCache,
    device: DeviceFingerprint,
    authority: Arc<dyn EntitlementAuthority>,
    clock: Arc<dyn Clock>,
    offline_grace: chrono::Duration,
    request_timeout: Duration,
    /// Configured license; the lock also serialises attempts.
    license: Mutex<Option<LicenseIdentifier>>,
    last: watch::Sender<ValidationOutcome>,
}

impl LicenseValidator {
    /// Opens the validator state in `config.data_dir`.
    ///
    /// Creates the device fingerprint on first run and picks up a previously
    /// activated license identifier.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::Config`] for an invalid configuration and
    /// [`LicenseError::Storage`] if the data directory is unusable.
    pub fn open(
        config: &LicenseConfig,
        authority: Arc<dyn EntitlementAuthority>,
    ) -> LicenseResult<Self> {
        config.validate()?;
        fs::create_dir_all(&config.data_dir).map_err(|e| {
            LicenseError::Storage(format!(
                "failed to create {}: {e}",
                config.data_dir.display()
            ))
        })?;

        let device = DeviceFingerprint::load_or_create(&config.data_dir)?;
        let license = load_license_key(&config.data_dir);
        match &license {
            Some(id) => info!("License {} configured", id.masked()),
            None => info!("No license configured"),
        }

        let (last, _) = watch::channel(ValidationOutcome::not_validated());
        Ok(Self {
            data_dir: config.data_dir.clone(),
            cache: TrustCache::new(&config.data_dir),
            device,
            authority,
            clock: Arc::new(SystemClock),
            offline_grace: chrono::Duration::from_std(config.offline_grace())
                .unwrap_or(chrono::Duration::MAX),
            request_timeout: config.request_timeout(),
            license: Mutex::new(license),
            last,
        })
    }

    /// Opens a validator talking to the HTTP authority in `config`.
    ///
    /// # Errors
    ///
    /// See [`LicenseValidator::open`].
    #[cfg(feature = "online")]
    pub fn from_config(config: &LicenseConfig) -> LicenseResult<Self> {
        let authority = crate::authority::HttpAuthority::from_config(config)?;
        Self::open(config, Arc::new(authority))
    }

    /// Replaces the clock used for cache ages and expiry.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Returns this installation's device fingerprint.
    pub fn device(&self) -> &DeviceFingerprint {
        &self.device
    }

    /// Returns the data directory.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Returns the trust cache.
    pub fn cache(&self) -> &TrustCache {
        &self.cache
    }

    /// Returns the offline grace period.
    pub fn offline_grace(&self) -> chrono::Duration {
        self.offline_grace
    }

    /// Returns the currently configured license, if any.
    pub async fn license(&self) -> Option<LicenseIdentifier> {
        self.license.lock().await.clone()
    }

    /// Runs one validation attempt, waiting for any attempt in flight.
    pub async fn validate(&self) -> ValidationOutcome {
        let license = self.license.lock().await;
        let outcome = self.run(license.as_ref()).await;
        self.publish(outcome)
    }

    /// Runs one validation attempt unless another is already in flight.
    ///
    /// Used by the periodic timer so slow checks never queue up.
    pub async fn try_revalidate(&self) -> Option<ValidationOutcome> {
        let Ok(license) = self.license.try_lock() else {
            debug!("Validation already in flight, skipping scheduled check");
            return None;
        };
        let outcome = self.run(license.as_ref()).await;
        Some(self.publish(outcome))
    }

    /// Stores `raw` as the active license and validates it immediately.
    ///
    /// A cache bound to a different license is discarded first.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::InvalidKeyFormat`] for a malformed identifier
    /// and [`LicenseError::Storage`] if it cannot be saved. Validation
    /// failures are reported through the returned state, not as errors.
    pub async fn activate(&self, raw: &str) -> LicenseResult<ValidatorState> {
        let id = LicenseIdentifier::parse(raw)?;
        let mut license = self.license.lock().await;

        if license.as_ref() != Some(&id) {
            if let Some(previous) = license.as_ref() {
                info!("Switching license {} -> {}", previous.masked(), id.masked());
            }
            if let Err(e) = self.cache.clear() {
                // Fallback also checks the identifier, so a leftover entry is inert.
                warn!("Failed to clear previous license cache: {e}");
            }
        }

        write_atomic(&self.data_dir.join(KEY_FILE), id.as_str().as_bytes())?;
        info!("Activated license {}", id.masked());
        *license = Some(id);

        let outcome = self.run(license.as_ref()).await;
        Ok(self.publish(outcome).state)
    }

    /// Forgets the license and wipes the cache.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::Storage`] if a file cannot be removed.
    pub async fn deactivate(&self) -> LicenseResult<()> {
        let mut license = self.license.lock().await;
        *license = None;

        let key_path = self.data_dir.join(KEY_FILE);
        let key_result = match fs::remove_file(&key_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LicenseError::Storage(format!(
                "failed to remove {}: {e}",
                key_path.display()
            ))),
        };
        let cache_result = self.cache.clear();

        self.publish(ValidationOutcome::denied(
            ValidatorState::NoLicense,
            Some(self.clock.now()),
        ));
        info!("License deactivated");
        key_result.and(cache_result)
    }

    /// Current state. `CHECKING` while an attempt is in flight.
    pub fn state(&self) -> ValidatorState {
        if self.license.try_lock().is_err() {
            return ValidatorState::Checking;
        }
        self.last.borrow().state
    }

    /// Outcome of the most recent attempt.
    pub fn last_outcome(&self) -> ValidationOutcome {
        self.last.borrow().clone()
    }

    /// Capability surface from the most recent attempt.
    pub fn capability_surface(&self) -> CapabilitySurface {
        self.last.borrow().surface()
    }

    /// Subscribes to the outcome of every future attempt.
    pub fn subscribe(&self) -> watch::Receiver<ValidationOutcome> {
        self.last.subscribe()
    }

    fn publish(&self, outcome: ValidationOutcome) -> ValidationOutcome {
        self.last.send_replace(outcome.clone());
        outcome
    }

    async fn run(&self, license: Option<&LicenseIdentifier>) -> ValidationOutcome {
        let Some(license) = license else {
            debug!("No license configured");
            return ValidationOutcome::denied(ValidatorState::NoLicense, Some(self.clock.now()));
        };

        let request = AuthorityRequest {
            license_key: license.as_str().to_string(),
            device_id: self.device.id().to_string(),
        };

        debug!("Checking license {} with authority", license.masked());
        let result = match tokio::time::timeout(self.request_timeout, self.authority.check(&request))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(LicenseError::Timeout),
        };

        let now = self.clock.now();
        match result {
            Ok(record) => self.on_decision(license, record, now),
            Err(e) => {
                warn!("License authority unavailable: {e}");
                self.fall_back(license, now)
            }
        }
    }

    fn on_decision(
        &self,
        license: &LicenseIdentifier,
        record: EntitlementRecord,
        now: DateTime<Utc>,
    ) -> ValidationOutcome {
        if !record.valid || record.is_expired_at(now) {
            let state = if record.valid {
                ValidatorState::Expired
            } else {
                ValidatorState::Invalid
            };
            warn!("License {} denied by authority: {}", license.masked(), state);
            if let Err(e) = self.cache.clear() {
                warn!("Failed to clear license cache after denial: {e}");
            }
            return ValidationOutcome {
                record: Some(record),
                ..ValidationOutcome::denied(state, Some(now))
            };
        }

        if let Some(cached) = self.cache.load().filter(|c| self.owns(c, license)) {
            let skew = chrono::Duration::seconds(CLOCK_SKEW_TOLERANCE_SECS);
            if cached.record.issued_at - record.issued_at > skew {
                let err = LicenseError::StaleResponse(record.issued_at.to_rfc3339());
                warn!("Ignoring authority decision: {err}");
                return self.fall_back(license, now);
            }
        }

        let entry = CacheEntry {
            device_fingerprint: self.device.id().to_string(),
            license_identifier: license.clone(),
            record,
            cached_at: now,
        };
        let persisted = match self.cache.store(&entry) {
            Ok(()) => true,
            Err(e) => {
                warn!("Entitlement confirmed but not cached: {e}");
                false
            }
        };

        info!("License {} valid ({})", license.masked(), entry.record.tier);
        ValidationOutcome {
            state: ValidatorState::ValidFresh,
            record: Some(entry.record),
            cached_at: Some(now),
            offline_until: None,
            persisted,
            checked_at: Some(now),
        }
    }

    fn fall_back(&self, license: &LicenseIdentifier, now: DateTime<Utc>) -> ValidationOutcome {
        let Some(entry) = self.cache.load() else {
            info!("No cached entitlement to fall back on");
            return ValidationOutcome::denied(ValidatorState::NoLicense, Some(now));
        };

        if entry.device_fingerprint != self.device.id() {
            warn!("Cached entitlement belongs to another device; re-activation required");
            return ValidationOutcome::denied(ValidatorState::NoLicense, Some(now));
        }
        if entry.license_identifier != *license {
            warn!("Cached entitlement belongs to another license");
            return ValidationOutcome::denied(ValidatorState::NoLicense, Some(now));
        }
        if !entry.record.valid {
            return ValidationOutcome::denied(ValidatorState::Invalid, Some(now));
        }

        let age = now - entry.cached_at;
        if age < -chrono::Duration::seconds(CLOCK_SKEW_TOLERANCE_SECS) {
            warn!("Cached entitlement is stamped in the future; distrusting it");
            return ValidationOutcome::denied(ValidatorState::Invalid, Some(now));
        }
        if age > self.offline_grace {
            warn!(
                "Cached entitlement is {}h old, beyond the offline grace period",
                age.num_hours()
            );
            return ValidationOutcome::denied(ValidatorState::Invalid, Some(now));
        }
        if entry.record.is_expired_at(now) {
            warn!("Cached entitlement expired while offline");
            return ValidationOutcome::denied(ValidatorState::Expired, Some(now));
        }

        let offline_until = entry.cached_at.checked_add_signed(self.offline_grace);
        match offline_until {
            Some(until) => info!("Operating on cached entitlement until {}", until),
            None => info!("Operating on cached entitlement"),
        }
        ValidationOutcome {
            state: ValidatorState::ValidCached,
            record: Some(entry.record),
            cached_at: Some(entry.cached_at),
            offline_until,
            persisted: true,
            checked_at: Some(now),
        }
    }

    fn owns(&self, entry: &CacheEntry, license: &LicenseIdentifier) -> bool {
        entry.device_fingerprint == self.device.id() && entry.license_identifier == *license
    }
}

fn load_license_key(data_dir: &Path) -> Option<LicenseIdentifier> {
    let path = data_dir.join(KEY_FILE);
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!("Failed to read license key {:?}: {e}", path);
            return None;
        }
    };
    if raw.trim().is_empty() {
        return None;
    }
    match LicenseIdentifier::parse(&raw) {
        Ok(id) => Some(id),
        Err(e) => {
            warn!("Stored license key is unusable: {e}");
            None
        }
    }
}
