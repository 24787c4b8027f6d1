//! Licensing and entitlements for TradeYoda.
//!
//! This crate decides whether a (possibly offline) installation may operate
//! and which features its subscription tier unlocks:
//! - License identifier validation and device fingerprinting
//! - Online validation against the entitlement authority
//! - A local trust cache with an offline grace period
//! - A capability gate consumed by the trading and UI components
//!
//! # Design Principles
//!
//! - **Fail closed**: anything not positively validated grants nothing
//! - **Authoritative denials win**: an explicit `valid: false` wipes the cache
//! - **Bounded offline trust**: the cache is honoured only within the grace period
//! - **Device binding**: a cache copied to another installation is ignored
//!
//! The validator is single-shot; the host drives cadence with
//! [`spawn_revalidation`].

mod authority;
mod cache;
mod clock;
mod config;
mod device;
mod entitlement;
mod error;
mod gate;
mod identifier;
mod schedule;
mod validator;

pub use authority::{
    EntitlementAuthority, SIGNATURE_HEADER, VALIDATE_PATH, parse_response, verify_signature,
};
pub use cache::{CACHE_FILE, CACHE_FORMAT_VERSION, CacheEntry, TrustCache};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{
    DEFAULT_AUTHORITY_URL, DEFAULT_OFFLINE_GRACE_SECS, DEFAULT_REQUEST_TIMEOUT_SECS,
    DEFAULT_REVALIDATION_SECS, LicenseConfig,
};
pub use device::{DEVICE_FILE, DeviceFingerprint};
pub use entitlement::{
    AuthorityRequest, AuthorityResponse, Capabilities, CapabilityValue, EntitlementRecord, Tier,
};
pub use error::{LicenseError, LicenseResult};
pub use gate::{
    CapabilitySurface, LicenseNotice, NO_TIER, ValidatorState, capability_surface, names,
};
pub use identifier::{KEY_PREFIX, LicenseIdentifier};
pub use schedule::{RevalidationHandle, spawn_revalidation};
pub use validator::{KEY_FILE, LicenseValidator, ValidationOutcome};

#[cfg(feature = "online")]
pub use authority::HttpAuthority;
