//! Capability gate: maps a validation result onto the feature surface the
//! trading and UI components consume.

use crate::entitlement::{Capabilities, CapabilityValue, EntitlementRecord, Tier};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Well-known capability names issued by the licensing server.
pub mod names {
    /// Technical zone analysis.
    pub const ZONE_ANALYSIS: &str = "zone_analysis";
    /// Manually confirmed order placement.
    pub const MANUAL_TRADING: &str = "manual_trading";
    /// Unattended order placement.
    pub const AUTO_TRADING: &str = "auto_trading";
    /// Model used for trade scoring.
    pub const OPENAI_MODEL: &str = "openai_model";
    /// Support plan label.
    pub const SUPPORT_LEVEL: &str = "support_level";
}

/// Tier label shown when nothing is granted.
pub const NO_TIER: &str = "NONE";

/// Outcome of a single validation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidatorState {
    /// No license configured, or no usable cache for this device.
    NoLicense,
    /// A validation is in flight.
    Checking,
    /// The authority confirmed the license during this attempt.
    ValidFresh,
    /// The authority was unreachable; a cached entitlement within grace is in use.
    ValidCached,
    /// Authoritative denial, or the offline grace period ran out.
    Invalid,
    /// The authority reported a license whose expiry has passed.
    Expired,
}

impl ValidatorState {
    /// Returns true for the two states that grant capabilities.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::ValidFresh | Self::ValidCached)
    }
}

impl fmt::Display for ValidatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NoLicense => "NO_LICENSE",
            Self::Checking => "CHECKING",
            Self::ValidFresh => "VALID_FRESH",
            Self::ValidCached => "VALID_CACHED",
            Self::Invalid => "INVALID",
            Self::Expired => "EXPIRED",
        };
        f.write_str(s)
    }
}

/// The capabilities granted to the rest of the application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySurface {
    /// Tier label for display, or [`NO_TIER`].
    pub tier: String,
    /// Granted capabilities. Empty when denied.
    pub capabilities: Capabilities,
    /// State the surface was derived from.
    pub state: ValidatorState,
}

impl CapabilitySurface {
    /// The surface for every non-valid state.
    #[must_use]
    pub fn denied(state: ValidatorState) -> Self {
        Self {
            tier: NO_TIER.to_string(),
            capabilities: Capabilities::new(),
            state,
        }
    }

    /// Returns true if `name` is granted as an enabled flag.
    #[must_use]
    pub fn is_enabled(&self, name: &str) -> bool {
        self.capabilities
            .get(name)
            .and_then(CapabilityValue::as_flag)
            .unwrap_or(false)
    }

    /// Returns the granted value for `name`.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<&CapabilityValue> {
        self.capabilities.get(name)
    }

    /// Returns true if the granted tier is `tier` or higher.
    #[must_use]
    pub fn tier_at_least(&self, tier: Tier) -> bool {
        self.tier.parse::<Tier>().is_ok_and(|t| t.at_least(tier))
    }
}

/// Maps a validator state and its record onto a capability surface.
///
/// Only `VALID_FRESH` and `VALID_CACHED` with a `valid` record grant
/// anything; every other combination yields the denied surface.
#[must_use]
pub fn capability_surface(
    state: ValidatorState,
    record: Option<&EntitlementRecord>,
) -> CapabilitySurface {
    match record {
        Some(record) if state.is_valid() && record.valid => CapabilitySurface {
            tier: record.tier.as_str().to_string(),
            capabilities: record.capabilities.clone(),
            state,
        },
        _ => CapabilitySurface::denied(state),
    }
}

/// User-facing license message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LicenseNotice {
    /// Licensed, fresh or cached within grace.
    Licensed,
    /// Authority unreachable; running on the cache until `until`.
    Offline {
        /// End of the offline grace period.
        until: DateTime<Utc>,
    },
    /// Authoritative denial; the user has to act.
    Denied {
        /// True when the denial is due to expiry.
        expired: bool,
    },
    /// No license activated on this device.
    NotActivated,
    /// A validation is running.
    Checking,
}

impl fmt::Display for LicenseNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Licensed => f.write_str("licensed"),
            Self::Offline { until } => write!(
                f,
                "unable to reach license server, operating offline until {}",
                until.format("%Y-%m-%d %H:%M UTC")
            ),
            Self::Denied { expired: true } => f.write_str("license expired"),
            Self::Denied { expired: false } => f.write_str("license invalid"),
            Self::NotActivated => f.write_str("no license activated"),
            Self::Checking => f.write_str("checking license"),
        }
    }
}
