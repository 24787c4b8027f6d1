//! Entitlement data model and the authority wire format.
//!
//! The authority answers with loosely shaped JSON. [`AuthorityResponse`] is
//! the only place that shape is accepted; it is converted into a strictly
//! typed [`EntitlementRecord`] or rejected as malformed.

use crate::error::{LicenseError, LicenseResult};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Subscription tier. Declaration order is the tier order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Tier {
    /// Time-limited evaluation.
    Trial,
    /// Entry paid tier.
    Basic,
    /// Mid paid tier.
    Advanced,
    /// Top paid tier.
    Pro,
}

impl Tier {
    /// All tiers, lowest first.
    pub const ALL: [Tier; 4] = [Tier::Trial, Tier::Basic, Tier::Advanced, Tier::Pro];

    /// Returns the wire name of the tier.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trial => "TRIAL",
            Self::Basic => "BASIC",
            Self::Advanced => "ADVANCED",
            Self::Pro => "PRO",
        }
    }

    /// Returns true if this tier is `other` or higher.
    #[must_use]
    pub fn at_least(&self, other: Tier) -> bool {
        *self >= other
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = LicenseError;

    fn from_str(s: &str) -> LicenseResult<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| LicenseError::MalformedResponse(format!("unknown tier `{s}`")))
    }
}

/// A single capability value: a feature toggle or a provisioned string
/// (model name, proxied key, support level).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CapabilityValue {
    /// Feature toggle.
    Flag(bool),
    /// Tier-scoped provisioned value.
    Text(String),
}

impl CapabilityValue {
    /// Returns the flag value, or `None` for text values.
    #[must_use]
    pub fn as_flag(&self) -> Option<bool> {
        match self {
            Self::Flag(b) => Some(*b),
            Self::Text(_) => None,
        }
    }

    /// Returns the text value, or `None` for flags.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Flag(_) => None,
            Self::Text(s) => Some(s),
        }
    }
}

impl From<bool> for CapabilityValue {
    fn from(b: bool) -> Self {
        Self::Flag(b)
    }
}

impl From<&str> for CapabilityValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

/// Capability name to value. Ordered so serialized records are canonical.
pub type Capabilities = BTreeMap<String, CapabilityValue>;

/// An authoritative entitlement decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitlementRecord {
    /// Subscription tier. Meaningless unless `valid`.
    pub tier: Tier,
    /// Whether the license is currently usable.
    pub valid: bool,
    /// Expiry, or `None` for non-expiring licenses.
    pub expires_at: Option<DateTime<Utc>>,
    /// Capability bundle. Meaningless unless `valid`.
    pub capabilities: Capabilities,
    /// When the authority produced this decision.
    pub issued_at: DateTime<Utc>,
}

impl EntitlementRecord {
    /// Returns true if the record carries an expiry at or before `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }
}

/// Request body sent to the authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorityRequest {
    /// License identifier.
    pub license_key: String,
    /// Device fingerprint ID.
    pub device_id: String,
}

/// Raw authority response. Extra fields the server sends are ignored.
///
/// Only `valid` is typed at this stage; the rest is interpreted by
/// [`AuthorityResponse::into_record`] once the decision is known.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthorityResponse {
    valid: bool,
    #[serde(default)]
    tier: Option<Value>,
    #[serde(default)]
    expires_at: Option<Value>,
    #[serde(default)]
    capabilities: Option<Value>,
    #[serde(default)]
    issued_at: Option<Value>,
}

impl AuthorityResponse {
    /// Parses a response body.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::MalformedResponse`] for bodies that are not
    /// JSON objects with a boolean `valid`.
    pub fn from_slice(body: &[u8]) -> LicenseResult<Self> {
        serde_json::from_slice(body)
            .map_err(|e| LicenseError::MalformedResponse(format!("invalid body: {e}")))
    }

    /// Converts the response into a typed record. `now` is the receipt time.
    ///
    /// A denial is accepted whatever else it carries: its tier and
    /// timestamps are kept when readable, its capabilities are dropped. A
    /// grant must name a known tier; a missing `issued_at` defaults to `now`.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::MalformedResponse`] when a grant's fields are
    /// missing or unparseable.
    pub fn into_record(self, now: DateTime<Utc>) -> LicenseResult<EntitlementRecord> {
        if !self.valid {
            return Ok(self.into_denial(now));
        }

        let tier: Tier = match self.tier {
            Some(Value::String(t)) => t.parse()?,
            Some(Value::Null) | None => {
                return Err(LicenseError::MalformedResponse(
                    "missing field `tier`".to_string(),
                ));
            }
            Some(other) => {
                return Err(LicenseError::MalformedResponse(format!(
                    "invalid tier `{other}`"
                )));
            }
        };
        let expires_at = optional_timestamp("expires_at", self.expires_at)?;
        let issued_at = optional_timestamp("issued_at", self.issued_at)?.unwrap_or(now);
        let capabilities = match self.capabilities {
            Some(Value::Null) | None => Capabilities::new(),
            Some(value) => serde_json::from_value(value).map_err(|e| {
                LicenseError::MalformedResponse(format!("invalid capabilities: {e}"))
            })?,
        };

        Ok(EntitlementRecord {
            tier,
            valid: true,
            expires_at,
            capabilities,
            issued_at,
        })
    }

    fn into_denial(self, now: DateTime<Utc>) -> EntitlementRecord {
        let readable = |field, v| optional_timestamp(field, v).ok().flatten();
        let tier = match &self.tier {
            Some(Value::String(t)) => t.parse().unwrap_or(Tier::Trial),
            _ => Tier::Trial,
        };
        EntitlementRecord {
            tier,
            valid: false,
            expires_at: readable("expires_at", self.expires_at),
            capabilities: Capabilities::new(),
            issued_at: readable("issued_at", self.issued_at).unwrap_or(now),
        }
    }
}

fn optional_timestamp(field: &str, value: Option<Value>) -> LicenseResult<Option<DateTime<Utc>>> {
    match value {
        Some(Value::Null) | None => Ok(None),
        Some(Value::String(s)) => parse_timestamp(&s).map(Some),
        Some(other) => Err(LicenseError::MalformedResponse(format!(
            "invalid `{field}`: {other}"
        ))),
    }
}

/// Parses RFC 3339, or a naive ISO-8601 timestamp interpreted as UTC.
pub(crate) fn parse_timestamp(s: &str) -> LicenseResult<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| LicenseError::MalformedResponse(format!("invalid timestamp `{s}`: {e}")))
}
