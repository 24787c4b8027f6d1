//! License identifier parsing.
//!
//! Identifiers are issued by the licensing server in the form
//! `TYODA-XXXX-XXXX-XXXX-XXXX`. The core only checks the shape; whether the
//! identifier is actually valid is decided by the authority.

use crate::error::{LicenseError, LicenseResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix of every identifier issued by the licensing server.
pub const KEY_PREFIX: &str = "TYODA";

const GROUP_COUNT: usize = 4;
const GROUP_LEN: usize = 4;

/// A format-validated license identifier.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LicenseIdentifier(String);

impl LicenseIdentifier {
    /// Parses and normalises an identifier.
    ///
    /// Surrounding whitespace is trimmed and letters are upper-cased.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::InvalidKeyFormat`] if the string is not five
    /// dash-separated groups starting with `TYODA`.
    pub fn parse(raw: &str) -> LicenseResult<Self> {
        let key = raw.trim().to_ascii_uppercase();
        if key.is_empty() {
            return Err(LicenseError::InvalidKeyFormat("key is empty".to_string()));
        }

        let parts: Vec<&str> = key.split('-').collect();
        if parts.len() != GROUP_COUNT + 1 {
            return Err(LicenseError::InvalidKeyFormat(format!(
                "expected {} dash-separated groups, found {}",
                GROUP_COUNT + 1,
                parts.len()
            )));
        }

        if parts[0] != KEY_PREFIX {
            return Err(LicenseError::InvalidKeyFormat(format!(
                "key must start with {KEY_PREFIX}"
            )));
        }

        for group in &parts[1..] {
            if group.len() != GROUP_LEN || !group.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err(LicenseError::InvalidKeyFormat(format!(
                    "group `{group}` must be {GROUP_LEN} alphanumeric characters"
                )));
            }
        }

        Ok(Self(key))
    }

    /// Returns the identifier string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the identifier with all but the last group hidden, for logs.
    #[must_use]
    pub fn masked(&self) -> String {
        let last = self.0.rsplit('-').next().unwrap_or_default();
        format!("{KEY_PREFIX}-****-****-****-{last}")
    }
}

impl TryFrom<String> for LicenseIdentifier {
    type Error = LicenseError;

    fn try_from(value: String) -> LicenseResult<Self> {
        Self::parse(&value)
    }
}

impl From<LicenseIdentifier> for String {
    fn from(id: LicenseIdentifier) -> Self {
        id.0
    }
}

impl fmt::Display for LicenseIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Debug goes to logs; keep the full key out of them.
impl fmt::Debug for LicenseIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LicenseIdentifier").field(&self.masked()).finish()
    }
}
