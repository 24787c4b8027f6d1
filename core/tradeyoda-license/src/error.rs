//! Error types for the licensing module.

use thiserror::Error;

/// Licensing-specific errors.
#[derive(Debug, Error)]
pub enum LicenseError {
    /// Invalid license key format.
    #[error("invalid license key format: {0}")]
    InvalidKeyFormat(String),

    /// Ed25519 signature on an authority response is missing or wrong.
    #[error("entitlement signature invalid")]
    InvalidSignature,

    /// Authority response is not a well-formed entitlement decision.
    #[error("malformed authority response: {0}")]
    MalformedResponse(String),

    /// Authority returned a decision older than the one already cached.
    #[error("stale authority response issued at {0}")]
    StaleResponse(String),

    /// Network error while contacting the authority.
    #[error("network error: {0}")]
    Network(String),

    /// Authority call did not complete within the configured timeout.
    #[error("authority request timed out")]
    Timeout,

    /// Authority answered with a non-success status.
    #[error("authority returned HTTP {status}")]
    Authority {
        /// HTTP status code.
        status: u16,
    },

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LicenseError {
    /// Returns true if this error came out of an authority call and should
    /// route the validator to its offline fallback instead of a denial.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::InvalidSignature
                | Self::MalformedResponse(_)
                | Self::StaleResponse(_)
                | Self::Network(_)
                | Self::Timeout
                | Self::Authority { .. }
        )
    }
}

/// Result type for license operations.
pub type LicenseResult<T> = Result<T, LicenseError>;
