//! Error types for GRIB2 decoding.

use thiserror::Error;

/// Result type alias using Grib2Error.
pub type Result<T> = std::result::Result<T, Grib2Error>;

/// Errors raised while scanning, parsing or unpacking GRIB2 messages.
#[derive(Debug, Error)]
pub enum Grib2Error {
    #[error("Invalid GRIB2 format: {0}")]
    InvalidFormat(String),

    #[error("Invalid section {section}: {reason}")]
    InvalidSection { section: u8, reason: String },

    #[error("Truncated message at offset {offset}: declared {declared} bytes, {available} available")]
    Truncated {
        offset: usize,
        declared: usize,
        available: usize,
    },

    #[error("Unsupported template {template} in section {section}")]
    UnsupportedTemplate { section: u8, template: u16 },

    #[error("Unpacking error: {0}")]
    UnpackingError(String),
}

impl Grib2Error {
    /// Whether the rest of the buffer is unusable. Other errors concern a
    /// single message and later messages can still be read.
    pub fn is_truncation(&self) -> bool {
        matches!(self, Grib2Error::Truncated { .. })
    }

    pub(crate) fn section(section: u8, reason: impl Into<String>) -> Self {
        Grib2Error::InvalidSection {
            section,
            reason: reason.into(),
        }
    }
}
