//! Settings errors.

use std::path::PathBuf;

use thiserror::Error;

/// Why settings could not be produced.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("cannot read {}: {source}", path.display())]
    Read {
        /// File that was being read.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The file, or the merged result, is not valid settings JSON.
    #[error("malformed settings: {0}")]
    Malformed(#[from] serde_json::Error),

    /// A value parsed but is out of range or unknown.
    #[error("{field}: {reason}")]
    Invalid {
        /// Dotted camelCase path of the offending value.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

impl SettingsError {
    /// Shorthand for [`SettingsError::Invalid`].
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }

    /// The offending field, for validation failures.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            Self::Invalid { field, .. } => Some(field),
            Self::Read { .. } | Self::Malformed(_) => None,
        }
    }
}

/// Result alias for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;
