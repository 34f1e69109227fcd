//! Interaction modes.
//!
//! A [`Mode`] decides whether an interaction is served locally or round-trips
//! to the remote store, and whether the UI waits for the round-trip.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Strategy governing whether and how an interaction consults the remote store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mode {
    /// Local-only re-render with the variables currently held.
    #[default]
    Csr,
    /// Local-only; templates must come from the static location.
    CsrOnly,
    /// Optimistic: local re-render now, remote round-trip in the background.
    Server,
    /// Blocking: nothing renders until the remote round-trip resolves.
    ServerWait,
    /// Remote round-trip that also asks for fully rendered markup.
    Ssr,
}

impl Mode {
    /// Every mode, in declaration order.
    pub const ALL: [Mode; 5] = [
        Mode::Csr,
        Mode::CsrOnly,
        Mode::Server,
        Mode::ServerWait,
        Mode::Ssr,
    ];

    /// Whether this mode performs a remote exchange for component state.
    pub fn is_remote(self) -> bool {
        matches!(self, Self::Server | Self::ServerWait | Self::Ssr)
    }

    /// Wire name of the mode.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Csr => "CSR",
            Self::CsrOnly => "CSR_ONLY",
            Self::Server => "SERVER",
            Self::ServerWait => "SERVER_WAIT",
            Self::Ssr => "SSR",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string does not name a known [`Mode`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid mode: {0}")]
pub struct ParseModeError(pub String);

impl FromStr for Mode {
    type Err = ParseModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| ParseModeError(s.to_owned()))
    }
}
