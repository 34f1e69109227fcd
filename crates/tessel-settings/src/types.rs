//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and `#[serde(default)]`
//! so a partial settings file only overrides what it names.

use serde::{Deserialize, Serialize};
use tessel_core::Mode;

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "session": { "defaultMode": "SERVER_WAIT" },
///   "transport": { "endpoint": "https://example.test/tessel" }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TesselSettings {
    /// Orchestrator behaviour.
    pub session: SessionSettings,
    /// Remote exchange.
    pub transport: TransportSettings,
    /// Durable local store.
    pub store: StoreSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl TesselSettings {
    /// Check every value a session depends on.
    pub fn validate(&self) -> Result<()> {
        let _ = self.default_mode()?;
        if self.session.respawn_limit == 0 {
            return Err(SettingsError::invalid("session.respawnLimit", "must be at least 1"));
        }
        if self.transport.timeout_ms == 0 {
            return Err(SettingsError::invalid("transport.timeoutMs", "must be at least 1"));
        }
        if self.store.pool_size == 0 {
            return Err(SettingsError::invalid("store.poolSize", "must be at least 1"));
        }
        Ok(())
    }

    /// The configured default mode, parsed.
    pub fn default_mode(&self) -> Result<Option<Mode>> {
        self.session
            .default_mode
            .as_deref()
            .map(|raw| {
                raw.parse::<Mode>()
                    .map_err(|e| SettingsError::invalid("session.defaultMode", e.to_string()))
            })
            .transpose()
    }
}

/// Session orchestration settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// Mode used when an interaction names none.
    pub default_mode: Option<String>,
    /// Maximum chain of respawns triggered by overlapping interactions.
    pub respawn_limit: u32,
    /// Delay before the coalesced version-index flush (0 = next scheduler turn).
    pub index_flush_delay_ms: u64,
    /// CSS class placed on a component's container while a blocking exchange runs.
    pub pending_class: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            default_mode: Some(Mode::Server.as_str().to_string()),
            respawn_limit: 8,
            index_flush_delay_ms: 0,
            pending_class: "tessel-pending".to_string(),
        }
    }
}

/// Remote exchange settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransportSettings {
    /// Exchange endpoint (POST).
    pub endpoint: String,
    /// Base URL for static templates (`<base>/<component>.json`). Empty disables.
    pub static_base_url: String,
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:4000/tessel".to_string(),
            static_base_url: String::new(),
            timeout_ms: 30_000,
        }
    }
}

/// Durable local store settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSettings {
    /// `SQLite` file path. `None` keeps the store in memory.
    pub path: Option<String>,
    /// Connection pool size.
    pub pool_size: u32,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            path: None,
            pool_size: 4,
        }
    }
}

/// Least severe event a host writes out.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Everything, including per-slot patch events.
    Trace,
    /// State-machine transitions.
    Debug,
    /// Session lifecycle.
    #[default]
    Info,
    /// Dropped or abandoned work.
    Warn,
    /// Failures only.
    Error,
}

impl LogLevel {
    /// `EnvFilter` directive for this level.
    pub fn directive(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Filter applied when `RUST_LOG` is unset.
    pub level: LogLevel,
    /// One JSON object per event instead of compact text.
    pub json: bool,
}
