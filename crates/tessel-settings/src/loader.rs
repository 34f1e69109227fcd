//! Layered settings loading.
//!
//! Compiled defaults, then the user's JSON file merged over them, then
//! `TESSEL_*` environment variables. The file is optional; validation is the
//! caller's job so a host can report every layer before refusing to start.

use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::{LogLevel, TesselSettings};

/// `~/.tessel/settings.json`, or under `/tmp` when `HOME` is unset.
pub fn settings_path() -> PathBuf {
    let home = std::env::var_os("HOME").map_or_else(|| PathBuf::from("/tmp"), PathBuf::from);
    home.join(".tessel").join("settings.json")
}

/// Load from [`settings_path`].
pub fn load_settings() -> Result<TesselSettings> {
    load_settings_from_path(&settings_path())
}

/// Load from `path`, falling back to defaults when the file is absent.
pub fn load_settings_from_path(path: &Path) -> Result<TesselSettings> {
    let mut merged = serde_json::to_value(TesselSettings::default())?;
    match read_user_file(path)? {
        Some(user) => {
            debug!(path = %path.display(), "merging user settings");
            merge_into(&mut merged, user);
        }
        None => debug!(path = %path.display(), "no user settings, using defaults"),
    }
    let mut settings: TesselSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

fn read_user_file(path: &Path) -> Result<Option<Value>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(SettingsError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    Ok(Some(serde_json::from_str(&raw)?))
}

/// Merge `overlay` over `base` and return the result.
///
/// Objects merge key by key, `null` in the overlay keeps the base value, and
/// anything else (arrays included) replaces it.
pub fn deep_merge(mut base: Value, overlay: Value) -> Value {
    merge_into(&mut base, overlay);
    base
}

fn merge_into(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (_, Value::Null) => {}
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(slot) => merge_into(slot, value),
                    None if value.is_null() => {}
                    None => {
                        let _ = base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

type Apply = fn(&mut TesselSettings, &str) -> bool;

/// Environment variables and how each one lands in the settings. An
/// override returns `false` when its value is rejected.
const ENV_OVERRIDES: &[(&str, Apply)] = &[
    ("TESSEL_DEFAULT_MODE", |s, v| {
        s.session.default_mode = Some(v.to_owned());
        true
    }),
    ("TESSEL_RESPAWN_LIMIT", |s, v| {
        parse_bounded(v, 1..=1024).map(|n| s.session.respawn_limit = n).is_some()
    }),
    ("TESSEL_FLUSH_DELAY_MS", |s, v| {
        parse_bounded(v, 0..=60_000).map(|n| s.session.index_flush_delay_ms = n).is_some()
    }),
    ("TESSEL_ENDPOINT", |s, v| {
        s.transport.endpoint = v.to_owned();
        true
    }),
    ("TESSEL_STATIC_BASE_URL", |s, v| {
        s.transport.static_base_url = v.to_owned();
        true
    }),
    ("TESSEL_TIMEOUT_MS", |s, v| {
        parse_bounded(v, 1..=3_600_000).map(|n| s.transport.timeout_ms = n).is_some()
    }),
    ("TESSEL_STORE_PATH", |s, v| {
        s.store.path = Some(v.to_owned());
        true
    }),
    ("TESSEL_LOG_LEVEL", |s, v| {
        parse_log_level(v).map(|level| s.logging.level = level).is_some()
    }),
    ("TESSEL_LOG_JSON", |s, v| {
        v.trim().parse().map(|json| s.logging.json = json).is_ok()
    }),
];

/// Apply every set, non-empty `TESSEL_*` variable. Rejected values are
/// logged and skipped. The mode is copied verbatim; [`TesselSettings::validate`]
/// catches unknown ones.
pub fn apply_env_overrides(settings: &mut TesselSettings) {
    apply_overrides(settings, |name| {
        std::env::var(name).ok().filter(|v| !v.is_empty())
    });
}

fn apply_overrides(settings: &mut TesselSettings, lookup: impl Fn(&str) -> Option<String>) {
    for (name, apply) in ENV_OVERRIDES {
        let Some(value) = lookup(name) else { continue };
        if !apply(settings, &value) {
            warn!(key = name, value = %value, "rejected environment override");
        }
    }
}

/// Parse `val` and accept it only inside `range`.
pub fn parse_bounded<T>(val: &str, range: RangeInclusive<T>) -> Option<T>
where
    T: FromStr + PartialOrd,
{
    val.trim().parse().ok().filter(|n| range.contains(n))
}

/// Log level by name, case-insensitively.
pub fn parse_log_level(val: &str) -> Option<LogLevel> {
    serde_json::from_value(Value::String(val.trim().to_ascii_lowercase())).ok()
}
