//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`ParleySettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `PARLEY_*` environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::{parley_home, ParleySettings};

/// Resolve the settings file: `PARLEY_SETTINGS` if set, else `~/.parley/settings.json`.
pub fn settings_path() -> PathBuf {
    read_env_string("PARLEY_SETTINGS")
        .map(PathBuf::from)
        .unwrap_or_else(|| parley_home().join("settings.json"))
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<ParleySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; a file with invalid JSON is an error.
/// The result is validated before it is returned.
pub fn load_settings_from_path(path: &Path) -> Result<ParleySettings> {
    let defaults = serde_json::to_value(ParleySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: ParleySettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply process environment overrides to loaded settings.
pub fn apply_env_overrides(settings: &mut ParleySettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides from an arbitrary variable source.
///
/// Invalid values are ignored with a warning and the file/default value is kept.
pub fn apply_overrides<F>(settings: &mut ParleySettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = read_with(&lookup, "PARLEY_HOST", |v| Some(v.to_string())) {
        settings.server.host = v;
    }
    if let Some(v) = read_with(&lookup, "PARLEY_PORT", |v| parse_u16_range(v, 0, 65535)) {
        settings.server.port = v;
    }
    if let Some(v) =
        read_with(&lookup, "PARLEY_MAX_SEND_QUEUE", |v| parse_usize_range(v, 1, 65_536))
    {
        settings.server.max_send_queue = v;
    }
    if let Some(v) =
        read_with(&lookup, "PARLEY_HEARTBEAT_INTERVAL", |v| parse_u64_range(v, 1, 3600))
    {
        settings.server.heartbeat_interval_secs = v;
    }
    if let Some(v) =
        read_with(&lookup, "PARLEY_HEARTBEAT_TIMEOUT", |v| parse_u64_range(v, 1, 86_400))
    {
        settings.server.heartbeat_timeout_secs = v;
    }

    // ── Auth ────────────────────────────────────────────────────────
    if let Some(v) = read_with(&lookup, "PARLEY_JWT_SECRET", |v| Some(v.to_string())) {
        settings.auth.jwt_secret = v;
    }
    if let Some(v) =
        read_with(&lookup, "PARLEY_TOKEN_TTL", |v| parse_u64_range(v, 60, 30 * 86_400))
    {
        settings.auth.token_ttl_secs = v;
    }

    // ── Storage / logging ───────────────────────────────────────────
    if let Some(v) = read_with(&lookup, "PARLEY_DB", |v| Some(PathBuf::from(v))) {
        settings.database.path = v;
    }
    if let Some(v) = read_with(&lookup, "PARLEY_LOG_JSON", parse_bool) {
        settings.logging.json = v;
    }
    if let Some(v) = read_with(&lookup, "PARLEY_SEED_DEMO_USERS", parse_bool) {
        settings.seed_demo_users = v;
    }
}

/// Read one variable and parse it, warning when it is set but unusable.
fn read_with<F, P, T>(lookup: &F, name: &str, parse: P) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    P: Fn(&str) -> Option<T>,
{
    let val = lookup(name).filter(|v| !v.is_empty())?;
    let result = parse(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid env override, ignoring");
    }
    result
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}
