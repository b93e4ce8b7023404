//! Settings loading with deep merge and environment variable overrides.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::duration::{parse_duration, HumanDuration};
use crate::errors::{Result, SettingsError};
use crate::types::{ClinicalMode, OsceSettings, RouterKind};

/// Resolve the path to the settings file (`~/.osce/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".osce").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<OsceSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<OsceSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

fn load_file_layer(path: &Path) -> Result<OsceSettings> {
    let defaults = serde_json::to_value(OsceSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)
            .map_err(|source| SettingsError::Read { path: path.to_path_buf(), source })?;
        let user: Value = serde_json::from_str(&content)
            .map_err(|source| SettingsError::Parse { path: path.to_path_buf(), source })?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply process environment overrides.
pub fn apply_env_overrides(settings: &mut OsceSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides from an arbitrary lookup. Invalid values are logged and
/// ignored, leaving the file/default value in place.
pub fn apply_overrides_from(settings: &mut OsceSettings, lookup: impl Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };

    // ── Session cache ───────────────────────────────────────────────
    if let Some(v) = env.usize("MAX_SESSIONS", 1, 100_000) {
        settings.session.max_sessions = v;
    }
    if let Some(v) = env.duration("SESSION_TTL") {
        settings.session.ttl = v;
    }
    if let Some(v) = env.duration("SWEEP_INTERVAL") {
        settings.session.sweep_interval = v;
    }

    // ── Generative backend ──────────────────────────────────────────
    if let Some(v) = env.string("GENERATIVE_URL") {
        settings.generative.base_url = Some(v);
    }
    if let Some(v) = env.string("GENERATIVE_MODEL") {
        settings.generative.model = v;
    }
    if let Some(v) = env.string("GENERATIVE_API_KEY") {
        settings.generative.api_key = Some(v);
    }
    if let Some(v) = env.usize("GENERATIVE_MAX_CONCURRENT", 1, 256) {
        settings.generative.max_concurrent = v;
    }
    if let Some(v) = env.u64("GENERATIVE_QUOTA_PER_MINUTE", 1, 100_000) {
        settings.generative.quota_per_minute = v as u32;
    }
    if let Some(v) = env.duration("GENERATIVE_MIN_SPACING") {
        settings.generative.min_spacing = v;
    }
    if let Some(v) = env.duration("GENERATIVE_TIMEOUT") {
        if v.get() >= Duration::from_millis(100) {
            settings.generative.request_timeout = v;
        } else {
            tracing::warn!(key = "GENERATIVE_TIMEOUT", value = %v, "timeout below 100ms, ignoring");
        }
    }

    // ── Engine ──────────────────────────────────────────────────────
    if let Some(v) = env.string("OSCE_ROUTER") {
        match serde_json::from_value::<RouterKind>(Value::String(v.to_lowercase())) {
            Ok(kind) => settings.engine.router = kind,
            Err(_) => tracing::warn!(key = "OSCE_ROUTER", value = %v, "unknown router, ignoring"),
        }
    }
    if let Some(v) = env.string("OSCE_CLINICAL_MODE") {
        match serde_json::from_value::<ClinicalMode>(Value::String(v.to_lowercase())) {
            Ok(mode) => settings.engine.clinical_mode = mode,
            Err(_) => tracing::warn!(key = "OSCE_CLINICAL_MODE", value = %v, "unknown clinical mode, ignoring"),
        }
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("OSCE_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("OSCE_LOG_JSON") {
        settings.logging.json = v;
    }
    if let Some(v) = env.bool("OSCE_AUDIT") {
        settings.logging.audit = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.lookup)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.lookup)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid integer env var, ignoring");
        }
        result
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        let val = (self.lookup)(name)?;
        let result = parse_usize_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid integer env var, ignoring");
        }
        result
    }

    fn duration(&self, name: &str) -> Option<HumanDuration> {
        let val = (self.lookup)(name)?;
        let result = parse_duration(&val).filter(|d| !d.is_zero()).map(HumanDuration);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid duration env var, ignoring");
        }
        result
    }
}
