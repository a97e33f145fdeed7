//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`HubSettings::default()`]
//! 2. If a settings file is given and exists, deep-merge its values over defaults
//! 3. Apply `COLLAB_*` environment variable overrides (highest priority)
//! 4. Validate the result

use std::path::Path;
use std::str::FromStr;

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::HubSettings;

/// Load settings from an optional file with env var overrides.
pub fn load_settings(path: Option<&Path>) -> Result<HubSettings> {
    load_settings_with(path, |name| std::env::var(name).ok())
}

/// Load settings, reading overrides through `lookup` instead of the
/// process environment. A missing file yields defaults; invalid JSON is an
/// error.
pub fn load_settings_with(
    path: Option<&Path>,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<HubSettings> {
    let defaults = serde_json::to_value(HubSettings::default())?;

    let merged = match path {
        Some(path) if path.exists() => {
            debug!(?path, "loading settings from file");
            let content = std::fs::read_to_string(path)?;
            let file: Value = serde_json::from_str(&content)?;
            deep_merge(defaults, file)
        }
        Some(path) => {
            debug!(?path, "settings file not found, using defaults");
            defaults
        }
        None => defaults,
    };

    let mut settings: HubSettings = serde_json::from_value(merged)?;
    apply_overrides_from(&mut settings, lookup);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
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

/// Apply overrides read through `lookup`.
///
/// Values that fail to parse or fall outside their range are ignored with a
/// warning, leaving the file/default value in place.
pub fn apply_overrides_from(settings: &mut HubSettings, lookup: impl Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("COLLAB_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.ranged("COLLAB_PORT", 0u16, u16::MAX) {
        settings.server.port = v;
    }
    if let Some(v) = env.string("COLLAB_ALLOWED_ORIGINS") {
        settings.server.allowed_origins = v
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect();
    }

    // ── WebSocket ───────────────────────────────────────────────────
    if let Some(v) = env.ranged("COLLAB_MAILBOX_CAPACITY", 1, 1_000_000) {
        settings.websocket.mailbox_capacity = v;
    }
    if let Some(v) = env.ranged("COLLAB_MAX_MESSAGE_BYTES", 128, 16 * 1024 * 1024) {
        settings.websocket.max_message_bytes = v;
    }
    if let Some(v) = env.ranged("COLLAB_MAX_USERS_PER_ROOM", 1, 100_000) {
        settings.websocket.max_users_per_room = v;
    }

    // ── Heartbeat ───────────────────────────────────────────────────
    if let Some(v) = env.ranged("COLLAB_SWEEP_INTERVAL_MS", 100, 3_600_000) {
        settings.heartbeat.sweep_interval_ms = v;
    }
    if let Some(v) = env.ranged("COLLAB_IDLE_TIMEOUT_MS", 100, 86_400_000) {
        settings.heartbeat.idle_timeout_ms = v;
    }
    if let Some(v) = env.ranged("COLLAB_PING_INTERVAL_MS", 100, 3_600_000) {
        settings.heartbeat.ping_interval_ms = v;
    }

    // ── Rate limit ──────────────────────────────────────────────────
    if let Some(v) = env.ranged("COLLAB_RATE_LIMIT_MAX", 1u32, 1_000_000) {
        settings.rate_limit.max_messages = v;
    }
    if let Some(v) = env.ranged("COLLAB_RATE_LIMIT_WINDOW_MS", 1, 3_600_000) {
        settings.rate_limit.window_ms = v;
    }

    // ── Auth ────────────────────────────────────────────────────────
    if let Some(v) = env.string("COLLAB_JWT_SECRET") {
        settings.auth.jwt_secret = v;
    }
    if let Some(v) = env.bool("COLLAB_AUTH_REQUIRED") {
        settings.auth.required = v;
    }

    // ── Publisher ───────────────────────────────────────────────────
    if let Some(v) = env.string("COLLAB_WEBHOOK_URL") {
        settings.publisher.webhook_url = Some(v);
    }
    if let Some(v) = env.ranged("COLLAB_PUBLISHER_QUEUE", 1, 1_000_000) {
        settings.publisher.queue_capacity = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("COLLAB_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("COLLAB_LOG_JSON") {
        settings.logging.json = v;
    }
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

/// Parse a number and keep it only if it lies within `min..=max`.
pub fn parse_range<T: FromStr + PartialOrd>(val: &str, min: T, max: T) -> Option<T> {
    let n: T = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env readers ─────────────────────────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn raw(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn string(&self, name: &str) -> Option<String> {
        self.raw(name)
    }

    fn parsed<T>(&self, name: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
        let val = self.raw(name)?;
        let result = parse(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid env var, ignoring");
        }
        result
    }

    fn bool(&self, name: &str) -> Option<bool> {
        self.parsed(name, parse_bool)
    }

    fn ranged<T: FromStr + PartialOrd + Copy>(&self, name: &str, min: T, max: T) -> Option<T> {
        self.parsed(name, |v| parse_range(v, min, max))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;
    use crate::errors::SettingsError;
    use assert_matches::assert_matches;

    fn overrides(pairs: &[(&str, &str)]) -> HubSettings {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        let mut settings = HubSettings::default();
        apply_overrides_from(&mut settings, |name| vars.get(name).cloned());
        settings
    }

    fn write_settings(json: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"server": {"port": 8083, "host": "0.0.0.0"}});
        let source = serde_json::json!({"server": {"port": 9090}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9090);
        assert_eq!(merged["server"]["host"], "0.0.0.0");
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"allowedOrigins": ["*"]});
        let source = serde_json::json!({"allowedOrigins": ["https://a", "https://b"]});
        let merged = deep_merge(target, source);
        assert_eq!(merged["allowedOrigins"], serde_json::json!(["https://a", "https://b"]));
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"a": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let target = serde_json::json!({"a": {"nested": true}});
        let source = serde_json::json!({"a": 42});
        assert_eq!(deep_merge(target, source)["a"], 42);
    }

    // ── load_settings_with ──────────────────────────────────────────

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let settings = load_settings_with(Some(&path), |name| {
            (name == "COLLAB_JWT_SECRET").then(|| "s".to_owned())
        })
        .unwrap();
        assert_eq!(settings.server.port, 8083);
        assert_eq!(settings.auth.jwt_secret, "s");
    }

    #[test]
    fn load_defaults_without_secret_fail_validation() {
        assert_matches!(load_settings_with(None, no_env), Err(SettingsError::InvalidValue(_)));
    }

    #[test]
    fn load_merges_file_over_defaults() {
        let file = write_settings(
            r#"{"auth": {"jwtSecret": "s3cret"}, "websocket": {"maxUsersPerRoom": 3}}"#,
        );
        let settings = load_settings_with(Some(file.path()), no_env).unwrap();
        assert_eq!(settings.websocket.max_users_per_room, 3);
        assert_eq!(settings.websocket.mailbox_capacity, 256);
        assert_eq!(settings.server.port, 8083);
    }

    #[test]
    fn env_wins_over_file() {
        let file = write_settings(r#"{"auth": {"jwtSecret": "file"}, "server": {"port": 7000}}"#);
        let settings = load_settings_with(Some(file.path()), |name| {
            (name == "COLLAB_PORT").then(|| "7001".to_owned())
        })
        .unwrap();
        assert_eq!(settings.server.port, 7001);
        assert_eq!(settings.auth.jwt_secret, "file");
    }

    #[test]
    fn load_invalid_json_is_error() {
        let file = write_settings("{not json");
        assert_matches!(load_settings_with(Some(file.path()), no_env), Err(SettingsError::Json(_)));
    }

    #[test]
    fn load_rejects_invalid_values() {
        let file = write_settings(r#"{"auth": {"jwtSecret": "x"}, "websocket": {"mailboxCapacity": 0}}"#);
        assert_matches!(
            load_settings_with(Some(file.path()), no_env),
            Err(SettingsError::InvalidValue(_))
        );
    }

    // ── env overrides ───────────────────────────────────────────────

    #[test]
    fn env_overrides_apply() {
        let s = overrides(&[
            ("COLLAB_PORT", "9000"),
            ("COLLAB_JWT_SECRET", "abc"),
            ("COLLAB_AUTH_REQUIRED", "off"),
            ("COLLAB_MAX_USERS_PER_ROOM", "2"),
            ("COLLAB_ALLOWED_ORIGINS", "https://a.test, https://b.test"),
            ("COLLAB_WEBHOOK_URL", "http://bus/events"),
            ("COLLAB_RATE_LIMIT_MAX", "5"),
        ]);
        assert_eq!(s.server.port, 9000);
        assert_eq!(s.auth.jwt_secret, "abc");
        assert!(!s.auth.required);
        assert_eq!(s.websocket.max_users_per_room, 2);
        assert_eq!(s.server.allowed_origins, vec!["https://a.test", "https://b.test"]);
        assert_eq!(s.publisher.webhook_url.as_deref(), Some("http://bus/events"));
        assert_eq!(s.rate_limit.max_messages, 5);
    }

    #[test]
    fn env_invalid_values_ignored() {
        let s = overrides(&[
            ("COLLAB_PORT", "not-a-port"),
            ("COLLAB_MAX_USERS_PER_ROOM", "0"),
            ("COLLAB_AUTH_REQUIRED", "maybe"),
        ]);
        assert_eq!(s.server.port, 8083);
        assert_eq!(s.websocket.max_users_per_room, 100);
        assert!(s.auth.required);
    }

    #[test]
    fn env_empty_values_ignored() {
        let s = overrides(&[("COLLAB_HOST", "")]);
        assert_eq!(s.server.host, "0.0.0.0");
    }

    // ── parsers ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        assert_eq!(parse_bool("YES"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("nope"), None);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_range("80", 1u16, u16::MAX), Some(80));
        assert_eq!(parse_range("0", 1u16, u16::MAX), None);
        assert_eq!(parse_range("70000", 1u16, u16::MAX), None);
        assert_eq!(parse_range("5", 10u64, 20), None);
        assert_eq!(parse_range("15", 10usize, 20), Some(15));
        assert_eq!(parse_range::<usize>("-1", 0, 20), None);
    }
}
