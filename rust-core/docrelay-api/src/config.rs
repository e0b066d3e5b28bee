// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Service configuration read from `DOCRELAY_*` environment variables.

use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use docrelay_broker::IntakeConfig;
use docrelay_store::StoreConfig;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Everything the `docrelay` binary needs to start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
    /// Default lifetime of cached results, in seconds
    pub cache_ttl_secs: u64,
    /// Page size for paginated `getAll` without a limit
    pub page_limit: u64,
    /// Upper bound on one intake batch
    pub max_messages: usize,
    pub visibility_timeout_secs: u64,
    /// Long-poll wait per receive, in seconds
    pub wait_time_secs: u64,
    pub auth_enabled: bool,
    /// `(label, key)` pairs accepted when auth is enabled
    #[serde(skip_serializing)]
    pub api_keys: Vec<(String, String)>,
    /// Completion webhook target
    pub webhook_url: Option<String>,
    /// Emit logs as JSON lines
    pub log_json: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            cache_ttl_secs: 300,
            page_limit: 10,
            max_messages: 10,
            visibility_timeout_secs: 30,
            wait_time_secs: 20,
            auth_enabled: false,
            api_keys: Vec::new(),
            webhook_url: None,
            log_json: false,
        }
    }
}

impl ServiceConfig {
    /// Read from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read through `lookup`; unset variables keep their defaults, and
    /// unparseable ones are reported and ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let read = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let api_keys = read("DOCRELAY_API_KEYS").map(|raw| parse_api_keys(&raw)).unwrap_or_default();

        Self {
            host: read("DOCRELAY_HOST").unwrap_or(defaults.host),
            port: parsed(&read, "DOCRELAY_PORT", defaults.port),
            cache_ttl_secs: positive(parsed(&read, "DOCRELAY_CACHE_TTL_SECS", defaults.cache_ttl_secs), defaults.cache_ttl_secs),
            page_limit: positive(parsed(&read, "DOCRELAY_PAGE_LIMIT", defaults.page_limit), defaults.page_limit),
            max_messages: parsed(&read, "DOCRELAY_MAX_MESSAGES", defaults.max_messages).max(1),
            visibility_timeout_secs: parsed(&read, "DOCRELAY_VISIBILITY_TIMEOUT_SECS", defaults.visibility_timeout_secs),
            wait_time_secs: parsed(&read, "DOCRELAY_WAIT_TIME_SECS", defaults.wait_time_secs),
            auth_enabled: flag(&read, "DOCRELAY_AUTH_ENABLED", defaults.auth_enabled),
            api_keys,
            webhook_url: read("DOCRELAY_WEBHOOK_URL"),
            log_json: flag(&read, "DOCRELAY_LOG_JSON", defaults.log_json),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            default_page_limit: self.page_limit,
        }
    }

    pub fn intake_config(&self) -> IntakeConfig {
        IntakeConfig {
            max_messages: self.max_messages,
            wait_time: Duration::from_secs(self.wait_time_secs),
            ..IntakeConfig::default()
        }
    }
}

fn parsed<T>(read: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr,
    T::Err: Display,
{
    match read(key) {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|err| {
            warn!(key, value = %raw, error = %err, "invalid configuration value, using default");
            default
        }),
    }
}

fn positive(value: u64, default: u64) -> u64 {
    if value == 0 {
        default
    } else {
        value
    }
}

fn flag(read: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> bool {
    match read(key).map(|v| v.to_ascii_lowercase()) {
        None => default,
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => true,
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => false,
        Some(v) => {
            warn!(key, value = %v, "invalid boolean, using default");
            default
        }
    }
}

/// Parse `label:key,label:key`. A bare `key` gets its position as label.
pub fn parse_api_keys(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .enumerate()
        .filter_map(|(n, entry)| match entry.split_once(':') {
            Some((label, key)) if !key.trim().is_empty() => Some((label.trim().to_string(), key.trim().to_string())),
            Some(_) => {
                warn!(entry = n, "API key entry has an empty key, skipping");
                None
            }
            None => Some((format!("key-{n}"), entry.to_string())),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        assert_eq!(ServiceConfig::from_lookup(|_| None), ServiceConfig::default());
        assert_eq!(ServiceConfig::default().bind_addr(), "0.0.0.0:8080");
    }

    #[test]
    fn test_reads_every_variable() {
        let config = ServiceConfig::from_lookup(lookup(&[
            ("DOCRELAY_HOST", "127.0.0.1"),
            ("DOCRELAY_PORT", "9000"),
            ("DOCRELAY_CACHE_TTL_SECS", "60"),
            ("DOCRELAY_PAGE_LIMIT", "25"),
            ("DOCRELAY_MAX_MESSAGES", "4"),
            ("DOCRELAY_VISIBILITY_TIMEOUT_SECS", "45"),
            ("DOCRELAY_WAIT_TIME_SECS", "5"),
            ("DOCRELAY_AUTH_ENABLED", "true"),
            ("DOCRELAY_API_KEYS", "ops:abc, ci:def"),
            ("DOCRELAY_WEBHOOK_URL", "https://hooks.example.com/done"),
            ("DOCRELAY_LOG_JSON", "1"),
        ]));
        assert_eq!(config.bind_addr(), "127.0.0.1:9000");
        assert_eq!(config.cache_ttl(), Duration::from_secs(60));
        assert_eq!(config.store_config().default_page_limit, 25);
        let intake = config.intake_config();
        assert_eq!(intake.max_messages, 4);
        assert_eq!(intake.wait_time, Duration::from_secs(5));
        assert_eq!(config.visibility_timeout(), Duration::from_secs(45));
        assert!(config.auth_enabled);
        assert!(config.log_json);
        assert_eq!(
            config.api_keys,
            vec![("ops".to_string(), "abc".to_string()), ("ci".to_string(), "def".to_string())]
        );
        assert_eq!(config.webhook_url.as_deref(), Some("https://hooks.example.com/done"));
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = ServiceConfig::from_lookup(lookup(&[
            ("DOCRELAY_PORT", "eighty"),
            ("DOCRELAY_CACHE_TTL_SECS", "0"),
            ("DOCRELAY_AUTH_ENABLED", "maybe"),
            ("DOCRELAY_WEBHOOK_URL", "  "),
        ]));
        assert_eq!(config.port, 8080);
        assert_eq!(config.cache_ttl_secs, 300);
        assert!(!config.auth_enabled);
        assert_eq!(config.webhook_url, None);
    }

    #[test]
    fn test_parse_api_keys() {
        assert_eq!(
            parse_api_keys("bare,lbl:k,broken:,"),
            vec![("key-0".to_string(), "bare".to_string()), ("lbl".to_string(), "k".to_string())]
        );
        assert!(parse_api_keys("").is_empty());
    }
}
