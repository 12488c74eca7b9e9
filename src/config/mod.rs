use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::di::FactoryPolling;

/// Key/value configuration, loaded from the environment.
#[derive(Clone, Default)]
pub struct ConfigService {
    config: Arc<DashMap<String, String>>,
}

impl ConfigService {
    pub fn new() -> Self {
        Self::from_pairs(env::vars())
    }

    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let service = Self::default();
        for (key, value) in pairs {
            service.config.insert(key.into(), value.into());
        }
        service
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.config.get(key).map(|v| v.clone())
    }

    /// Parse the value under `key`. Unparsable values read as `None`.
    pub fn get_parsed<T: FromStr>(&self, key: &str) -> Option<T> {
        let raw = self.get(key)?;
        match raw.trim().parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(key, value = %raw, "Ignoring unparsable configuration value");
                None
            }
        }
    }

    pub fn set(&self, key: &str, value: &str) {
        self.config.insert(key.to_string(), value.to_string());
    }

    /// Entries whose key starts with `prefix`, with the prefix stripped.
    pub fn with_prefix(&self, prefix: &str) -> Vec<(String, String)> {
        let mut entries: Vec<(String, String)> = self
            .config
            .iter()
            .filter_map(|entry| {
                entry
                    .key()
                    .strip_prefix(prefix)
                    .map(|rest| (rest.to_string(), entry.value().clone()))
            })
            .collect();
        entries.sort();
        entries
    }
}

/// Framework settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Interval between checks while waiting on pending factories.
    pub factory_poll_interval_ms: u64,
    /// How many checks before giving up on pending factories.
    pub factory_poll_retries: u32,
    /// Prepended to every controller path.
    pub global_prefix: Option<String>,
    /// When set, `/users/` no longer matches `/users`.
    pub strict_slash: bool,
    /// Largest request body accepted from the network.
    pub body_limit_bytes: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            factory_poll_interval_ms: 10,
            factory_poll_retries: 300,
            global_prefix: None,
            strict_slash: false,
            body_limit_bytes: 2 * 1024 * 1024,
        }
    }
}

impl AppConfig {
    pub const ENV_PREFIX: &'static str = "TRELLIS_";

    /// Read `TRELLIS_*` entries, falling back to defaults.
    pub fn from_config_service(config: &ConfigService) -> Self {
        let defaults = Self::default();
        let key = |name: &str| format!("{}{name}", Self::ENV_PREFIX);
        Self {
            factory_poll_interval_ms: config
                .get_parsed(&key("FACTORY_POLL_INTERVAL_MS"))
                .unwrap_or(defaults.factory_poll_interval_ms),
            factory_poll_retries: config
                .get_parsed(&key("FACTORY_POLL_RETRIES"))
                .unwrap_or(defaults.factory_poll_retries),
            global_prefix: config
                .get(&key("GLOBAL_PREFIX"))
                .filter(|prefix| !prefix.trim().is_empty()),
            strict_slash: config
                .get_parsed(&key("STRICT_SLASH"))
                .unwrap_or(defaults.strict_slash),
            body_limit_bytes: config
                .get_parsed(&key("BODY_LIMIT_BYTES"))
                .unwrap_or(defaults.body_limit_bytes),
        }
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn factory_polling(&self) -> FactoryPolling {
        FactoryPolling {
            interval: Duration::from_millis(self.factory_poll_interval_ms),
            retries: self.factory_poll_retries,
        }
    }

    pub fn global_prefix(&self) -> &str {
        self.global_prefix.as_deref().unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_prefixed_entries() {
        let config = ConfigService::from_pairs([
            ("TRELLIS_FACTORY_POLL_RETRIES", "5"),
            ("TRELLIS_GLOBAL_PREFIX", "/api"),
            ("TRELLIS_STRICT_SLASH", "true"),
            ("TRELLIS_FACTORY_POLL_INTERVAL_MS", "soon"),
        ]);
        let app = AppConfig::from_config_service(&config);
        assert_eq!(app.factory_poll_retries, 5);
        assert_eq!(app.factory_poll_interval_ms, 10);
        assert_eq!(app.global_prefix(), "/api");
        assert!(app.strict_slash);
        assert_eq!(app.factory_polling().retries, 5);
    }

    #[test]
    fn test_json_fills_missing_fields_with_defaults() {
        let app = AppConfig::from_json(r#"{ "global_prefix": "/v1" }"#).unwrap();
        assert_eq!(app.global_prefix(), "/v1");
        assert_eq!(app.factory_poll_retries, 300);
        assert!(!app.strict_slash);
    }

    #[test]
    fn test_with_prefix() {
        let config = ConfigService::from_pairs([("APP_A", "1"), ("APP_B", "2"), ("OTHER", "3")]);
        assert_eq!(
            config.with_prefix("APP_"),
            vec![("A".to_string(), "1".to_string()), ("B".to_string(), "2".to_string())]
        );
    }
}
