//! Client configuration read from `MEDCONTENT_*` environment variables.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::util::{is_http_url, is_ws_url};

pub const API_BASE_URL_VAR: &str = "MEDCONTENT_API_BASE_URL";
pub const BROADCAST_URL_VAR: &str = "MEDCONTENT_BROADCAST_URL";
pub const ADMIN_SECRET_VAR: &str = "MEDCONTENT_ADMIN_SECRET";
pub const SNAPSHOT_PATH_VAR: &str = "MEDCONTENT_SNAPSHOT_PATH";
pub const DEFAULTS_PATH_VAR: &str = "MEDCONTENT_DEFAULTS_PATH";
pub const PERSIST_DEBOUNCE_VAR: &str = "MEDCONTENT_PERSIST_DEBOUNCE_MS";
pub const REQUEST_TIMEOUT_VAR: &str = "MEDCONTENT_REQUEST_TIMEOUT_SECS";
pub const RESYNC_INTERVAL_VAR: &str = "MEDCONTENT_RESYNC_INTERVAL_SECS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub api_base_url: String,
    pub broadcast_url: String,
    pub admin_secret: Option<String>,
    /// Snapshot file override; callers pick a platform default when unset.
    pub snapshot_path: Option<PathBuf>,
    /// `{collection: Item[]}` file with built-in contents used before any snapshot exists.
    pub defaults_path: Option<PathBuf>,
    pub persist_debounce: Duration,
    pub request_timeout: Duration,
    /// `None` disables the periodic safety hydration.
    pub resync_interval: Option<Duration>,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ClientConfig")
            .field("api_base_url", &self.api_base_url)
            .field("broadcast_url", &self.broadcast_url)
            .field(
                "admin_secret",
                &self.admin_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("snapshot_path", &self.snapshot_path)
            .field("defaults_path", &self.defaults_path)
            .field("persist_debounce", &self.persist_debounce)
            .field("request_timeout", &self.request_timeout)
            .field("resync_interval", &self.resync_interval)
            .finish()
    }
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_base_url = required_trimmed(&lookup, API_BASE_URL_VAR)?;
        if !is_http_url(&api_base_url) {
            return Err(ConfigError::Invalid(format!(
                "{API_BASE_URL_VAR} must start with http:// or https://"
            )));
        }
        let api_base_url = api_base_url.trim_end_matches('/').to_string();

        let broadcast_url = match optional_trimmed(&lookup, BROADCAST_URL_VAR) {
            Some(url) if is_ws_url(&url) => url,
            Some(_) => {
                return Err(ConfigError::Invalid(format!(
                    "{BROADCAST_URL_VAR} must start with ws:// or wss://"
                )));
            }
            None => derive_broadcast_url(&api_base_url),
        };

        let admin_secret = optional_trimmed(&lookup, ADMIN_SECRET_VAR);
        let snapshot_path = optional_trimmed(&lookup, SNAPSHOT_PATH_VAR).map(PathBuf::from);
        let defaults_path = optional_trimmed(&lookup, DEFAULTS_PATH_VAR).map(PathBuf::from);

        let debounce_ms = bounded_integer(&lookup, PERSIST_DEBOUNCE_VAR, "250", 0, 10_000)?;
        let timeout_secs = bounded_integer(&lookup, REQUEST_TIMEOUT_VAR, "10", 1, 120)?;
        let resync_secs = bounded_integer(&lookup, RESYNC_INTERVAL_VAR, "300", 0, 86_400)?;

        Ok(Self {
            api_base_url,
            broadcast_url,
            admin_secret,
            snapshot_path,
            defaults_path,
            persist_debounce: Duration::from_millis(debounce_ms),
            request_timeout: Duration::from_secs(timeout_secs),
            resync_interval: (resync_secs > 0).then(|| Duration::from_secs(resync_secs)),
        })
    }
}

/// `http://host/api` becomes `ws://host/api/events`; `https` maps to `wss`.
pub fn derive_broadcast_url(api_base_url: &str) -> String {
    let base = api_base_url.trim_end_matches('/');
    let socket_base = base.strip_prefix("https://").map_or_else(
        || {
            base.strip_prefix("http://")
                .map_or_else(|| base.to_string(), |rest| format!("ws://{rest}"))
        },
        |rest| format!("wss://{rest}"),
    );
    format!("{socket_base}/events")
}

fn bounded_integer(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: &str,
    min: u64,
    max: u64,
) -> Result<u64, ConfigError> {
    let value = value_or_default(lookup, name, default)
        .parse::<u64>()
        .map_err(|_| {
            ConfigError::Invalid(format!("{name} must be an integer in [{min}, {max}]"))
        })?;
    if !(min..=max).contains(&value) {
        return Err(ConfigError::Invalid(format!(
            "{name} must be in [{min}, {max}]"
        )));
    }
    Ok(value)
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

fn required_trimmed(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    optional_trimmed(lookup, name).ok_or(ConfigError::MissingVar(name))
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use pretty_assertions::assert_eq;

    use super::*;

    fn config_from(map: &HashMap<&str, &str>) -> Result<ClientConfig, ConfigError> {
        ClientConfig::from_lookup(|key| map.get(key).map(|value| (*value).to_string()))
    }

    #[test]
    fn requires_api_base_url() {
        let err = config_from(&HashMap::new()).unwrap_err();
        assert!(err.to_string().contains(API_BASE_URL_VAR));
    }

    #[test]
    fn applies_defaults() {
        let map = HashMap::from([(API_BASE_URL_VAR, "https://content.example.com/api/")]);
        let config = config_from(&map).unwrap();

        assert_eq!(config.api_base_url, "https://content.example.com/api");
        assert_eq!(config.broadcast_url, "wss://content.example.com/api/events");
        assert_eq!(config.admin_secret, None);
        assert_eq!(config.defaults_path, None);
        assert_eq!(config.persist_debounce, Duration::from_millis(250));
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.resync_interval, Some(Duration::from_secs(300)));
    }

    #[test]
    fn reads_optional_paths() {
        let map = HashMap::from([
            (API_BASE_URL_VAR, "http://localhost:8080"),
            (SNAPSHOT_PATH_VAR, " /var/lib/medcontent/collections.json "),
            (DEFAULTS_PATH_VAR, "defaults.json"),
        ]);
        let config = config_from(&map).unwrap();
        assert_eq!(
            config.snapshot_path,
            Some(PathBuf::from("/var/lib/medcontent/collections.json"))
        );
        assert_eq!(config.defaults_path, Some(PathBuf::from("defaults.json")));
    }

    #[test]
    fn zero_resync_interval_disables_timer() {
        let map = HashMap::from([
            (API_BASE_URL_VAR, "http://localhost:8080"),
            (RESYNC_INTERVAL_VAR, "0"),
        ]);
        assert_eq!(config_from(&map).unwrap().resync_interval, None);
    }

    #[test]
    fn rejects_out_of_range_and_malformed_values() {
        let timeout = HashMap::from([
            (API_BASE_URL_VAR, "http://localhost:8080"),
            (REQUEST_TIMEOUT_VAR, "0"),
        ]);
        assert!(config_from(&timeout).is_err());

        let debounce = HashMap::from([
            (API_BASE_URL_VAR, "http://localhost:8080"),
            (PERSIST_DEBOUNCE_VAR, "soon"),
        ]);
        assert!(config_from(&debounce).is_err());

        let broadcast = HashMap::from([
            (API_BASE_URL_VAR, "http://localhost:8080"),
            (BROADCAST_URL_VAR, "http://localhost:8080/events"),
        ]);
        assert!(config_from(&broadcast).is_err());

        let base = HashMap::from([(API_BASE_URL_VAR, "localhost:8080")]);
        assert!(config_from(&base).is_err());
    }

    #[test]
    fn debug_redacts_admin_secret() {
        let map = HashMap::from([
            (API_BASE_URL_VAR, "http://localhost:8080"),
            (ADMIN_SECRET_VAR, "sensitive-admin-secret"),
        ]);
        let debug_output = format!("{:?}", config_from(&map).unwrap());
        assert!(!debug_output.contains("sensitive-admin-secret"));
        assert!(debug_output.contains("[REDACTED]"));
    }

    #[test]
    fn derives_socket_url_from_http_base() {
        assert_eq!(
            derive_broadcast_url("http://127.0.0.1:8080"),
            "ws://127.0.0.1:8080/events"
        );
    }
}
