use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;

use medcontent_core::config::{ConfigError, ADMIN_SECRET_VAR};

const BIND_ADDR_VAR: &str = "MEDCONTENT_API_BIND_ADDR";
const SEED_PATH_VAR: &str = "MEDCONTENT_SEED_PATH";

#[derive(Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub admin_secret: String,
    /// JSON document `{collection: Item[]}` loaded into the store at startup.
    pub seed_path: Option<PathBuf>,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field("admin_secret", &"[REDACTED]")
            .field("seed_path", &self.seed_path)
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = value_or_default(&lookup, BIND_ADDR_VAR, "127.0.0.1:8080");
        if bind_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::Invalid(format!(
                "{BIND_ADDR_VAR} must be a socket address like 127.0.0.1:8080"
            )));
        }

        let admin_secret = required_trimmed(&lookup, ADMIN_SECRET_VAR)?;
        let seed_path = optional_trimmed(&lookup, SEED_PATH_VAR).map(PathBuf::from);

        Ok(Self {
            bind_addr,
            admin_secret,
            seed_path,
        })
    }

    #[cfg(test)]
    pub fn for_tests(admin_secret: &str) -> Self {
        Self {
            bind_addr: "127.0.0.1:0".to_string(),
            admin_secret: admin_secret.to_string(),
            seed_path: None,
        }
    }
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

    use super::*;

    #[test]
    fn config_requires_admin_secret() {
        let map: HashMap<&str, &str> = HashMap::new();
        let err = AppConfig::from_lookup(|key| map.get(key).map(|value| (*value).to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("MEDCONTENT_ADMIN_SECRET"));
    }

    #[test]
    fn config_rejects_bad_bind_addr() {
        let map = HashMap::from([
            ("MEDCONTENT_ADMIN_SECRET", "secret"),
            ("MEDCONTENT_API_BIND_ADDR", "localhost"),
        ]);
        let err = AppConfig::from_lookup(|key| map.get(key).map(|value| (*value).to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn config_redacts_admin_secret() {
        let map = HashMap::from([
            ("MEDCONTENT_ADMIN_SECRET", "sensitive-admin-secret"),
            ("MEDCONTENT_SEED_PATH", "seed.json"),
        ]);
        let config =
            AppConfig::from_lookup(|key| map.get(key).map(|value| (*value).to_string())).unwrap();

        assert_eq!(config.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.seed_path, Some(PathBuf::from("seed.json")));
        let debug_output = format!("{config:?}");
        assert!(!debug_output.contains("sensitive-admin-secret"));
        assert!(debug_output.contains("[REDACTED]"));
    }
}
