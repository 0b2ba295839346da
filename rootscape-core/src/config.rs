use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Page the shareable descriptor is appended to as a fragment.
    #[serde(default = "default_page_base")]
    pub page_base: String,
    #[serde(default = "default_freshness_seconds")]
    pub freshness_seconds: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default)]
    pub output_path: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            page_base: default_page_base(),
            freshness_seconds: default_freshness_seconds(),
            request_timeout_ms: default_request_timeout_ms(),
            debounce_ms: default_debounce_ms(),
            output_path: None,
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let data = fs::read(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let cfg: Config = serde_json::from_slice(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_base.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "apiBase",
                message: "must not be empty".into(),
            });
        }
        if self.freshness_seconds == 0 {
            return Err(ConfigError::Invalid {
                field: "freshnessSeconds",
                message: "must be > 0".into(),
            });
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "requestTimeoutMs",
                message: "must be > 0".into(),
            });
        }
        Ok(())
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

fn default_api_base() -> String {
    "https://atlas.ripe.net/api/v2".to_string()
}

fn default_page_base() -> String {
    "https://rootscape.example/".to_string()
}

fn default_freshness_seconds() -> u64 {
    1800
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_debounce_ms() -> u64 {
    250
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_is_default() {
        let cfg: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.freshness_seconds, 1800);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let cfg: Config = serde_json::from_str(r#"{"requestTimeoutMs": 0}"#).unwrap();
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Invalid {
                field: "requestTimeoutMs",
                ..
            })
        ));
    }

    #[test]
    fn debounce_reads_quiet_period() {
        assert_eq!(Config::default().debounce(), Duration::from_millis(250));
        let cfg: Config = serde_json::from_str(r#"{"debounceMs": 1000}"#).unwrap();
        assert_eq!(cfg.debounce(), Duration::from_secs(1));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = Config::load("/nonexistent/rootscape.json").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/rootscape.json"));
    }
}
