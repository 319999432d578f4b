//! Application configuration management.
//!
//! Configuration is stored at `~/.config/querysync-admin/config.json` and can
//! be overridden from the environment (including a `.env` file):
//!
//! - `QUERYSYNC_BASE_URL`: admin API base URL
//! - `QUERYSYNC_TOKEN`: bearer token for the API

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use querysync_core::ClientConfig;
use serde::{Deserialize, Serialize};

/// Application name used for config directory paths
const APP_NAME: &str = "querysync-admin";

/// Config file name
const CONFIG_FILE: &str = "config.json";

pub const BASE_URL_ENV: &str = "QUERYSYNC_BASE_URL";
pub const TOKEN_ENV: &str = "QUERYSYNC_TOKEN";

const DEFAULT_BASE_URL: &str = "http://localhost:8080/api";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub base_url: String,
    pub client: ClientConfig,
    /// Never written to disk
    #[serde(skip)]
    pub token: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            client: ClientConfig::default(),
            token: None,
        }
    }
}

impl Config {
    /// Load from the config file, then apply environment overrides
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let config = Self::load_from(&path)?;
        Ok(config.with_overrides(|name| std::env::var(name).ok()))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Apply `QUERYSYNC_*` overrides read through `lookup`
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(BASE_URL_ENV).filter(|v| !v.trim().is_empty()) {
            self.base_url = url;
        }
        if let Some(token) = lookup(TOKEN_ENV).filter(|v| !v.trim().is_empty()) {
            self.token = Some(token);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"base_url": "https://admin.example.com"}"#).expect("parse");
        assert_eq!(config.base_url, "https://admin.example.com");
        assert!(config.client.refetch_on_invalidate);
        assert!(config.token.is_none());
    }

    #[test]
    fn test_token_is_not_serialized() {
        let config = Config {
            token: Some("secret".into()),
            ..Config::default()
        };
        let json = serde_json::to_string(&config).expect("serialize");
        assert!(!json.contains("secret"));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            (BASE_URL_ENV, "https://staging.example.com"),
            (TOKEN_ENV, "abc123"),
        ]);
        let config = Config::default().with_overrides(|name| env.get(name).map(|v| v.to_string()));
        assert_eq!(config.base_url, "https://staging.example.com");
        assert_eq!(config.token.as_deref(), Some("abc123"));

        let untouched = Config::default().with_overrides(|_| Some("  ".to_string()));
        assert_eq!(untouched, Config::default());
    }

    #[test]
    fn test_missing_file_is_default() {
        let path = std::env::temp_dir().join("querysync-admin-missing").join(CONFIG_FILE);
        let config = Config::load_from(&path).expect("load");
        assert_eq!(config, Config::default());
    }
}
