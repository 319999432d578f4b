//! Client and per-query configuration.

use serde::{Deserialize, Serialize};

/// Settings for a [`QueryClient`](crate::QueryClient).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Refetch observed queries in the background after they are invalidated
    pub refetch_on_invalidate: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            refetch_on_invalidate: true,
        }
    }
}

/// Per-query settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// When false the query never fetches on its own
    pub enabled: bool,
    /// Only fetch through an explicit `refetch()` (report-style queries)
    pub manual: bool,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            manual: false,
        }
    }
}

impl QueryConfig {
    pub fn manual() -> Self {
        Self {
            enabled: true,
            manual: true,
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            manual: false,
        }
    }

    /// Whether the executor may fetch without an explicit refetch
    pub fn auto_fetch(&self) -> bool {
        self.enabled && !self.manual
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        assert!(ClientConfig::default().refetch_on_invalidate);
        assert!(QueryConfig::default().auto_fetch());
        assert!(!QueryConfig::manual().auto_fetch());
        assert!(!QueryConfig::disabled().auto_fetch());
    }

    #[test]
    fn test_client_config_partial_json() {
        let config: ClientConfig = serde_json::from_str("{}").expect("empty config should parse");
        assert_eq!(config, ClientConfig::default());

        let config: ClientConfig = serde_json::from_str(r#"{"refetch_on_invalidate": false}"#)
            .expect("config should parse");
        assert!(!config.refetch_on_invalidate);
    }
}
