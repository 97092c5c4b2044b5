//! Harness configuration

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{E2eError, E2eResult};
use crate::response::ApiConfig;
use crate::table::TableSelectors;
use crate::visual::VisualConfig;

pub const ENV_RESPONSE_TIMEOUT_MS: &str = "TABLECHECK_RESPONSE_TIMEOUT_MS";
pub const ENV_VISIBILITY_TIMEOUT_MS: &str = "TABLECHECK_VISIBILITY_TIMEOUT_MS";

/// Harness configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub timeouts: TimeoutConfig,

    /// Backend endpoint addressing
    pub api: ApiConfig,

    /// DOM contract of the table widget
    pub table: TableSelectors,

    pub visual: VisualConfig,
}

/// Bounds for every suspension point
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Waiting for a backend response
    pub response_ms: u64,

    /// Waiting for an element to become visible, and auto-retrying matchers
    pub visibility_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            response_ms: 30_000,
            visibility_ms: 5_000,
        }
    }
}

impl TimeoutConfig {
    pub fn response(&self) -> Duration {
        Duration::from_millis(self.response_ms)
    }

    pub fn visibility(&self) -> Duration {
        Duration::from_millis(self.visibility_ms)
    }
}

impl HarnessConfig {
    /// Load configuration from a TOML file, or defaults if it does not exist
    pub fn load(path: &Path) -> E2eResult<Self> {
        if path.exists() {
            debug!("Loading harness config from {}", path.display());
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> E2eResult<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Override timeouts from the environment
    pub fn apply_env(mut self) -> E2eResult<Self> {
        if let Some(ms) = env_millis(ENV_RESPONSE_TIMEOUT_MS)? {
            self.timeouts.response_ms = ms;
        }
        if let Some(ms) = env_millis(ENV_VISIBILITY_TIMEOUT_MS)? {
            self.timeouts.visibility_ms = ms;
        }
        Ok(self)
    }
}

fn env_millis(key: &str) -> E2eResult<Option<u64>> {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map(Some).map_err(|_| {
            warn!("{} is not a number of milliseconds: {:?}", key, raw);
            E2eError::InvalidConfig(format!("{}={}", key, raw))
        }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HarnessConfig::default();
        assert_eq!(config.timeouts.response(), Duration::from_secs(30));
        assert_eq!(config.api.extension, "asmx");
        assert_eq!(config.table.multi_select_key, "Control");
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = HarnessConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.timeouts.visibility_ms, 5_000);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tablecheck.toml");
        std::fs::write(
            &path,
            r#"
[timeouts]
response_ms = 1500

[table]
global_filter = ".search"
"#,
        )
        .unwrap();

        let config = HarnessConfig::load(&path).unwrap();
        assert_eq!(config.timeouts.response_ms, 1500);
        assert_eq!(config.timeouts.visibility_ms, 5_000);
        assert_eq!(config.table.global_filter, ".search");
        assert_eq!(config.table.body_test_id, "virtualised-table.body");
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/tablecheck.toml");
        let mut config = HarnessConfig::default();
        config.api.extension = "svc".to_string();
        config.save(&path).unwrap();

        let loaded = HarnessConfig::load(&path).unwrap();
        assert_eq!(loaded.api.extension, "svc");
    }

    // The process environment is shared across test threads
    #[test]
    fn test_env_overrides() {
        std::env::set_var(ENV_RESPONSE_TIMEOUT_MS, "1200");
        std::env::set_var(ENV_VISIBILITY_TIMEOUT_MS, " 250 ");
        let config = HarnessConfig::default().apply_env().unwrap();
        assert_eq!(config.timeouts.response(), Duration::from_millis(1200));
        assert_eq!(config.timeouts.visibility(), Duration::from_millis(250));

        std::env::set_var(ENV_VISIBILITY_TIMEOUT_MS, "soon");
        let err = HarnessConfig::default().apply_env().unwrap_err();
        assert!(matches!(err, E2eError::InvalidConfig(ref m) if m.contains("soon")));

        std::env::remove_var(ENV_VISIBILITY_TIMEOUT_MS);
        std::env::set_var(ENV_RESPONSE_TIMEOUT_MS, "-5");
        let err = HarnessConfig::default().apply_env().unwrap_err();
        assert!(
            matches!(err, E2eError::InvalidConfig(ref m) if m.contains(ENV_RESPONSE_TIMEOUT_MS))
        );

        std::env::remove_var(ENV_RESPONSE_TIMEOUT_MS);
        let config = HarnessConfig::default().apply_env().unwrap();
        assert_eq!(config.timeouts.response_ms, 30_000);
        assert_eq!(config.timeouts.visibility_ms, 5_000);
    }
}
