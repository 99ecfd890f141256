//! `rgate` configuration.
//!
//! Precedence, lowest first: built-in defaults, the YAML file, `RGATE_*`
//! environment variables (a `.env` file is loaded into the environment
//! beforehand), then command-line flags.
//!
//! ```yaml
//! database:
//!   database_path: data/rgate.db
//!   max_connections: 5
//! security:
//!   evaluation_timeout_ms: 5000
//!   decision_strategy: deny_overrides
//!   quota_limit_type: quota
//! log_dir: data/logs
//! ```

use anyhow::{anyhow, Context, Result};
use authz::{DecisionStrategy, SecurityManagerConfig};
use database::DatabaseConfig;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::utils::env_paths::EnvPaths;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RgateConfig {
    pub database: DatabaseConfig,
    pub security: SecurityManagerConfig,
    /// Daily rolling log files are written here when set.
    pub log_dir: Option<PathBuf>,
}

impl RgateConfig {
    /// Reads `explicit` (which must exist) or the default config file under
    /// `paths` (which may be absent), then applies environment overrides.
    pub fn load(explicit: Option<&Path>, paths: &EnvPaths) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_file = paths.config_file();
                if default_file.exists() {
                    Self::from_file(&default_file)?
                } else {
                    Self::default()
                }
            }
        };

        if config.database.database_path == DatabaseConfig::default().database_path {
            config.database.database_path = paths.database_path();
        }

        config.apply_overrides(|key| env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_yaml_str(&source)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_yaml_str(source: &str) -> Result<Self> {
        if source.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(source)?)
    }

    /// Applies `RGATE_*` overrides found through `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(path) = lookup("RGATE_DATABASE_PATH") {
            self.database.database_path = PathBuf::from(path);
        }
        if let Some(dir) = lookup("RGATE_LOG_DIR") {
            self.log_dir = Some(PathBuf::from(dir));
        }
        if let Some(ms) = lookup("RGATE_EVALUATION_TIMEOUT_MS") {
            let ms: u64 = ms
                .trim()
                .parse()
                .with_context(|| format!("RGATE_EVALUATION_TIMEOUT_MS is not a number: {}", ms))?;
            self.security.evaluation_timeout = Duration::from_millis(ms);
        }
        if let Some(strategy) = lookup("RGATE_DECISION_STRATEGY") {
            self.security.decision_strategy = strategy
                .parse::<DecisionStrategy>()
                .map_err(|e| anyhow!("RGATE_DECISION_STRATEGY: {}", e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::env_paths::tests::ENV_MUTEX;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_yaml_sections() {
        let config = RgateConfig::from_yaml_str(
            r#"
database:
  database_path: /var/lib/rgate/authz.db
security:
  evaluation_timeout_ms: 250
  decision_strategy: deny_overrides
log_dir: /var/log/rgate
"#,
        )
        .unwrap();

        assert_eq!(
            config.database.database_path,
            PathBuf::from("/var/lib/rgate/authz.db")
        );
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(
            config.security.evaluation_timeout,
            Duration::from_millis(250)
        );
        assert_eq!(
            config.security.decision_strategy,
            DecisionStrategy::DenyOverrides
        );
        assert_eq!(config.security.quota_limit_type, "quota");
        assert_eq!(config.log_dir, Some(PathBuf::from("/var/log/rgate")));
    }

    #[test]
    fn test_empty_yaml_is_default() {
        assert_eq!(RgateConfig::from_yaml_str("").unwrap(), RgateConfig::default());
    }

    #[test]
    fn test_env_overrides_win_over_yaml() {
        let mut config =
            RgateConfig::from_yaml_str("security:\n  decision_strategy: deny_overrides\n").unwrap();
        config
            .apply_overrides(lookup(&[
                ("RGATE_DECISION_STRATEGY", "last-match-wins"),
                ("RGATE_EVALUATION_TIMEOUT_MS", "40"),
                ("RGATE_DATABASE_PATH", "/tmp/other.db"),
            ]))
            .unwrap();

        assert_eq!(
            config.security.decision_strategy,
            DecisionStrategy::LastMatchWins
        );
        assert_eq!(config.security.evaluation_timeout, Duration::from_millis(40));
        assert_eq!(config.database.database_path, PathBuf::from("/tmp/other.db"));
    }

    #[test]
    fn test_bad_override_is_an_error() {
        let mut config = RgateConfig::default();
        assert!(config
            .apply_overrides(lookup(&[("RGATE_EVALUATION_TIMEOUT_MS", "soon")]))
            .is_err());
        assert!(config
            .apply_overrides(lookup(&[("RGATE_DECISION_STRATEGY", "coin_flip")]))
            .is_err());
    }

    #[test]
    fn test_load_reads_default_file() {
        let _guard = ENV_MUTEX.lock().unwrap();
        for key in [
            "RGATE_DATABASE_PATH",
            "RGATE_LOG_DIR",
            "RGATE_EVALUATION_TIMEOUT_MS",
            "RGATE_DECISION_STRATEGY",
            "RGATE_DATA_PATH",
            "RGATE_CONFIG_PATH",
        ] {
            env::remove_var(key);
        }

        let dir = TempDir::new().unwrap();
        let paths = EnvPaths::load_with_base(Some(dir.path().to_path_buf())).unwrap();

        let config = RgateConfig::load(None, &paths).unwrap();
        assert_eq!(config.database.database_path, paths.database_path());

        std::fs::create_dir_all(&paths.configuration_path).unwrap();
        std::fs::write(paths.config_file(), "log_dir: /tmp/rgate-logs\n").unwrap();
        let config = RgateConfig::load(None, &paths).unwrap();
        assert_eq!(config.log_dir, Some(PathBuf::from("/tmp/rgate-logs")));

        assert!(RgateConfig::load(Some(&dir.path().join("missing.yaml")), &paths).is_err());
    }
}
