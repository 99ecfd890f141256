use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};

/// Environment-based path configuration
#[derive(Debug, Clone)]
pub struct EnvPaths {
    pub data_path: PathBuf,
    pub configuration_path: PathBuf,
}

impl EnvPaths {
    /// Load paths from environment variables with defaults
    pub fn load() -> Result<Self> {
        Self::load_with_base(None)
    }

    /// Load paths from environment variables with an optional base directory
    pub fn load_with_base(base_dir: Option<PathBuf>) -> Result<Self> {
        let base = match base_dir {
            Some(base) => base,
            None => {
                let current = env::current_dir().context("Failed to get current directory")?;
                let env_file = current.join(".env");
                if env_file.exists() {
                    dotenv::from_path(&env_file).ok();
                }
                current
            }
        };

        Ok(Self {
            data_path: Self::get_path_from_env("RGATE_DATA_PATH", "./data", &base),
            configuration_path: Self::get_path_from_env("RGATE_CONFIG_PATH", "./config", &base),
        })
    }

    /// Relative values resolve against `base_dir`.
    fn get_path_from_env(var_name: &str, default: &str, base_dir: &Path) -> PathBuf {
        let path = PathBuf::from(env::var(var_name).unwrap_or_else(|_| default.to_string()));
        if path.is_relative() {
            base_dir.join(path)
        } else {
            path
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_path.join("rgate.db")
    }

    pub fn logs_path(&self) -> PathBuf {
        self.data_path.join("logs")
    }

    /// The configuration file read when `--config` is not given.
    pub fn config_file(&self) -> PathBuf {
        self.configuration_path.join("rgate.yaml")
    }
}
