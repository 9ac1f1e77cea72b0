use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};

/// Where aclctl keeps its database and logs
#[derive(Debug, Clone)]
pub struct EnvPaths {
    pub data_path: PathBuf,
}

impl EnvPaths {
    /// Load paths from environment variables with defaults
    pub fn load() -> Result<Self> {
        Self::load_with_base(None)
    }

    /// Load paths relative to `base_dir`, or to the current directory after
    /// reading its `.env` file
    pub fn load_with_base(base_dir: Option<PathBuf>) -> Result<Self> {
        let base = match base_dir {
            Some(base) => base,
            None => {
                let cwd = env::current_dir().context("Failed to get current directory")?;
                let env_file = cwd.join(".env");
                if env_file.exists() {
                    dotenvy::from_path(&env_file).ok();
                }
                cwd
            }
        };

        Ok(Self {
            data_path: Self::get_path_from_env("DATA_PATH", "./data", &base),
        })
    }

    /// Get a path from environment variable or use default
    fn get_path_from_env(var_name: &str, default: &str, base_dir: &Path) -> PathBuf {
        let path = PathBuf::from(env::var(var_name).unwrap_or_else(|_| default.to_string()));

        if path.is_relative() {
            base_dir.join(path)
        } else {
            path
        }
    }

    /// Default ACL database location
    pub fn database_path(&self) -> PathBuf {
        self.data_path.join("acl").join("acl.db")
    }

    /// Default directory for rolling log files
    pub fn logs_path(&self) -> PathBuf {
        self.data_path.join("logs")
    }
}
