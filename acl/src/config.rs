use crate::error::{AclError, Result};
use database::DatabaseConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Names of the collections the ACL stores use
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionNames {
    pub clients: String,
    pub roles: String,
    pub keys: String,
    pub access: String,
}

impl Default for CollectionNames {
    fn default() -> Self {
        Self {
            clients: "acl_clients".to_string(),
            roles: "acl_roles".to_string(),
            keys: "acl_keys".to_string(),
            access: "acl_access".to_string(),
        }
    }
}

/// Configuration for the ACL core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AclConfig {
    /// Path to the SQLite database holding every ACL collection
    pub database_path: PathBuf,
    /// Connection pool size
    pub max_connections: u32,
    pub collections: CollectionNames,
    /// Store client secrets as argon2 hashes
    pub hash_secrets: bool,
    /// Number of trailing token characters shown for keys
    pub token_display_length: usize,
}

impl Default for AclConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data").join("acl.db"),
            max_connections: 5,
            collections: CollectionNames::default(),
            hash_secrets: true,
            token_display_length: 5,
        }
    }
}

impl AclConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from the environment, reading `.env` first
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(path) = lookup("ACL_DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }
        if let Some(value) = lookup("ACL_MAX_CONNECTIONS") {
            config.max_connections = parse_number("ACL_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = lookup("ACL_HASH_SECRETS") {
            config.hash_secrets = parse_bool("ACL_HASH_SECRETS", &value)?;
        }
        if let Some(value) = lookup("ACL_TOKEN_DISPLAY_LENGTH") {
            config.token_display_length = parse_number("ACL_TOKEN_DISPLAY_LENGTH", &value)?;
        }

        Ok(config)
    }

    pub fn with_database_path(mut self, path: PathBuf) -> Self {
        self.database_path = path;
        self
    }

    pub fn with_hash_secrets(mut self, hash_secrets: bool) -> Self {
        self.hash_secrets = hash_secrets;
        self
    }

    pub fn with_token_display_length(mut self, length: usize) -> Self {
        self.token_display_length = length;
        self
    }

    pub fn database_config(&self) -> DatabaseConfig {
        let names = &self.collections;
        DatabaseConfig::new_with_path(self.database_path.clone())
            .with_max_connections(self.max_connections)
            .with_collections([&names.clients, &names.roles, &names.keys, &names.access])
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(AclError::Configuration(format!(
            "{} must be a boolean, got '{}'",
            name, other
        ))),
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        AclError::Configuration(format!("{} must be a positive number, got '{}'", name, value))
    })
}
