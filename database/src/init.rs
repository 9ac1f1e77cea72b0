use crate::{Database, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// How to open the document database
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub database_path: PathBuf,
    pub max_connections: u32,
    /// Collections whose tables are created up front
    pub collections: Vec<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data").join("acl.db"),
            max_connections: 5,
            collections: Vec::new(),
        }
    }
}

impl DatabaseConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_with_path(database_path: PathBuf) -> Self {
        Self {
            database_path,
            ..Self::default()
        }
    }

    pub fn with_database_path(mut self, path: PathBuf) -> Self {
        self.database_path = path;
        self
    }

    /// Pool size, never below one
    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections.max(1);
        self
    }

    pub fn with_collections<I, S>(mut self, collections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.collections = collections.into_iter().map(Into::into).collect();
        self
    }
}

/// Open the database and make sure every configured collection has a table
pub async fn initialize_database(config: DatabaseConfig) -> Result<Arc<Database>> {
    let db = Database::new(&config.database_path, config.max_connections).await?;

    for name in &config.collections {
        db.collection(name).await?;
    }

    info!(
        "Database ready at {} ({} collection(s), pool of {})",
        config.database_path.display(),
        config.collections.len(),
        config.max_connections
    );

    Ok(Arc::new(db))
}
