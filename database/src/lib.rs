use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

pub mod error;
pub mod init;
pub mod query;
pub mod store;

pub use error::{DatabaseError, Result};
pub use init::{initialize_database, DatabaseConfig};
pub use query::{DeleteResults, Document, FindOptions, QueryResults};
pub use store::{DocumentStore, Indexes, SqliteDocumentStore};

/// SQLite pool shared by every collection
#[derive(Debug, Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
    write_lock: Arc<Mutex<()>>,
}

impl Database {
    /// Open (creating if missing) the SQLite database at `database_path`.
    ///
    /// WAL mode lets readers keep answering access checks while a rebuild
    /// transaction is open.
    pub async fn new(database_path: &Path, max_connections: u32) -> Result<Self> {
        if let Some(parent) = database_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        info!("Opening ACL database at {}", database_path.display());

        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        debug!("Pool of {} connection(s) established", max_connections);

        Ok(Self {
            pool,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Whether a collection's table exists yet
    pub async fn table_exists(&self, table_name: &str) -> Result<bool> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?")
                .bind(table_name)
                .fetch_one(&self.pool)
                .await?;

        Ok(count > 0)
    }

    /// Open the document collection `name`, creating its table when needed
    pub async fn collection(&self, name: &str) -> Result<SqliteDocumentStore> {
        self.collection_with(name, &Indexes::default()).await
    }

    /// Open the document collection `name` and ensure `indexes` exist on it
    pub async fn collection_with(
        &self,
        name: &str,
        indexes: &Indexes,
    ) -> Result<SqliteDocumentStore> {
        SqliteDocumentStore::open(self.pool.clone(), self.write_lock.clone(), name, indexes).await
    }
}
