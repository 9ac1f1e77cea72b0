use crate::query::{self, DeleteResults, Document, FindOptions, QueryResults};
use crate::{DatabaseError, Result};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::{SqliteConnection, SqlitePool};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

/// Document-store operations used against a single collection.
///
/// Every store in the ACL core (clients, roles, keys and the resolved access
/// table) talks to its collection only through this trait.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Name of the collection this store is bound to
    fn collection(&self) -> &str;

    /// Find all documents matching `query`
    async fn find(&self, query: &Document, options: &FindOptions) -> Result<QueryResults>;

    /// Insert documents, assigning an `_id` where one is missing.
    ///
    /// Fails with [`DatabaseError::Duplicate`] when a document collides with
    /// another on a unique field; nothing is inserted then.
    async fn create(&self, documents: Vec<Document>) -> Result<QueryResults>;

    /// Shallow-set every key of `update` on every document matching `query`
    async fn update(&self, query: &Document, update: &Document) -> Result<QueryResults>;

    /// Delete every document matching `query`
    async fn delete(&self, query: &Document) -> Result<DeleteResults>;

    /// Replace every document matching `query` with `documents`.
    ///
    /// The default runs `delete` then `create`, so readers can briefly observe
    /// the collection without the replaced documents. Implementations with
    /// transactions should override it.
    async fn replace_all(&self, query: &Document, documents: Vec<Document>) -> Result<QueryResults> {
        self.delete(query).await?;
        if documents.is_empty() {
            return Ok(QueryResults::default());
        }
        self.create(documents).await
    }
}

/// Secondary indexes of a collection over top-level document fields
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Indexes {
    unique: Vec<String>,
    lookups: Vec<Vec<String>>,
}

impl Indexes {
    pub fn new() -> Self {
        Self::default()
    }

    /// No two documents may share a non-null value of `field`
    pub fn unique(mut self, field: impl Into<String>) -> Self {
        self.unique.push(field.into());
        self
    }

    /// Index equality lookups on `fields`, in that order
    pub fn lookup<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lookups.push(fields.into_iter().map(Into::into).collect());
        self
    }
}

/// SQLite-backed collection storing one JSON document per row.
///
/// Reads run on any pooled connection. Writes take the write lock shared by
/// every collection of the same [`crate::Database`], so a read-then-write
/// transaction never has to upgrade a stale snapshot.
#[derive(Debug, Clone)]
pub struct SqliteDocumentStore {
    pool: SqlitePool,
    write_lock: Arc<Mutex<()>>,
    collection: String,
}

impl SqliteDocumentStore {
    /// Open a collection, creating its table and indexes if they don't exist
    pub async fn open(
        pool: SqlitePool,
        write_lock: Arc<Mutex<()>>,
        collection: &str,
        indexes: &Indexes,
    ) -> Result<Self> {
        validate_collection_name(collection)?;

        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (id TEXT PRIMARY KEY NOT NULL, document TEXT NOT NULL)",
            collection
        );
        sqlx::query(&sql).execute(&pool).await?;

        for field in &indexes.unique {
            create_index(&pool, collection, std::slice::from_ref(field), true).await?;
        }
        for fields in &indexes.lookups {
            create_index(&pool, collection, fields, false).await?;
        }

        info!("Opened document collection: {}", collection);

        Ok(Self {
            pool,
            write_lock,
            collection: collection.to_string(),
        })
    }

    async fn load_matching(
        &self,
        conn: &mut SqliteConnection,
        query: &Document,
    ) -> Result<Vec<(String, Document)>> {
        query::validate_query(query)?;
        let filter = query::sql_filter(query);

        let sql = match &filter.clause {
            Some(clause) => format!(
                "SELECT id, document FROM {} WHERE {} ORDER BY rowid",
                self.collection, clause
            ),
            None => format!("SELECT id, document FROM {} ORDER BY rowid", self.collection),
        };
        let mut select = sqlx::query_as::<_, (String, String)>(&sql);
        for param in &filter.params {
            select = select.bind(param.as_str());
        }
        let rows = select.fetch_all(&mut *conn).await?;

        let mut documents = self.parse_rows(rows)?;
        documents.retain(|(_, document)| query::matches(document, query));
        Ok(documents)
    }

    fn parse_rows(&self, rows: Vec<(String, String)>) -> Result<Vec<(String, Document)>> {
        rows.into_iter()
            .map(|(id, text)| match serde_json::from_str::<JsonValue>(&text)? {
                JsonValue::Object(document) => Ok((id, document)),
                _ => Err(DatabaseError::CorruptDocument {
                    collection: self.collection.clone(),
                    reason: format!("row {} is not a JSON object", id),
                }),
            })
            .collect()
    }

    fn write_error(&self, error: sqlx::Error) -> DatabaseError {
        match &error {
            sqlx::Error::Database(db) if db.is_unique_violation() => DatabaseError::Duplicate {
                collection: self.collection.clone(),
                reason: db.message().to_string(),
            },
            _ => DatabaseError::Connection(error),
        }
    }

    async fn insert(&self, conn: &mut SqliteConnection, mut document: Document) -> Result<Document> {
        let id = match document.get("_id") {
            Some(JsonValue::String(id)) => id.clone(),
            _ => {
                let id = Uuid::new_v4().to_string();
                document.insert("_id".to_string(), JsonValue::String(id.clone()));
                id
            }
        };

        let sql = format!("INSERT INTO {} (id, document) VALUES (?, ?)", self.collection);
        sqlx::query(&sql)
            .bind(&id)
            .bind(serde_json::to_string(&document)?)
            .execute(&mut *conn)
            .await
            .map_err(|e| self.write_error(e))?;

        Ok(document)
    }

    async fn remove(&self, conn: &mut SqliteConnection, ids: &[String]) -> Result<u64> {
        let sql = format!("DELETE FROM {} WHERE id = ?", self.collection);
        let mut deleted = 0;
        for id in ids {
            deleted += sqlx::query(&sql)
                .bind(id)
                .execute(&mut *conn)
                .await?
                .rows_affected();
        }
        Ok(deleted)
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    fn collection(&self) -> &str {
        &self.collection
    }

    async fn find(&self, query: &Document, options: &FindOptions) -> Result<QueryResults> {
        let mut conn = self.pool.acquire().await?;
        let rows = self.load_matching(&mut *conn, query).await?;

        debug!(
            "find on {} matched {} document(s)",
            self.collection,
            rows.len()
        );

        let results = rows.into_iter().map(|(_, document)| document).collect();
        Ok(QueryResults {
            results: query::apply_options(results, options),
        })
    }

    async fn create(&self, documents: Vec<Document>) -> Result<QueryResults> {
        let _write = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let mut results = Vec::with_capacity(documents.len());
        for document in documents {
            results.push(self.insert(&mut *tx, document).await?);
        }
        tx.commit().await?;

        debug!("Inserted {} document(s) into {}", results.len(), self.collection);
        Ok(QueryResults { results })
    }

    async fn update(&self, query: &Document, update: &Document) -> Result<QueryResults> {
        let _write = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let rows = self.load_matching(&mut *tx, query).await?;

        let sql = format!("UPDATE {} SET document = ? WHERE id = ?", self.collection);
        let mut results = Vec::with_capacity(rows.len());
        for (id, mut document) in rows {
            for (key, value) in update {
                if key != "_id" {
                    document.insert(key.clone(), value.clone());
                }
            }
            sqlx::query(&sql)
                .bind(serde_json::to_string(&document)?)
                .bind(&id)
                .execute(&mut *tx)
                .await
                .map_err(|e| self.write_error(e))?;
            results.push(document);
        }
        tx.commit().await?;

        debug!("Updated {} document(s) in {}", results.len(), self.collection);
        Ok(QueryResults { results })
    }

    async fn delete(&self, query: &Document) -> Result<DeleteResults> {
        let _write = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let ids: Vec<String> = self
            .load_matching(&mut *tx, query)
            .await?
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        let deleted_count = self.remove(&mut *tx, &ids).await?;
        tx.commit().await?;

        debug!("Deleted {} document(s) from {}", deleted_count, self.collection);
        Ok(DeleteResults { deleted_count })
    }

    async fn replace_all(&self, query: &Document, documents: Vec<Document>) -> Result<QueryResults> {
        let _write = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let ids: Vec<String> = self
            .load_matching(&mut *tx, query)
            .await?
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        let deleted = self.remove(&mut *tx, &ids).await?;

        let mut results = Vec::with_capacity(documents.len());
        for document in documents {
            results.push(self.insert(&mut *tx, document).await?);
        }
        tx.commit().await?;

        debug!(
            "Replaced {} document(s) with {} in {}",
            deleted,
            results.len(),
            self.collection
        );
        Ok(QueryResults { results })
    }
}

async fn create_index(
    pool: &SqlitePool,
    collection: &str,
    fields: &[String],
    unique: bool,
) -> Result<()> {
    if fields.is_empty() {
        return Err(DatabaseError::InvalidQuery(format!(
            "index on {} needs at least one field",
            collection
        )));
    }
    if let Some(field) = fields.iter().find(|field| !query::is_plain_field(field)) {
        return Err(DatabaseError::InvalidQuery(format!(
            "cannot index field '{}' of {}",
            field, collection
        )));
    }

    let name = format!(
        "{}_{}_{}",
        collection,
        fields.join("_"),
        if unique { "unique" } else { "lookup" }
    );
    let columns: Vec<String> = fields.iter().map(|field| query::field_expr(field)).collect();
    let sql = format!(
        "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
        if unique { "UNIQUE " } else { "" },
        name,
        collection,
        columns.join(", ")
    );
    sqlx::query(&sql).execute(pool).await?;

    debug!("Ensured index {}", name);
    Ok(())
}

fn validate_collection_name(name: &str) -> Result<()> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(DatabaseError::InvalidCollection(name.to_string()));
    }
    Ok(())
}
