//! Delegated access keys.
//!
//! A key either impersonates one client (`client` is set) or is top-level and
//! carries its own grants, attributed to the client that created it.

use crate::client::ClientStore;
use crate::error::{AclError, Result};
use crate::matrix::AccessMatrix;
use crate::schema::{Field, FieldType, Schema, ValidationMode};
use crate::secret::{display_token, generate_token};
use crate::store::{
    document, optional_str, required_str, stored_matrix, Results, WriteHook, WriteNotifier,
};
use crate::types::{MatrixOptions, PermissionSet};
use crate::validation::validate_permission_set;
use chrono::{DateTime, Utc};
use database::{DeleteResults, Document, DocumentStore, FindOptions, Indexes};
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq)]
pub struct Key {
    pub id: String,
    pub token: String,
    pub description: Option<String>,
    pub resources: AccessMatrix,
    /// Client this key impersonates
    pub client: Option<String>,
    /// Client that created the key
    pub created_by: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl Key {
    pub fn is_top_level(&self) -> bool {
        self.client.is_none()
    }

    /// Output form. The token is truncated unless `full_token` is set.
    pub fn to_json(&self, token_display_length: usize, full_token: bool) -> JsonValue {
        let token = if full_token {
            self.token.clone()
        } else {
            display_token(&self.token, token_display_length)
        };

        json!({
            "_id": self.id,
            "token": token,
            "description": self.description,
            "client": self.client,
            "resources": self.resources.get_all(&MatrixOptions::default()),
            "_createdBy": self.created_by,
            "_createdAt": self.created_at.map(|at| at.to_rfc3339()),
        })
    }

    fn from_document(doc: &Document, collection: &str) -> Result<Self> {
        Ok(Self {
            id: required_str(doc, collection, "_id")?,
            token: required_str(doc, collection, "token")?,
            description: optional_str(doc, "description"),
            resources: stored_matrix(doc, collection),
            client: optional_str(doc, "client"),
            created_by: optional_str(doc, "_createdBy"),
            created_at: optional_str(doc, "_createdAt")
                .and_then(|at| DateTime::parse_from_rfc3339(&at).ok())
                .map(|at| at.with_timezone(&Utc)),
        })
    }
}

fn create_schema() -> Schema {
    Schema::new(vec![
        Field::optional("description", FieldType::NullableString),
        Field::optional("client", FieldType::NullableString),
        Field::optional("resources", FieldType::AccessMatrix),
    ])
}

fn update_schema() -> Schema {
    Schema::new(vec![Field::optional("description", FieldType::NullableString)])
}

pub struct KeyStore {
    store: Arc<dyn DocumentStore>,
    clients: Arc<ClientStore>,
    token_display_length: usize,
    notifier: WriteNotifier,
}

impl KeyStore {
    pub fn new(store: Arc<dyn DocumentStore>, clients: Arc<ClientStore>) -> Self {
        Self {
            store,
            clients,
            token_display_length: 5,
            notifier: WriteNotifier::default(),
        }
    }

    pub fn with_token_display_length(mut self, length: usize) -> Self {
        self.token_display_length = length;
        self
    }

    pub fn token_display_length(&self) -> usize {
        self.token_display_length
    }

    /// Indexes the key collection is opened with
    pub fn indexes() -> Indexes {
        Indexes::new().unique("token").lookup(["_createdBy"])
    }

    /// Install or clear the hook run after every write
    pub fn set_on_write(&self, hook: Option<Arc<dyn WriteHook>>) {
        self.notifier.set(hook);
    }

    /// Create a key with a fresh token. `created_by` is the acting client.
    pub async fn create(&self, input: &JsonValue, created_by: Option<&str>) -> Result<Results<Key>> {
        create_schema().validate_document(input, ValidationMode::Create)?;

        let client = input.get("client").and_then(JsonValue::as_str).map(String::from);
        if let Some(client) = &client {
            self.clients.get_one(client).await?;
        }

        let resources = match input.get("resources") {
            Some(value) => AccessMatrix::from_json(value)?,
            None => AccessMatrix::new(),
        };

        let doc = document([
            ("token", json!(generate_token())),
            ("description", input.get("description").cloned().unwrap_or(JsonValue::Null)),
            ("client", json!(client)),
            ("resources", resources.get_all(&MatrixOptions::stored())),
            ("_createdBy", json!(created_by)),
            ("_createdAt", json!(Utc::now().to_rfc3339())),
        ]);

        let collection = self.store.collection();
        let results = self
            .store
            .create(vec![doc])
            .await?
            .results
            .iter()
            .map(|doc| Key::from_document(doc, collection))
            .collect::<Result<Vec<_>>>()?;

        if let Some(key) = results.first() {
            match &key.client {
                Some(client) => info!("Created key {} bound to client '{}'", key.id, client),
                None => info!("Created top-level key {}", key.id),
            }
        }

        self.notify().await?;
        Ok(Results { results })
    }

    /// One key by id, or every key when `id` is `None`
    pub async fn get(&self, id: Option<&str>) -> Result<Results<Key>> {
        let query = match id {
            Some(id) => document([("_id", json!(id))]),
            None => Document::new(),
        };
        self.find(&query).await.map(|results| Results { results })
    }

    pub async fn get_one(&self, id: &str) -> Result<Key> {
        self.find(&document([("_id", json!(id))]))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AclError::KeyNotFound(id.to_string()))
    }

    /// Keys created by a client
    pub async fn created_by(&self, client_id: &str) -> Result<Results<Key>> {
        self.find(&document([("_createdBy", json!(client_id))]))
            .await
            .map(|results| Results { results })
    }

    /// Resolve a bearer token
    pub async fn find_by_token(&self, token: &str) -> Result<Option<Key>> {
        Ok(self
            .find(&document([("token", json!(token))]))
            .await?
            .into_iter()
            .next())
    }

    pub async fn update(&self, id: &str, input: &JsonValue) -> Result<Results<Key>> {
        update_schema().validate_document(input, ValidationMode::Update)?;

        let mut key = self.get_one(id).await?;
        if let Some(description) = input.get("description") {
            key.description = description.as_str().map(String::from);
            self.store
                .update(
                    &document([("_id", json!(id))]),
                    &document([("description", json!(key.description))]),
                )
                .await?;
            info!("Updated key {}", id);
            self.notify().await?;
        }

        Ok(Results::one(key))
    }

    pub async fn delete(&self, id: &str) -> Result<DeleteResults> {
        let deleted = self.store.delete(&document([("_id", json!(id))])).await?;
        if deleted.deleted_count == 0 {
            return Err(AclError::KeyNotFound(id.to_string()));
        }
        info!("Deleted key {}", id);

        self.notify().await?;
        Ok(deleted)
    }

    pub async fn resource_add(
        &self,
        id: &str,
        resource: &str,
        access: &JsonValue,
    ) -> Result<Results<Key>> {
        validate_permission_set(access)?;

        let mut key = self.get_one(id).await?;
        if key.resources.contains(resource) {
            return Err(AclError::KeyHasResource {
                key: id.to_string(),
                resource: resource.to_string(),
            });
        }

        key.resources.set(resource, PermissionSet::from_json(access));
        self.save_resources(&key).await?;
        Ok(Results::one(key))
    }

    pub async fn resource_remove(&self, id: &str, resource: &str) -> Result<Results<Key>> {
        let mut key = self.get_one(id).await?;
        if key.resources.remove(resource).is_none() {
            return Err(AclError::KeyDoesNotHaveResource {
                key: id.to_string(),
                resource: resource.to_string(),
            });
        }

        self.save_resources(&key).await?;
        Ok(Results::one(key))
    }

    pub async fn resource_update(
        &self,
        id: &str,
        resource: &str,
        access: &JsonValue,
    ) -> Result<Results<Key>> {
        validate_permission_set(access)?;

        let mut key = self.get_one(id).await?;
        if !key.resources.contains(resource) {
            return Err(AclError::KeyDoesNotHaveResource {
                key: id.to_string(),
                resource: resource.to_string(),
            });
        }

        key.resources.set(resource, PermissionSet::from_json(access));
        self.save_resources(&key).await?;
        Ok(Results::one(key))
    }

    async fn find(&self, query: &Document) -> Result<Vec<Key>> {
        let collection = self.store.collection();
        self.store
            .find(query, &FindOptions::sorted_by("_createdAt"))
            .await?
            .results
            .iter()
            .map(|doc| Key::from_document(doc, collection))
            .collect()
    }

    async fn save_resources(&self, key: &Key) -> Result<()> {
        self.store
            .update(
                &document([("_id", json!(key.id))]),
                &document([("resources", key.resources.get_all(&MatrixOptions::stored()))]),
            )
            .await?;
        debug!("Saved resources of key {}", key.id);
        self.notify().await
    }

    async fn notify(&self) -> Result<()> {
        self.notifier.notify(self.store.collection()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::CreateOptions;
    use crate::role::RoleStore;
    use crate::types::AccessType;
    use database::Database;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, KeyStore) {
        let dir = TempDir::new().unwrap();
        let db = Database::new(&dir.path().join("acl.db"), 1).await.unwrap();
        let roles = db.collection_with("roles", &RoleStore::indexes()).await.unwrap();
        let roles = Arc::new(RoleStore::new(Arc::new(roles)));
        let clients = db.collection_with("clients", &ClientStore::indexes()).await.unwrap();
        let clients = Arc::new(ClientStore::new(Arc::new(clients), roles).with_hash_secrets(false));
        clients
            .create(&json!({"clientId": "owner", "secret": "pw"}), CreateOptions::default())
            .await
            .unwrap();

        let keys = db.collection_with("keys", &KeyStore::indexes()).await.unwrap();
        let keys = KeyStore::new(Arc::new(keys), clients);
        (dir, keys)
    }

    #[tokio::test]
    async fn test_create_top_level_key() {
        let (_dir, keys) = setup().await;

        let created = keys
            .create(
                &json!({"description": "reporting", "resources": {"docs": {"read": true}}}),
                Some("owner"),
            )
            .await
            .unwrap();
        let key = &created.results[0];

        assert!(key.is_top_level());
        assert_eq!(key.created_by.as_deref(), Some("owner"));
        assert!(key.created_at.is_some());
        assert!(key.resources.get("docs").unwrap().is_granted(AccessType::Read));

        let found = keys.find_by_token(&key.token).await.unwrap().unwrap();
        assert_eq!(found.id, key.id);
        assert!(keys.find_by_token("nope").await.unwrap().is_none());

        assert_eq!(keys.created_by("owner").await.unwrap().results.len(), 1);
    }

    #[tokio::test]
    async fn test_bound_key_requires_existing_client() {
        let (_dir, keys) = setup().await;

        let bound = keys.create(&json!({"client": "owner"}), None).await.unwrap();
        assert!(!bound.results[0].is_top_level());

        assert!(matches!(
            keys.create(&json!({"client": "ghost"}), None).await,
            Err(AclError::ClientNotFound(_))
        ));
        assert!(matches!(
            keys.create(&json!({"token": "chosen"}), None).await,
            Err(AclError::InvalidFields(_))
        ));
    }

    #[tokio::test]
    async fn test_token_display() {
        let (_dir, keys) = setup().await;
        let key = keys.create(&json!({}), None).await.unwrap().results.remove(0);

        let shown = key.to_json(keys.token_display_length(), false);
        let token = shown["token"].as_str().unwrap();
        assert_eq!(token.len(), 8);
        assert!(token.starts_with("..."));
        assert!(key.token.ends_with(&token[3..]));

        let full = key.to_json(5, true);
        assert_eq!(full["token"], key.token.as_str());
    }

    #[tokio::test]
    async fn test_update_delete_and_resources() {
        let (_dir, keys) = setup().await;
        let id = keys.create(&json!({}), Some("owner")).await.unwrap().results[0]
            .id
            .clone();

        let updated = keys
            .update(&id, &json!({"description": "nightly export"}))
            .await
            .unwrap();
        assert_eq!(updated.results[0].description.as_deref(), Some("nightly export"));

        keys.resource_add(&id, "docs", &json!({"read": true})).await.unwrap();
        assert!(matches!(
            keys.resource_add(&id, "docs", &json!({"read": true})).await,
            Err(AclError::KeyHasResource { .. })
        ));
        keys.resource_update(&id, "docs", &json!({"delete": true}))
            .await
            .unwrap();
        let key = keys.get_one(&id).await.unwrap();
        assert!(key.resources.get("docs").unwrap().is_granted(AccessType::Delete));

        keys.resource_remove(&id, "docs").await.unwrap();
        assert!(matches!(
            keys.resource_remove(&id, "docs").await,
            Err(AclError::KeyDoesNotHaveResource { .. })
        ));

        keys.delete(&id).await.unwrap();
        assert!(matches!(keys.get_one(&id).await, Err(AclError::KeyNotFound(_))));
        assert!(matches!(keys.delete(&id).await, Err(AclError::KeyNotFound(_))));
    }
}
