//! Client identities: id, secret, direct grants and role membership.

use crate::error::{AclError, Result, ValidationIssue};
use crate::matrix::AccessMatrix;
use crate::role::RoleStore;
use crate::schema::{Field, FieldType, Schema, ValidationMode};
use crate::secret::{hash_secret, verify_plain_secret, verify_secret};
use crate::store::{
    document, required_str, stored_matrix, string_list, RemovedResults, Results, WriteHook,
    WriteNotifier,
};
use crate::types::{MatrixOptions, PermissionSet};
use crate::validation::validate_permission_set;
use database::{DatabaseError, DeleteResults, Document, DocumentStore, FindOptions, Indexes};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as JsonValue};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Whether a client goes through the access table or bypasses it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientAccessType {
    #[default]
    User,
    Admin,
}

impl ClientAccessType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientAccessType::User => "user",
            ClientAccessType::Admin => "admin",
        }
    }
}

impl fmt::Display for ClientAccessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClientAccessType {
    type Err = AclError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(ClientAccessType::User),
            "admin" => Ok(ClientAccessType::Admin),
            other => Err(AclError::Validation(vec![ValidationIssue::new(
                "INVALID_ACCESS_TYPE",
                "accessType",
                format!("'{}' is not one of: user, admin", other),
            )])),
        }
    }
}

/// A client as returned to callers. The secret never leaves the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    pub client_id: String,
    pub access_type: ClientAccessType,
    pub resources: AccessMatrix,
    pub roles: Vec<String>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub data: Map<String, JsonValue>,
}

impl Client {
    pub fn is_admin(&self) -> bool {
        self.access_type == ClientAccessType::Admin
    }
}

/// Options for [`ClientStore::create`]
#[derive(Debug, Clone, Copy, Default)]
pub struct CreateOptions {
    /// Accept `accessType` in the input. Only trusted callers set this.
    pub allow_access_type: bool,
}

struct StoredSecret {
    value: String,
    hashed: bool,
}

fn from_document(doc: &Document, collection: &str) -> Result<(Client, StoredSecret)> {
    let access_type = match doc.get("accessType").and_then(JsonValue::as_str) {
        Some(value) => value.parse::<ClientAccessType>().unwrap_or_else(|_| {
            warn!("Unknown stored access type '{}', treating as user", value);
            ClientAccessType::User
        }),
        None => ClientAccessType::User,
    };

    let client = Client {
        client_id: required_str(doc, collection, "clientId")?,
        access_type,
        resources: stored_matrix(doc, collection),
        roles: string_list(doc, "roles"),
        data: doc
            .get("data")
            .and_then(JsonValue::as_object)
            .cloned()
            .unwrap_or_default(),
    };
    let secret = StoredSecret {
        value: required_str(doc, collection, "secret")?,
        hashed: doc.get("_hashed").and_then(JsonValue::as_bool).unwrap_or(false),
    };

    Ok((client, secret))
}

fn to_document(client: &Client, secret: &StoredSecret) -> Document {
    document([
        ("clientId", json!(client.client_id)),
        ("secret", json!(secret.value)),
        ("_hashed", json!(secret.hashed)),
        ("accessType", json!(client.access_type)),
        ("resources", client.resources.get_all(&MatrixOptions::stored())),
        ("roles", json!(client.roles)),
        ("data", JsonValue::Object(client.data.clone())),
    ])
}

fn create_schema(options: CreateOptions) -> Schema {
    Schema::new(vec![
        Field::required("clientId", FieldType::String),
        Field::required("secret", FieldType::String),
        Field::optional("accessType", FieldType::String).writable(options.allow_access_type),
        Field::optional("resources", FieldType::AccessMatrix),
        Field::optional("roles", FieldType::StringArray),
        Field::optional("data", FieldType::Object),
    ])
}

fn update_schema() -> Schema {
    Schema::new(vec![
        Field::optional("clientId", FieldType::String).writable(false),
        Field::optional("accessType", FieldType::String).writable(false),
        Field::optional("secret", FieldType::String),
        Field::optional("currentSecret", FieldType::String),
        Field::optional("data", FieldType::Object),
    ])
}

fn unique(names: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(names.len());
    for name in names {
        if !out.contains(&name) {
            out.push(name);
        }
    }
    out
}

pub struct ClientStore {
    store: Arc<dyn DocumentStore>,
    roles: Arc<RoleStore>,
    hash_secrets: bool,
    notifier: WriteNotifier,
}

impl ClientStore {
    pub fn new(store: Arc<dyn DocumentStore>, roles: Arc<RoleStore>) -> Self {
        Self {
            store,
            roles,
            hash_secrets: true,
            notifier: WriteNotifier::default(),
        }
    }

    pub fn with_hash_secrets(mut self, hash_secrets: bool) -> Self {
        self.hash_secrets = hash_secrets;
        self
    }

    /// Indexes the client collection is opened with
    pub fn indexes() -> Indexes {
        Indexes::new().unique("clientId")
    }

    /// Install or clear the hook run after every write
    pub fn set_on_write(&self, hook: Option<Arc<dyn WriteHook>>) {
        self.notifier.set(hook);
    }

    pub async fn create(&self, input: &JsonValue, options: CreateOptions) -> Result<Results<Client>> {
        create_schema(options).validate_document(input, ValidationMode::Create)?;

        let client_id = input["clientId"].as_str().unwrap_or_default().to_string();
        let secret = input["secret"].as_str().unwrap_or_default();

        let access_type = match input.get("accessType").and_then(JsonValue::as_str) {
            Some(value) => value.parse()?,
            None => ClientAccessType::User,
        };

        if self.find_one(&client_id).await?.is_some() {
            return Err(AclError::ClientExists(client_id));
        }

        let roles = unique(
            input
                .get("roles")
                .and_then(JsonValue::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(JsonValue::as_str)
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
        );
        let missing = self.roles.missing(&roles).await?;
        if !missing.is_empty() {
            return Err(AclError::InvalidRole(missing));
        }

        let resources = match input.get("resources") {
            Some(value) => AccessMatrix::from_json(value)?,
            None => AccessMatrix::new(),
        };

        let client = Client {
            client_id,
            access_type,
            resources,
            roles,
            data: input
                .get("data")
                .and_then(JsonValue::as_object)
                .cloned()
                .unwrap_or_default(),
        };
        let secret = self.encode_secret(secret)?;

        self.store
            .create(vec![to_document(&client, &secret)])
            .await
            .map_err(|e| match e {
                DatabaseError::Duplicate { .. } => AclError::ClientExists(client.client_id.clone()),
                other => AclError::Database(other),
            })?;
        info!(
            "Created {} client '{}'",
            client.access_type, client.client_id
        );

        self.notify().await?;
        Ok(Results::one(client))
    }

    /// One client by id, or every client when `client_id` is `None`
    pub async fn get(&self, client_id: Option<&str>) -> Result<Results<Client>> {
        let query = match client_id {
            Some(id) => document([("clientId", json!(id))]),
            None => Document::new(),
        };

        let collection = self.store.collection();
        let results = self
            .store
            .find(&query, &FindOptions::sorted_by("clientId"))
            .await?
            .results
            .iter()
            .map(|doc| from_document(doc, collection).map(|(client, _)| client))
            .collect::<Result<Vec<_>>>()?;

        Ok(Results { results })
    }

    pub async fn get_one(&self, client_id: &str) -> Result<Client> {
        self.find_one(client_id)
            .await?
            .map(|(client, _)| client)
            .ok_or_else(|| AclError::ClientNotFound(client_id.to_string()))
    }

    /// Update the secret or the free-form data of a client.
    ///
    /// Changing the secret needs `currentSecret`. Keys of `data` set to
    /// `null` are removed.
    pub async fn update(&self, client_id: &str, input: &JsonValue) -> Result<Results<Client>> {
        update_schema().validate_document(input, ValidationMode::Update)?;

        let (mut client, stored) = self
            .find_one(client_id)
            .await?
            .ok_or_else(|| AclError::ClientNotFound(client_id.to_string()))?;

        let mut changes = Document::new();

        if let Some(secret) = input.get("secret").and_then(JsonValue::as_str) {
            let current = input
                .get("currentSecret")
                .and_then(JsonValue::as_str)
                .ok_or_else(|| AclError::MissingFields(vec!["currentSecret".to_string()]))?;
            if !self.check_secret(current, &stored)? {
                return Err(AclError::InvalidSecret);
            }

            let secret = self.encode_secret(secret)?;
            changes.insert("secret".to_string(), json!(secret.value));
            changes.insert("_hashed".to_string(), json!(secret.hashed));
        }

        if let Some(data) = input.get("data").and_then(JsonValue::as_object) {
            for (key, value) in data {
                if value.is_null() {
                    client.data.remove(key);
                } else {
                    client.data.insert(key.clone(), value.clone());
                }
            }
            changes.insert("data".to_string(), JsonValue::Object(client.data.clone()));
        }

        if !changes.is_empty() {
            self.store
                .update(&document([("clientId", json!(client_id))]), &changes)
                .await?;
            info!("Updated client '{}'", client_id);
            self.notify().await?;
        }

        Ok(Results::one(client))
    }

    pub async fn delete(&self, client_id: &str) -> Result<DeleteResults> {
        let deleted = self
            .store
            .delete(&document([("clientId", json!(client_id))]))
            .await?;
        if deleted.deleted_count == 0 {
            return Err(AclError::ClientNotFound(client_id.to_string()));
        }
        info!("Deleted client '{}'", client_id);

        self.notify().await?;
        Ok(deleted)
    }

    /// Check a client's credentials.
    ///
    /// An unknown client and a wrong secret both fail with `Unauthorised`.
    pub async fn authenticate(&self, client_id: &str, secret: &str) -> Result<Client> {
        let Some((client, stored)) = self.find_one(client_id).await? else {
            debug!("Authentication failed for unknown client '{}'", client_id);
            return Err(AclError::Unauthorised);
        };

        match self.check_secret(secret, &stored) {
            Ok(true) => Ok(client),
            Ok(false) => {
                debug!("Authentication failed for client '{}'", client_id);
                Err(AclError::Unauthorised)
            }
            Err(e) => {
                warn!("Stored secret of client '{}' is unreadable: {}", client_id, e);
                Err(AclError::Unauthorised)
            }
        }
    }

    pub async fn resource_add(
        &self,
        client_id: &str,
        resource: &str,
        access: &JsonValue,
    ) -> Result<Results<Client>> {
        validate_permission_set(access)?;

        let mut client = self.get_one(client_id).await?;
        if client.resources.contains(resource) {
            return Err(AclError::ClientHasResource {
                client: client_id.to_string(),
                resource: resource.to_string(),
            });
        }

        client.resources.set(resource, PermissionSet::from_json(access));
        self.save(&client, "resources").await?;
        Ok(Results::one(client))
    }

    pub async fn resource_remove(&self, client_id: &str, resource: &str) -> Result<Results<Client>> {
        let mut client = self.get_one(client_id).await?;
        if client.resources.remove(resource).is_none() {
            return Err(AclError::ClientDoesNotHaveResource {
                client: client_id.to_string(),
                resource: resource.to_string(),
            });
        }

        self.save(&client, "resources").await?;
        Ok(Results::one(client))
    }

    /// Shallow-merge `access` onto an existing resource grant
    pub async fn resource_update(
        &self,
        client_id: &str,
        resource: &str,
        access: &JsonValue,
    ) -> Result<Results<Client>> {
        validate_permission_set(access)?;

        let mut client = self.get_one(client_id).await?;
        if !client.resources.contains(resource) {
            return Err(AclError::ClientDoesNotHaveResource {
                client: client_id.to_string(),
                resource: resource.to_string(),
            });
        }

        client.resources.set(resource, PermissionSet::from_json(access));
        self.save(&client, "resources").await?;
        Ok(Results::one(client))
    }

    /// Add roles to a client. Every role must exist.
    pub async fn role_add(&self, client_id: &str, roles: &[String]) -> Result<Results<Client>> {
        let mut client = self.get_one(client_id).await?;

        let missing = self.roles.missing(roles).await?;
        if !missing.is_empty() {
            return Err(AclError::InvalidRole(missing));
        }

        let before = client.roles.len();
        client.roles = unique(client.roles.into_iter().chain(roles.iter().cloned()).collect());

        if client.roles.len() != before {
            self.save(&client, "roles").await?;
        }
        Ok(Results::one(client))
    }

    /// Remove roles from a client, reporting which ones it actually had
    pub async fn role_remove(
        &self,
        client_id: &str,
        roles: &[String],
    ) -> Result<RemovedResults<Client>> {
        let mut client = self.get_one(client_id).await?;

        let removed: Vec<String> = unique(
            roles
                .iter()
                .filter(|role| client.roles.contains(role))
                .cloned()
                .collect(),
        );
        client.roles.retain(|role| !removed.contains(role));

        if !removed.is_empty() {
            self.save(&client, "roles").await?;
        }
        Ok(RemovedResults {
            removed,
            results: vec![client],
        })
    }

    async fn find_one(&self, client_id: &str) -> Result<Option<(Client, StoredSecret)>> {
        let results = self
            .store
            .find(
                &document([("clientId", json!(client_id))]),
                &FindOptions::default().with_limit(1),
            )
            .await?
            .results;

        results
            .first()
            .map(|doc| from_document(doc, self.store.collection()))
            .transpose()
    }

    fn encode_secret(&self, secret: &str) -> Result<StoredSecret> {
        if self.hash_secrets {
            Ok(StoredSecret {
                value: hash_secret(secret)?,
                hashed: true,
            })
        } else {
            Ok(StoredSecret {
                value: secret.to_string(),
                hashed: false,
            })
        }
    }

    fn check_secret(&self, candidate: &str, stored: &StoredSecret) -> Result<bool> {
        if stored.hashed {
            verify_secret(candidate, &stored.value)
        } else {
            Ok(verify_plain_secret(candidate, &stored.value))
        }
    }

    async fn save(&self, client: &Client, field: &str) -> Result<()> {
        let value = match field {
            "roles" => json!(client.roles),
            _ => client.resources.get_all(&MatrixOptions::stored()),
        };
        self.store
            .update(
                &document([("clientId", json!(client.client_id))]),
                &document([(field, value)]),
            )
            .await?;
        debug!("Saved {} of client '{}'", field, client.client_id);
        self.notify().await
    }

    async fn notify(&self) -> Result<()> {
        self.notifier.notify(self.store.collection()).await
    }
}
