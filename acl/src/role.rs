//! Named roles with their own access matrix and an optional parent.
//!
//! Roles form a forest through `extends`. The store keeps it a forest: a
//! parent must exist when it is set, and an update that would make a role its
//! own ancestor is rejected.

use crate::error::{AclError, Result, ValidationIssue};
use crate::matrix::AccessMatrix;
use crate::schema::{Field, FieldType, Schema, ValidationMode};
use crate::store::{
    document, optional_str, required_str, stored_matrix, Results, WriteHook, WriteNotifier,
};
use crate::types::{MatrixOptions, PermissionSet};
use crate::validation::validate_permission_set;
use database::{DatabaseError, DeleteResults, Document, DocumentStore, FindOptions, Indexes};
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Role {
    pub name: String,
    pub extends: Option<String>,
    pub resources: AccessMatrix,
}

impl Role {
    fn from_document(doc: &Document, collection: &str) -> Result<Self> {
        Ok(Self {
            name: required_str(doc, collection, "name")?,
            extends: optional_str(doc, "extends"),
            resources: stored_matrix(doc, collection),
        })
    }

    fn to_document(&self) -> Document {
        document([
            ("name", json!(self.name)),
            ("extends", json!(self.extends)),
            ("resources", self.resources.get_all(&MatrixOptions::stored())),
        ])
    }
}

fn create_schema() -> Schema {
    Schema::new(vec![
        Field::required("name", FieldType::String),
        Field::optional("extends", FieldType::NullableString),
        Field::optional("resources", FieldType::AccessMatrix),
    ])
}

fn update_schema() -> Schema {
    Schema::new(vec![
        Field::optional("name", FieldType::String).writable(false),
        Field::optional("extends", FieldType::NullableString),
    ])
}

fn validate_role_name(name: &str) -> Result<()> {
    if name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        Ok(())
    } else {
        Err(AclError::Validation(vec![ValidationIssue::new(
            "INVALID_ROLE_NAME",
            "name",
            "role names may only contain letters, digits, '_' and '-'",
        )]))
    }
}

pub struct RoleStore {
    store: Arc<dyn DocumentStore>,
    notifier: WriteNotifier,
}

impl RoleStore {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            notifier: WriteNotifier::default(),
        }
    }

    /// Indexes the role collection is opened with
    pub fn indexes() -> Indexes {
        Indexes::new().unique("name").lookup(["extends"])
    }

    /// Install or clear the hook run after every write
    pub fn set_on_write(&self, hook: Option<Arc<dyn WriteHook>>) {
        self.notifier.set(hook);
    }

    pub async fn create(&self, input: &JsonValue) -> Result<Results<Role>> {
        create_schema().validate_document(input, ValidationMode::Create)?;

        let name = input["name"].as_str().unwrap_or_default().to_string();
        validate_role_name(&name)?;

        if self.find_one(&name).await?.is_some() {
            return Err(AclError::RoleExists(name));
        }

        let extends = input.get("extends").and_then(JsonValue::as_str).map(String::from);
        if let Some(parent) = &extends {
            if self.find_one(parent).await?.is_none() {
                return Err(AclError::InvalidParentRole(parent.clone()));
            }
        }

        let resources = match input.get("resources") {
            Some(value) => AccessMatrix::from_json(value)?,
            None => AccessMatrix::new(),
        };

        let role = Role {
            name,
            extends,
            resources,
        };
        self.store
            .create(vec![role.to_document()])
            .await
            .map_err(|e| match e {
                DatabaseError::Duplicate { .. } => AclError::RoleExists(role.name.clone()),
                other => AclError::Database(other),
            })?;
        info!("Created role '{}'", role.name);

        self.notify().await?;
        Ok(Results::one(role))
    }

    /// Roles by name, or every role when `names` is `None`
    pub async fn get(&self, names: Option<&[String]>) -> Result<Results<Role>> {
        let query = match names {
            Some(names) => document([("name", json!({ "$in": names }))]),
            None => Document::new(),
        };

        let collection = self.store.collection();
        let results = self
            .store
            .find(&query, &FindOptions::sorted_by("name"))
            .await?
            .results
            .iter()
            .map(|doc| Role::from_document(doc, collection))
            .collect::<Result<Vec<_>>>()?;

        Ok(Results { results })
    }

    pub async fn get_one(&self, name: &str) -> Result<Role> {
        self.find_one(name)
            .await?
            .ok_or_else(|| AclError::RoleNotFound(name.to_string()))
    }

    /// Names from `names` that don't exist
    pub async fn missing(&self, names: &[String]) -> Result<Vec<String>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let found: HashSet<String> = self
            .get(Some(names))
            .await?
            .results
            .into_iter()
            .map(|role| role.name)
            .collect();

        Ok(names
            .iter()
            .filter(|name| !found.contains(*name))
            .cloned()
            .collect())
    }

    /// Change a role's parent. `null` detaches it.
    pub async fn update(&self, name: &str, input: &JsonValue) -> Result<Results<Role>> {
        update_schema().validate_document(input, ValidationMode::Update)?;

        let mut role = self.get_one(name).await?;

        if let Some(value) = input.get("extends") {
            let parent = value.as_str().map(String::from);
            if let Some(parent) = &parent {
                self.check_parent(name, parent).await?;
            }
            role.extends = parent;
        }

        self.store
            .update(
                &document([("name", json!(name))]),
                &document([("extends", json!(role.extends))]),
            )
            .await?;
        info!("Updated role '{}'", name);

        self.notify().await?;
        Ok(Results::one(role))
    }

    /// Delete a role. Children are detached, not deleted.
    pub async fn delete(&self, name: &str) -> Result<DeleteResults> {
        let deleted = self.store.delete(&document([("name", json!(name))])).await?;
        if deleted.deleted_count == 0 {
            return Err(AclError::RoleNotFound(name.to_string()));
        }

        let detached = self
            .store
            .update(
                &document([("extends", json!(name))]),
                &document([("extends", JsonValue::Null)]),
            )
            .await?;
        info!(
            "Deleted role '{}', detached {} child role(s)",
            name,
            detached.results.len()
        );

        self.notify().await?;
        Ok(deleted)
    }

    pub async fn resource_add(
        &self,
        name: &str,
        resource: &str,
        access: &JsonValue,
    ) -> Result<Results<Role>> {
        validate_permission_set(access)?;

        let mut role = self.get_one(name).await?;
        if role.resources.contains(resource) {
            return Err(AclError::RoleHasResource {
                role: name.to_string(),
                resource: resource.to_string(),
            });
        }

        role.resources.set(resource, PermissionSet::from_json(access));
        self.save_resources(&role).await?;
        Ok(Results::one(role))
    }

    pub async fn resource_remove(&self, name: &str, resource: &str) -> Result<Results<Role>> {
        let mut role = self.get_one(name).await?;
        if role.resources.remove(resource).is_none() {
            return Err(AclError::RoleDoesNotHaveResource {
                role: name.to_string(),
                resource: resource.to_string(),
            });
        }

        self.save_resources(&role).await?;
        Ok(Results::one(role))
    }

    /// Shallow-merge `access` onto an existing resource grant
    pub async fn resource_update(
        &self,
        name: &str,
        resource: &str,
        access: &JsonValue,
    ) -> Result<Results<Role>> {
        validate_permission_set(access)?;

        let mut role = self.get_one(name).await?;
        if !role.resources.contains(resource) {
            return Err(AclError::RoleDoesNotHaveResource {
                role: name.to_string(),
                resource: resource.to_string(),
            });
        }

        role.resources.set(resource, PermissionSet::from_json(access));
        self.save_resources(&role).await?;
        Ok(Results::one(role))
    }

    async fn find_one(&self, name: &str) -> Result<Option<Role>> {
        let results = self
            .store
            .find(&document([("name", json!(name))]), &FindOptions::default().with_limit(1))
            .await?
            .results;

        results
            .first()
            .map(|doc| Role::from_document(doc, self.store.collection()))
            .transpose()
    }

    /// Walk up from `parent`; reaching `name` means the link would close a cycle
    async fn check_parent(&self, name: &str, parent: &str) -> Result<()> {
        let invalid = || AclError::InvalidParentRole(parent.to_string());

        let mut seen = HashSet::new();
        let mut cursor = Some(parent.to_string());

        while let Some(current) = cursor {
            if current == name {
                return Err(invalid());
            }
            if !seen.insert(current.clone()) {
                break;
            }
            cursor = match self.find_one(&current).await? {
                Some(role) => role.extends,
                None if current == parent => return Err(invalid()),
                None => None,
            };
        }

        debug!("Role '{}' may extend '{}'", name, parent);
        Ok(())
    }

    async fn save_resources(&self, role: &Role) -> Result<()> {
        self.store
            .update(
                &document([("name", json!(role.name))]),
                &document([("resources", role.resources.get_all(&MatrixOptions::stored()))]),
            )
            .await?;
        debug!("Saved resources of role '{}'", role.name);
        self.notify().await
    }

    async fn notify(&self) -> Result<()> {
        self.notifier.notify(self.store.collection()).await
    }
}
