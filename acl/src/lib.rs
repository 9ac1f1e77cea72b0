//! Schema-driven access control core.
//!
//! Clients, roles and delegated keys each carry an access matrix mapping
//! resource names to permission sets. The [`AccessResolver`] combines every
//! client's direct grants with the grants of its role chain and keeps the
//! result in a resolved access table that request handlers query through
//! [`AccessResolver::get`].
//!
//! # Flow
//!
//! 1. A client, role or key is written through its store
//! 2. The store's write hook asks the resolver to rebuild
//! 3. The resolved table is swapped in one transaction
//! 4. Authorization checks read the table; a missing row denies
//! 5. [`PermissionEvaluator`] turns a permission set into a decision and
//!    applies field projections to records
//!
//! # Permission sets
//!
//! Each of the seven access types (`create`, `read`, `update`, `delete`,
//! `readOwn`, `updateOwn`, `deleteOwn`) is denied, fully granted, or granted
//! with a field projection and/or a row filter. Merging grants from several
//! sources only ever broadens access; see [`merge`].

pub mod access;
pub mod client;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod key;
pub mod matrix;
pub mod merge;
pub mod role;
pub mod schema;
pub mod secret;
pub mod store;
pub mod types;
pub mod validation;

pub use access::{
    get_role_chain, AccessListing, AccessResolver, ClientIdentity, GetOptions, ResolvedAccessEntry,
    RoleCache,
};
pub use client::{Client, ClientAccessType, ClientStore, CreateOptions};
pub use config::{AclConfig, CollectionNames};
pub use error::{AclError, Result, ValidationIssue};
pub use evaluator::{Decision, PermissionEvaluator};
pub use key::{Key, KeyStore};
pub use matrix::AccessMatrix;
pub use merge::{combine_access_matrices, merge_fields, resolve_own_types};
pub use role::{Role, RoleStore};
pub use store::{RemovedResults, Results, WriteHook};
pub use types::{Access, AccessType, MatrixOptions, PermissionSet, Projection};

use database::{initialize_database, Database, DocumentStore};
use std::sync::Arc;
use tracing::info;

/// The wired ACL: the three record stores and the resolver listening to them
pub struct Acl {
    pub clients: Arc<ClientStore>,
    pub roles: Arc<RoleStore>,
    pub keys: Arc<KeyStore>,
    pub access: Arc<AccessResolver>,
    config: AclConfig,
}

impl Acl {
    /// Open the database named by `config` and wire every store
    pub async fn open(config: AclConfig) -> Result<Self> {
        let db = initialize_database(config.database_config()).await?;
        Self::from_database(&db, config).await
    }

    /// Wire every store over collections of an open database
    pub async fn from_database(db: &Database, config: AclConfig) -> Result<Self> {
        let names = &config.collections;
        let clients = db
            .collection_with(&names.clients, &ClientStore::indexes())
            .await?;
        let roles = db.collection_with(&names.roles, &RoleStore::indexes()).await?;
        let keys = db.collection_with(&names.keys, &KeyStore::indexes()).await?;
        let access = db
            .collection_with(&names.access, &AccessResolver::indexes())
            .await?;

        Ok(Self::from_stores(
            Arc::new(clients),
            Arc::new(roles),
            Arc::new(keys),
            Arc::new(access),
            config,
        ))
    }

    /// Wire every store over arbitrary document stores
    pub fn from_stores(
        clients: Arc<dyn DocumentStore>,
        roles: Arc<dyn DocumentStore>,
        keys: Arc<dyn DocumentStore>,
        access: Arc<dyn DocumentStore>,
        config: AclConfig,
    ) -> Self {
        let roles = Arc::new(RoleStore::new(roles));
        let clients = Arc::new(
            ClientStore::new(clients, roles.clone()).with_hash_secrets(config.hash_secrets),
        );
        let keys = Arc::new(
            KeyStore::new(keys, clients.clone())
                .with_token_display_length(config.token_display_length),
        );
        let access = Arc::new(AccessResolver::new(
            access,
            clients.clone(),
            roles.clone(),
            keys.clone(),
        ));
        access.install_hooks();

        info!("ACL ready (secret hashing: {})", config.hash_secrets);

        Self {
            clients,
            roles,
            keys,
            access,
            config,
        }
    }

    pub fn config(&self) -> &AclConfig {
        &self.config
    }
}
