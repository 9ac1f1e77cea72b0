//! The resolved access table and the lookups every authorization check uses.
//!
//! For each client the resolver combines its direct grants with the grants of
//! every role in its role chain (its roles plus all their ancestors) and stores
//! one `(client, resource, access)` row per resource. The table is rebuilt
//! from scratch after every write to the client, role or key stores; a rebuild
//! swaps the whole table in one transaction.
//!
//! Lookups fail closed: a missing row is an empty grant.

use crate::client::{Client, ClientAccessType, ClientStore};
use crate::error::{AclError, Result};
use crate::key::{Key, KeyStore};
use crate::matrix::AccessMatrix;
use crate::merge::{combine_resources, resolve_own_types};
use crate::role::RoleStore;
use crate::store::{document, WriteHook};
use crate::types::{MatrixOptions, PermissionSet};
use async_trait::async_trait;
use database::{Document, DocumentStore, FindOptions, Indexes};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// A role as seen by one rebuild
#[derive(Debug, Clone)]
pub struct CachedRole {
    pub extends: Option<String>,
    pub resources: AccessMatrix,
}

/// Roles fetched during one rebuild, keyed by name. `None` marks a role that
/// was referenced but doesn't exist.
pub type RoleCache = HashMap<String, Option<CachedRole>>;

/// Collect `names` and all of their ancestors, each exactly once.
///
/// Roles missing from `cache` are fetched in one batch per level of the
/// `extends` forest. Already visited roles are never followed again, so the
/// walk terminates even on a cyclic graph.
pub async fn get_role_chain(
    roles: &RoleStore,
    names: &[String],
    cache: &mut RoleCache,
) -> Result<Vec<String>> {
    let mut chain: Vec<String> = Vec::new();
    let mut pending: Vec<String> = names.to_vec();

    while !pending.is_empty() {
        let mut to_fetch: Vec<String> = pending
            .iter()
            .filter(|name| !cache.contains_key(*name))
            .cloned()
            .collect();
        to_fetch.sort();
        to_fetch.dedup();

        if !to_fetch.is_empty() {
            for role in roles.get(Some(&to_fetch)).await?.results {
                cache.insert(
                    role.name.clone(),
                    Some(CachedRole {
                        extends: role.extends,
                        resources: role.resources,
                    }),
                );
            }
            for name in to_fetch {
                cache.entry(name).or_insert_with_key(|name| {
                    warn!("Role '{}' is referenced but does not exist", name);
                    None
                });
            }
        }

        let mut next: Vec<String> = Vec::new();
        for name in pending.drain(..) {
            if chain.contains(&name) {
                continue;
            }
            let Some(Some(role)) = cache.get(&name) else {
                continue;
            };
            if let Some(parent) = &role.extends {
                if !chain.contains(parent) && !next.contains(parent) {
                    next.push(parent.clone());
                }
            }
            chain.push(name);
        }
        pending = next;
    }

    Ok(chain)
}

/// One row of the resolved access table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedAccessEntry {
    pub client: String,
    pub resource: String,
    pub access: PermissionSet,
}

impl ResolvedAccessEntry {
    fn to_document(&self) -> Document {
        document([
            ("client", json!(self.client)),
            ("resource", json!(self.resource)),
            (
                "access",
                self.access
                    .to_json(&MatrixOptions::default().with_stringified_objects()),
            ),
        ])
    }

    fn from_document(doc: &Document) -> Result<Self> {
        Ok(serde_json::from_value(JsonValue::Object(doc.clone()))?)
    }
}

/// The acting client of an authorization check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub client_id: String,
    pub access_type: ClientAccessType,
}

impl ClientIdentity {
    pub fn user(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            access_type: ClientAccessType::User,
        }
    }

    pub fn admin(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            access_type: ClientAccessType::Admin,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.access_type == ClientAccessType::Admin
    }
}

impl From<&Client> for ClientIdentity {
    fn from(client: &Client) -> Self {
        Self {
            client_id: client.client_id.clone(),
            access_type: client.access_type,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetOptions {
    /// Fold `*Own` types into their base type bound to the client
    pub resolve_own_types: bool,
}

impl Default for GetOptions {
    fn default() -> Self {
        Self {
            resolve_own_types: true,
        }
    }
}

impl GetOptions {
    pub fn raw() -> Self {
        Self {
            resolve_own_types: false,
        }
    }
}

/// Everything a client may access
#[derive(Debug, Clone, PartialEq)]
pub enum AccessListing {
    /// Admins: every access type on every resource
    Unrestricted(PermissionSet),
    PerResource(AccessMatrix),
}

impl AccessListing {
    pub fn to_json(&self, options: &MatrixOptions) -> JsonValue {
        match self {
            AccessListing::Unrestricted(set) => json!({ "*": set.to_json(options) }),
            AccessListing::PerResource(matrix) => matrix.get_all(options),
        }
    }
}

pub struct AccessResolver {
    store: Arc<dyn DocumentStore>,
    clients: Arc<ClientStore>,
    roles: Arc<RoleStore>,
    keys: Arc<KeyStore>,
    write_lock: Mutex<()>,
    requested: AtomicU64,
    completed: AtomicU64,
    rebuilds: AtomicU64,
}

impl AccessResolver {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        clients: Arc<ClientStore>,
        roles: Arc<RoleStore>,
        keys: Arc<KeyStore>,
    ) -> Self {
        Self {
            store,
            clients,
            roles,
            keys,
            write_lock: Mutex::new(()),
            requested: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            rebuilds: AtomicU64::new(0),
        }
    }

    /// Indexes the resolved access collection is opened with
    pub fn indexes() -> Indexes {
        Indexes::new().lookup(["client", "resource"])
    }

    /// Rebuild the table after every write to the client, role and key stores
    pub fn install_hooks(self: &Arc<Self>) {
        let hook: Arc<dyn WriteHook> = Arc::new(RecomputeHook {
            resolver: Arc::downgrade(self),
        });
        self.clients.set_on_write(Some(hook.clone()));
        self.roles.set_on_write(Some(hook.clone()));
        self.keys.set_on_write(Some(hook));
    }

    /// Number of rebuilds actually run
    pub fn rebuilds(&self) -> u64 {
        self.rebuilds.load(Ordering::SeqCst)
    }

    /// Bring the table up to date with every write committed so far.
    ///
    /// Rebuilds run one at a time. A caller that was already covered by a
    /// rebuild which started after its request returns without running
    /// another one.
    pub async fn write(&self) -> Result<()> {
        let ticket = self.requested.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = self.write_lock.lock().await;

        if self.completed.load(Ordering::SeqCst) >= ticket {
            debug!("Access rebuild {} already covered", ticket);
            return Ok(());
        }

        let covers = self.requested.load(Ordering::SeqCst);
        self.rebuild().await?;
        self.completed.store(covers, Ordering::SeqCst);
        Ok(())
    }

    /// Alias of [`AccessResolver::write`]
    pub async fn recompute(&self) -> Result<()> {
        self.write().await
    }

    /// Combined matrix of a client: own grants plus all role chain grants
    pub async fn resolve_client(&self, client: &Client, cache: &mut RoleCache) -> Result<AccessMatrix> {
        let chain = get_role_chain(&self.roles, &client.roles, cache).await?;

        let mut matrix = client.resources.clone();
        for name in &chain {
            if let Some(Some(role)) = cache.get(name) {
                matrix = combine_resources(&matrix, &role.resources);
            }
        }
        Ok(matrix)
    }

    async fn rebuild(&self) -> Result<()> {
        let clients = self.clients.get(None).await?.results;
        info!("Rebuilding access table for {} client(s)", clients.len());

        let mut cache = RoleCache::new();
        let mut rows = Vec::new();
        for client in &clients {
            let matrix = self.resolve_client(client, &mut cache).await?;
            rows.extend(matrix.iter().map(|(resource, access)| {
                ResolvedAccessEntry {
                    client: client.client_id.clone(),
                    resource: resource.clone(),
                    access: access.clone(),
                }
                .to_document()
            }));
        }

        let count = rows.len();
        self.store.replace_all(&Document::new(), rows).await?;
        self.rebuilds.fetch_add(1, Ordering::SeqCst);

        info!(
            "Access table rebuilt: {} row(s), {} role(s) resolved",
            count,
            cache.len()
        );
        Ok(())
    }

    /// Permissions of `identity` on `resource`. No row means no access.
    pub async fn get(
        &self,
        identity: &ClientIdentity,
        resource: &str,
        options: GetOptions,
    ) -> Result<PermissionSet> {
        if identity.is_admin() {
            return Ok(PermissionSet::full());
        }

        let query = document([
            ("client", json!(identity.client_id)),
            ("resource", json!(resource)),
        ]);
        let rows = self
            .store
            .find(&query, &FindOptions::default().with_limit(1))
            .await?
            .results;

        let Some(row) = rows.first() else {
            debug!(
                "No access row for client '{}' on '{}'",
                identity.client_id, resource
            );
            return Ok(PermissionSet::new());
        };

        let access = ResolvedAccessEntry::from_document(row)?.access;
        Ok(if options.resolve_own_types {
            resolve_own_types(&access, &identity.client_id)
        } else {
            access
        })
    }

    /// Every resource `identity` has a row for
    pub async fn get_all(&self, identity: &ClientIdentity, options: GetOptions) -> Result<AccessListing> {
        if identity.is_admin() {
            return Ok(AccessListing::Unrestricted(PermissionSet::full()));
        }

        let query = document([("client", json!(identity.client_id))]);
        let mut matrix = AccessMatrix::new();
        for row in self
            .store
            .find(&query, &FindOptions::sorted_by("resource"))
            .await?
            .results
        {
            let entry = ResolvedAccessEntry::from_document(&row)?;
            let access = if options.resolve_own_types {
                resolve_own_types(&entry.access, &identity.client_id)
            } else {
                entry.access
            };
            matrix.replace(&entry.resource, access);
        }

        Ok(AccessListing::PerResource(matrix))
    }

    /// Permissions granted through a key.
    ///
    /// A client-bound key resolves exactly like its client. A top-level key
    /// uses its own matrix, with `*Own` types bound to its creator.
    pub async fn get_for_key(&self, key: &Key, resource: &str, options: GetOptions) -> Result<PermissionSet> {
        if let Some(client_id) = &key.client {
            return match self.clients.get_one(client_id).await {
                Ok(client) => self.get(&ClientIdentity::from(&client), resource, options).await,
                Err(AclError::ClientNotFound(_)) => {
                    warn!("Key {} is bound to missing client '{}'", key.id, client_id);
                    Ok(PermissionSet::new())
                }
                Err(e) => Err(e),
            };
        }

        let access = key.resources.get(resource).cloned().unwrap_or_default();
        Ok(match (&key.created_by, options.resolve_own_types) {
            (Some(creator), true) => resolve_own_types(&access, creator),
            _ => access,
        })
    }

    /// Permissions granted through a bearer token. Unknown tokens are unauthorised.
    pub async fn get_for_token(&self, token: &str, resource: &str, options: GetOptions) -> Result<PermissionSet> {
        let key = self
            .keys
            .find_by_token(token)
            .await?
            .ok_or(AclError::Unauthorised)?;
        self.get_for_key(&key, resource, options).await
    }

    /// Every row of the resolved table
    pub async fn entries(&self) -> Result<Vec<ResolvedAccessEntry>> {
        self.store
            .find(&Document::new(), &FindOptions::sorted_by("client"))
            .await?
            .results
            .iter()
            .map(ResolvedAccessEntry::from_document)
            .collect()
    }
}

/// Write hook that rebuilds the access table
pub struct RecomputeHook {
    resolver: Weak<AccessResolver>,
}

#[async_trait]
impl WriteHook for RecomputeHook {
    async fn on_write(&self, collection: &str) -> Result<()> {
        match self.resolver.upgrade() {
            Some(resolver) => {
                debug!("Write to {} triggers an access rebuild", collection);
                resolver.write().await
            }
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::CreateOptions;
    use crate::types::AccessType;
    use database::{Database, DeleteResults, QueryResults, SqliteDocumentStore};
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    /// Counts `find` calls made against the wrapped collection
    struct CountingStore {
        inner: SqliteDocumentStore,
        finds: AtomicUsize,
    }

    #[async_trait]
    impl DocumentStore for CountingStore {
        fn collection(&self) -> &str {
            self.inner.collection()
        }

        async fn find(&self, query: &Document, options: &FindOptions) -> database::Result<QueryResults> {
            self.finds.fetch_add(1, Ordering::SeqCst);
            self.inner.find(query, options).await
        }

        async fn create(&self, documents: Vec<Document>) -> database::Result<QueryResults> {
            self.inner.create(documents).await
        }

        async fn update(&self, query: &Document, update: &Document) -> database::Result<QueryResults> {
            self.inner.update(query, update).await
        }

        async fn delete(&self, query: &Document) -> database::Result<DeleteResults> {
            self.inner.delete(query).await
        }
    }

    struct Setup {
        _dir: TempDir,
        role_store: Arc<CountingStore>,
        roles: Arc<RoleStore>,
        clients: Arc<ClientStore>,
        resolver: Arc<AccessResolver>,
    }

    async fn setup() -> Setup {
        let dir = TempDir::new().unwrap();
        let db = Database::new(&dir.path().join("acl.db"), 1).await.unwrap();

        let role_store = Arc::new(CountingStore {
            inner: db.collection_with("roles", &RoleStore::indexes()).await.unwrap(),
            finds: AtomicUsize::new(0),
        });
        let roles = Arc::new(RoleStore::new(role_store.clone()));
        let clients = db.collection_with("clients", &ClientStore::indexes()).await.unwrap();
        let clients = Arc::new(
            ClientStore::new(Arc::new(clients), roles.clone()).with_hash_secrets(false),
        );
        let keys = db.collection_with("keys", &KeyStore::indexes()).await.unwrap();
        let keys = Arc::new(KeyStore::new(Arc::new(keys), clients.clone()));
        let access = db.collection_with("access", &AccessResolver::indexes()).await.unwrap();
        let resolver = Arc::new(AccessResolver::new(
            Arc::new(access),
            clients.clone(),
            roles.clone(),
            keys,
        ));

        Setup {
            _dir: dir,
            role_store,
            roles,
            clients,
            resolver,
        }
    }

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[tokio::test]
    async fn test_role_chain_fetches_once_per_level() {
        let s = setup().await;
        s.roles.create(&json!({"name": "r1"})).await.unwrap();
        s.roles.create(&json!({"name": "r2", "extends": "r1"})).await.unwrap();
        s.roles.create(&json!({"name": "r3", "extends": "r2"})).await.unwrap();

        s.role_store.finds.store(0, Ordering::SeqCst);
        let mut cache = RoleCache::new();
        let chain = get_role_chain(&s.roles, &names(&["r3"]), &mut cache).await.unwrap();

        assert_eq!(chain, names(&["r3", "r2", "r1"]));
        assert_eq!(s.role_store.finds.load(Ordering::SeqCst), 3);

        let again = get_role_chain(&s.roles, &names(&["r2"]), &mut cache).await.unwrap();
        assert_eq!(again, names(&["r2", "r1"]));
        assert_eq!(s.role_store.finds.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_role_chain_lists_shared_ancestors_once() {
        let s = setup().await;
        s.roles.create(&json!({"name": "base"})).await.unwrap();
        s.roles.create(&json!({"name": "left", "extends": "base"})).await.unwrap();
        s.roles.create(&json!({"name": "right", "extends": "base"})).await.unwrap();

        let mut cache = RoleCache::new();
        let chain = get_role_chain(&s.roles, &names(&["left", "right", "ghost"]), &mut cache)
            .await
            .unwrap();

        assert_eq!(chain, names(&["left", "right", "base"]));
        assert!(matches!(cache.get("ghost"), Some(None)));
    }

    #[tokio::test]
    async fn test_role_chain_terminates_on_stored_cycles() {
        let s = setup().await;
        s.role_store
            .inner
            .create(vec![
                document([("name", json!("a")), ("extends", json!("b"))]),
                document([("name", json!("b")), ("extends", json!("a"))]),
            ])
            .await
            .unwrap();

        let mut cache = RoleCache::new();
        let chain = get_role_chain(&s.roles, &names(&["a"]), &mut cache).await.unwrap();
        assert_eq!(chain, names(&["a", "b"]));
    }

    #[tokio::test]
    async fn test_deny_by_default_and_admin_bypass() {
        let s = setup().await;
        s.resolver.write().await.unwrap();

        let unknown = s
            .resolver
            .get(&ClientIdentity::user("unknown"), "docs", GetOptions::default())
            .await
            .unwrap();
        assert!(unknown.is_empty());

        let admin = s
            .resolver
            .get(&ClientIdentity::admin("root"), "anything", GetOptions::default())
            .await
            .unwrap();
        assert_eq!(admin, PermissionSet::full());
        assert!(matches!(
            s.resolver.get_all(&ClientIdentity::admin("root"), GetOptions::default()).await.unwrap(),
            AccessListing::Unrestricted(_)
        ));
    }

    #[tokio::test]
    async fn test_hooks_keep_table_current() {
        let s = setup().await;
        s.resolver.install_hooks();

        s.roles
            .create(&json!({"name": "writer", "resources": {"docs": {"create": true}}}))
            .await
            .unwrap();
        s.clients
            .create(
                &json!({"clientId": "c1", "secret": "pw", "roles": ["writer"]}),
                CreateOptions::default(),
            )
            .await
            .unwrap();

        let identity = ClientIdentity::user("c1");
        let docs = s.resolver.get(&identity, "docs", GetOptions::default()).await.unwrap();
        assert!(docs.is_granted(AccessType::Create));

        s.roles
            .resource_update("writer", "docs", &json!({"create": false}))
            .await
            .unwrap();
        let docs = s.resolver.get(&identity, "docs", GetOptions::default()).await.unwrap();
        assert!(!docs.is_granted(AccessType::Create));

        s.clients.delete("c1").await.unwrap();
        assert!(s.resolver.entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_writes_are_coalesced() {
        let s = setup().await;
        let resolver = s.resolver.clone();

        let guard = resolver.write_lock.lock().await;
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let resolver = resolver.clone();
                tokio::spawn(async move { resolver.write().await })
            })
            .collect();

        for _ in 0..100 {
            if resolver.requested.load(Ordering::SeqCst) == 3 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(resolver.requested.load(Ordering::SeqCst), 3);
        drop(guard);

        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(resolver.rebuilds(), 1);

        resolver.write().await.unwrap();
        assert_eq!(resolver.rebuilds(), 2);
    }

    #[tokio::test]
    async fn test_stored_rows_use_stringified_objects() {
        let s = setup().await;
        s.clients
            .create(
                &json!({
                    "clientId": "c1",
                    "secret": "pw",
                    "resources": {"docs": {"read": {"filter": {"team": "red"}}}}
                }),
                CreateOptions::default(),
            )
            .await
            .unwrap();
        s.resolver.write().await.unwrap();

        let rows = s
            .resolver
            .store
            .find(&Document::new(), &FindOptions::default())
            .await
            .unwrap()
            .results;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["access"]["read"]["filter"], r#"{"team":"red"}"#);

        let entries = s.resolver.entries().await.unwrap();
        assert_eq!(
            entries[0].access.get(AccessType::Read).row_filter().unwrap()["team"],
            "red"
        );
    }
}
