//! Plumbing shared by the client, role and key stores.

use crate::error::{AclError, Result};
use crate::matrix::AccessMatrix;
use async_trait::async_trait;
use database::{DatabaseError, Document};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::sync::{Arc, RwLock};
use tracing::warn;

/// Callback run after every committed write to a store.
///
/// The access resolver installs one of these on each store so the resolved
/// access table is rebuilt before the mutation returns.
#[async_trait]
pub trait WriteHook: Send + Sync {
    async fn on_write(&self, collection: &str) -> Result<()>;
}

/// Holds a store's single, replaceable write hook
#[derive(Default)]
pub struct WriteNotifier {
    hook: RwLock<Option<Arc<dyn WriteHook>>>,
}

impl WriteNotifier {
    /// Replace the hook; `None` removes it
    pub fn set(&self, hook: Option<Arc<dyn WriteHook>>) {
        match self.hook.write() {
            Ok(mut slot) => *slot = hook,
            Err(poisoned) => *poisoned.into_inner() = hook,
        }
    }

    /// Run the hook, if any, and propagate its result
    pub async fn notify(&self, collection: &str) -> Result<()> {
        match self.current() {
            Some(hook) => hook.on_write(collection).await,
            None => Ok(()),
        }
    }

    fn current(&self) -> Option<Arc<dyn WriteHook>> {
        match self.hook.read() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

/// Records returned by a store operation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Results<T> {
    pub results: Vec<T>,
}

impl<T> Results<T> {
    pub fn one(record: T) -> Self {
        Self {
            results: vec![record],
        }
    }
}

/// Records returned by a removal that may only partially apply
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemovedResults<T> {
    pub removed: Vec<String>,
    pub results: Vec<T>,
}

/// Build a query or update document from `(field, value)` pairs
pub fn document<I, K>(pairs: I) -> Document
where
    I: IntoIterator<Item = (K, JsonValue)>,
    K: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

pub(crate) fn corrupt(collection: &str, reason: impl Into<String>) -> AclError {
    AclError::Database(DatabaseError::CorruptDocument {
        collection: collection.to_string(),
        reason: reason.into(),
    })
}

pub(crate) fn required_str(doc: &Document, collection: &str, field: &str) -> Result<String> {
    doc.get(field)
        .and_then(JsonValue::as_str)
        .map(String::from)
        .ok_or_else(|| corrupt(collection, format!("missing string field '{}'", field)))
}

pub(crate) fn optional_str(doc: &Document, field: &str) -> Option<String> {
    doc.get(field).and_then(JsonValue::as_str).map(String::from)
}

pub(crate) fn string_list(doc: &Document, field: &str) -> Vec<String> {
    doc.get(field)
        .and_then(JsonValue::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(JsonValue::as_str)
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

/// Stored matrices that can't be read grant nothing
pub(crate) fn stored_matrix(doc: &Document, collection: &str) -> AccessMatrix {
    match doc.get("resources") {
        None | Some(JsonValue::Null) => AccessMatrix::new(),
        Some(value) => AccessMatrix::from_json(value).unwrap_or_else(|e| {
            warn!("Ignoring unreadable resources in {}: {}", collection, e);
            AccessMatrix::new()
        }),
    }
}
