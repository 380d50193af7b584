//! Object store trait and implementations.
//!
//! The store works on [`DynamicObject`]s so that it stays object safe; the
//! typed [`Client`](crate::client::Client) converts to and from concrete kinds.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::meta::{GroupVersionKind, ObjectKey, ObjectMeta, TypeMeta};
use crate::object::Object;

const FIELD_API_VERSION: &str = "apiVersion";
const FIELD_KIND: &str = "kind";
const FIELD_METADATA: &str = "metadata";
const FIELD_STATUS: &str = "status";

/// An object of any kind: identity and metadata plus the remaining body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DynamicObject {
    pub gvk: GroupVersionKind,
    pub metadata: ObjectMeta,
    pub body: Map<String, Value>,
}

impl DynamicObject {
    pub fn from_object<T: Object>(obj: &T) -> Result<Self> {
        let mut body = match serde_json::to_value(obj)? {
            Value::Object(map) => map,
            other => {
                return Err(Error::serialization(format!(
                    "expected a JSON object, got {other}"
                )));
            }
        };
        body.remove(FIELD_API_VERSION);
        body.remove(FIELD_KIND);
        body.remove(FIELD_METADATA);
        Ok(Self {
            gvk: obj.gvk(),
            metadata: obj.meta().clone(),
            body,
        })
    }

    pub fn into_object<T: Object>(self) -> Result<T> {
        let TypeMeta { api_version, kind } = self.gvk.type_meta();
        let mut map = self.body;
        map.insert(FIELD_API_VERSION.into(), Value::String(api_version));
        map.insert(FIELD_KIND.into(), Value::String(kind));
        map.insert(FIELD_METADATA.into(), serde_json::to_value(&self.metadata)?);
        Ok(serde_json::from_value(Value::Object(map))?)
    }

    pub fn key(&self) -> ObjectKey {
        self.metadata.key()
    }

    pub fn status(&self) -> Option<&Value> {
        self.body.get(FIELD_STATUS)
    }

    fn set_status(&mut self, status: Option<Value>) {
        match status {
            Some(status) => {
                self.body.insert(FIELD_STATUS.into(), status);
            }
            None => {
                self.body.remove(FIELD_STATUS);
            }
        }
    }
}

/// Filters applied by [`Store::list`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// Only objects in this namespace; `None` lists every namespace.
    pub namespace: Option<String>,
    /// Only objects carrying all of these labels.
    pub labels: BTreeMap<String, String>,
}

impl ListOptions {
    pub fn in_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            labels: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels = labels;
        self
    }

    fn matches(&self, meta: &ObjectMeta) -> bool {
        let namespace_ok = self
            .namespace
            .as_ref()
            .is_none_or(|ns| meta.namespace.as_ref() == Some(ns));
        namespace_ok
            && self
                .labels
                .iter()
                .all(|(k, v)| meta.labels.get(k) == Some(v))
    }
}

/// Trait for object storage backends.
///
/// Writes use optimistic concurrency: an object whose `resource_version` is
/// non-zero and differs from the stored one is rejected with a conflict.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, gvk: &GroupVersionKind, key: &ObjectKey) -> Result<DynamicObject>;

    async fn list(&self, gvk: &GroupVersionKind, options: &ListOptions)
    -> Result<Vec<DynamicObject>>;

    async fn create(&self, obj: DynamicObject) -> Result<DynamicObject>;

    /// Replace everything but the status.
    async fn update(&self, obj: DynamicObject) -> Result<DynamicObject>;

    /// Replace only the status.
    async fn update_status(&self, obj: DynamicObject) -> Result<DynamicObject>;

    /// Request deletion. Objects with finalizers are only marked deleted.
    async fn delete(&self, gvk: &GroupVersionKind, key: &ObjectKey) -> Result<()>;
}

#[async_trait]
impl<S: Store + ?Sized> Store for Arc<S> {
    async fn get(&self, gvk: &GroupVersionKind, key: &ObjectKey) -> Result<DynamicObject> {
        (**self).get(gvk, key).await
    }

    async fn list(
        &self,
        gvk: &GroupVersionKind,
        options: &ListOptions,
    ) -> Result<Vec<DynamicObject>> {
        (**self).list(gvk, options).await
    }

    async fn create(&self, obj: DynamicObject) -> Result<DynamicObject> {
        (**self).create(obj).await
    }

    async fn update(&self, obj: DynamicObject) -> Result<DynamicObject> {
        (**self).update(obj).await
    }

    async fn update_status(&self, obj: DynamicObject) -> Result<DynamicObject> {
        (**self).update_status(obj).await
    }

    async fn delete(&self, gvk: &GroupVersionKind, key: &ObjectKey) -> Result<()> {
        (**self).delete(gvk, key).await
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// IN-MEMORY
// ═══════════════════════════════════════════════════════════════════════════

/// Number of read and write calls a store has served.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub reads: u64,
    pub writes: u64,
}

type StoreKey = (GroupVersionKind, ObjectKey);

/// In-memory object store.
#[derive(Default)]
pub struct InMemoryStore {
    objects: RwLock<BTreeMap<StoreKey, DynamicObject>>,
    status_kinds: HashSet<GroupVersionKind>,
    version: AtomicU64,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Treat `gvk` as having a status subresource: `update` leaves its status
    /// alone and `update_status` touches nothing else.
    #[must_use]
    pub fn with_status_subresource(mut self, gvk: GroupVersionKind) -> Self {
        self.status_kinds.insert(gvk);
        self
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
        }
    }

    fn next_version(&self) -> u64 {
        self.version.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn count_read(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    fn count_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    fn check_version(existing: &DynamicObject, incoming: &DynamicObject) -> Result<()> {
        let incoming_version = incoming.metadata.resource_version;
        if incoming_version != 0 && incoming_version != existing.metadata.resource_version {
            return Err(Error::conflict(
                &existing.gvk.kind,
                existing.key(),
                format!(
                    "resource version {incoming_version} is stale; stored version is {}",
                    existing.metadata.resource_version
                ),
            ));
        }
        Ok(())
    }

    /// Store `next` in place of `existing`, bumping the version only if
    /// something changed. Objects pending deletion with no finalizers left
    /// are removed.
    fn commit(
        &self,
        objects: &mut BTreeMap<StoreKey, DynamicObject>,
        store_key: StoreKey,
        existing: &DynamicObject,
        mut next: DynamicObject,
    ) -> DynamicObject {
        next.metadata.resource_version = existing.metadata.resource_version;
        if next == *existing {
            return next;
        }
        if next.metadata.was_deleted() && next.metadata.finalizers.is_empty() {
            objects.remove(&store_key);
            return next;
        }
        next.metadata.resource_version = self.next_version();
        objects.insert(store_key, next.clone());
        next
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get(&self, gvk: &GroupVersionKind, key: &ObjectKey) -> Result<DynamicObject> {
        self.count_read();
        let objects = self.objects.read().await;
        objects
            .get(&(gvk.clone(), key.clone()))
            .cloned()
            .ok_or_else(|| Error::not_found(&gvk.kind, key))
    }

    async fn list(
        &self,
        gvk: &GroupVersionKind,
        options: &ListOptions,
    ) -> Result<Vec<DynamicObject>> {
        self.count_read();
        let objects = self.objects.read().await;
        Ok(objects
            .iter()
            .filter(|((k, _), obj)| k == gvk && options.matches(&obj.metadata))
            .map(|(_, obj)| obj.clone())
            .collect())
    }

    async fn create(&self, mut obj: DynamicObject) -> Result<DynamicObject> {
        self.count_write();
        if obj.metadata.name.is_empty() {
            return Err(Error::invalid(format!("{} has no name", obj.gvk.kind)));
        }
        let store_key = (obj.gvk.clone(), obj.key());
        let mut objects = self.objects.write().await;
        if objects.contains_key(&store_key) {
            return Err(Error::already_exists(&obj.gvk.kind, obj.key()));
        }
        obj.metadata.uid = uuid::Uuid::new_v4().to_string();
        obj.metadata.resource_version = self.next_version();
        obj.metadata.creation_timestamp = Some(Utc::now());
        obj.metadata.deletion_timestamp = None;
        objects.insert(store_key, obj.clone());
        Ok(obj)
    }

    async fn update(&self, obj: DynamicObject) -> Result<DynamicObject> {
        self.count_write();
        let store_key = (obj.gvk.clone(), obj.key());
        let mut objects = self.objects.write().await;
        let existing = objects
            .get(&store_key)
            .cloned()
            .ok_or_else(|| Error::not_found(&obj.gvk.kind, obj.key()))?;
        Self::check_version(&existing, &obj)?;

        let mut next = obj;
        next.metadata.uid.clone_from(&existing.metadata.uid);
        next.metadata.creation_timestamp = existing.metadata.creation_timestamp;
        next.metadata.deletion_timestamp = existing.metadata.deletion_timestamp;
        if self.status_kinds.contains(&next.gvk) {
            next.set_status(existing.status().cloned());
        }
        Ok(self.commit(&mut objects, store_key, &existing, next))
    }

    async fn update_status(&self, obj: DynamicObject) -> Result<DynamicObject> {
        if !self.status_kinds.contains(&obj.gvk) {
            return self.update(obj).await;
        }
        self.count_write();
        let store_key = (obj.gvk.clone(), obj.key());
        let mut objects = self.objects.write().await;
        let existing = objects
            .get(&store_key)
            .cloned()
            .ok_or_else(|| Error::not_found(&obj.gvk.kind, obj.key()))?;
        Self::check_version(&existing, &obj)?;

        let mut next = existing.clone();
        next.set_status(obj.status().cloned());
        Ok(self.commit(&mut objects, store_key, &existing, next))
    }

    async fn delete(&self, gvk: &GroupVersionKind, key: &ObjectKey) -> Result<()> {
        self.count_write();
        let store_key = (gvk.clone(), key.clone());
        let mut objects = self.objects.write().await;
        let Some(existing) = objects.get_mut(&store_key) else {
            return Err(Error::not_found(&gvk.kind, key));
        };
        if existing.metadata.finalizers.is_empty() {
            objects.remove(&store_key);
        } else if !existing.metadata.was_deleted() {
            existing.metadata.deletion_timestamp = Some(Utc::now());
            existing.metadata.resource_version = self.next_version();
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TRACING
// ═══════════════════════════════════════════════════════════════════════════

/// A wrapper that adds tracing to a store.
pub struct TracingStore<S: Store> {
    inner: S,
}

impl<S: Store> TracingStore<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: Store> Store for TracingStore<S> {
    async fn get(&self, gvk: &GroupVersionKind, key: &ObjectKey) -> Result<DynamicObject> {
        tracing::trace!(kind = %gvk, key = %key, "Getting object");
        self.inner.get(gvk, key).await
    }

    async fn list(
        &self,
        gvk: &GroupVersionKind,
        options: &ListOptions,
    ) -> Result<Vec<DynamicObject>> {
        tracing::trace!(kind = %gvk, namespace = ?options.namespace, "Listing objects");
        let result = self.inner.list(gvk, options).await;
        if let Ok(ref objects) = result {
            tracing::trace!(kind = %gvk, count = objects.len(), "Listed objects");
        }
        result
    }

    async fn create(&self, obj: DynamicObject) -> Result<DynamicObject> {
        tracing::debug!(kind = %obj.gvk, key = %obj.key(), "Creating object");
        let result = self.inner.create(obj).await;
        if let Ok(ref created) = result {
            tracing::trace!(uid = %created.metadata.uid, "Object created");
        }
        result
    }

    async fn update(&self, obj: DynamicObject) -> Result<DynamicObject> {
        tracing::debug!(
            kind = %obj.gvk,
            key = %obj.key(),
            resource_version = obj.metadata.resource_version,
            "Updating object"
        );
        self.inner.update(obj).await
    }

    async fn update_status(&self, obj: DynamicObject) -> Result<DynamicObject> {
        tracing::debug!(
            kind = %obj.gvk,
            key = %obj.key(),
            resource_version = obj.metadata.resource_version,
            "Updating object status"
        );
        self.inner.update_status(obj).await
    }

    async fn delete(&self, gvk: &GroupVersionKind, key: &ObjectKey) -> Result<()> {
        tracing::debug!(kind = %gvk, key = %key, "Deleting object");
        self.inner.delete(gvk, key).await
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// FAULT INJECTION
// ═══════════════════════════════════════════════════════════════════════════

/// Store operations, for fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Get,
    List,
    Create,
    Update,
    UpdateStatus,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A store that fails selected operations until the fault is cleared.
pub struct FaultyStore<S: Store> {
    inner: S,
    faults: Mutex<HashMap<(Operation, Option<String>), Error>>,
}

impl<S: Store> FaultyStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            faults: Mutex::new(HashMap::new()),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Fail `operation` for every kind.
    pub fn fail(&self, operation: Operation, error: Error) {
        self.lock().insert((operation, None), error);
    }

    /// Fail `operation` for one kind only.
    pub fn fail_kind(&self, operation: Operation, kind: impl Into<String>, error: Error) {
        self.lock().insert((operation, Some(kind.into())), error);
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<(Operation, Option<String>), Error>> {
        self.faults
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn check(&self, operation: Operation, gvk: &GroupVersionKind) -> Result<()> {
        let faults = self.lock();
        let fault = faults
            .get(&(operation, Some(gvk.kind.clone())))
            .or_else(|| faults.get(&(operation, None)));
        match fault {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl<S: Store> Store for FaultyStore<S> {
    async fn get(&self, gvk: &GroupVersionKind, key: &ObjectKey) -> Result<DynamicObject> {
        self.check(Operation::Get, gvk)?;
        self.inner.get(gvk, key).await
    }

    async fn list(
        &self,
        gvk: &GroupVersionKind,
        options: &ListOptions,
    ) -> Result<Vec<DynamicObject>> {
        self.check(Operation::List, gvk)?;
        self.inner.list(gvk, options).await
    }

    async fn create(&self, obj: DynamicObject) -> Result<DynamicObject> {
        self.check(Operation::Create, &obj.gvk)?;
        self.inner.create(obj).await
    }

    async fn update(&self, obj: DynamicObject) -> Result<DynamicObject> {
        self.check(Operation::Update, &obj.gvk)?;
        self.inner.update(obj).await
    }

    async fn update_status(&self, obj: DynamicObject) -> Result<DynamicObject> {
        self.check(Operation::UpdateStatus, &obj.gvk)?;
        self.inner.update_status(obj).await
    }

    async fn delete(&self, gvk: &GroupVersionKind, key: &ObjectKey) -> Result<()> {
        self.check(Operation::Delete, gvk)?;
        self.inner.delete(gvk, key).await
    }
}
