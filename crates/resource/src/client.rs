//! Typed access to a [`Store`].

use std::sync::Arc;

use crate::error::Result;
use crate::meta::{GroupVersionKind, ObjectKey};
use crate::object::Object;
use crate::store::{DynamicObject, ListOptions, Store};

/// Converts typed objects to and from the dynamic form a [`Store`] holds.
///
/// Write methods take the object mutably and overwrite it with what the
/// store accepted, so the caller always continues with the fresh
/// `resource_version`.
#[derive(Clone)]
pub struct Client {
    store: Arc<dyn Store>,
}

impl Client {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub async fn get<T: Object>(&self, gvk: &GroupVersionKind, key: &ObjectKey) -> Result<T> {
        self.store.get(gvk, key).await?.into_object()
    }

    pub async fn list<T: Object>(
        &self,
        gvk: &GroupVersionKind,
        options: &ListOptions,
    ) -> Result<Vec<T>> {
        self.store
            .list(gvk, options)
            .await?
            .into_iter()
            .map(DynamicObject::into_object)
            .collect()
    }

    pub async fn create<T: Object>(&self, obj: &mut T) -> Result<()> {
        let created = self.store.create(DynamicObject::from_object(obj)?).await?;
        *obj = created.into_object()?;
        Ok(())
    }

    pub async fn update<T: Object>(&self, obj: &mut T) -> Result<()> {
        let updated = self.store.update(DynamicObject::from_object(obj)?).await?;
        *obj = updated.into_object()?;
        Ok(())
    }

    pub async fn update_status<T: Object>(&self, obj: &mut T) -> Result<()> {
        let updated = self
            .store
            .update_status(DynamicObject::from_object(obj)?)
            .await?;
        *obj = updated.into_object()?;
        Ok(())
    }

    pub async fn delete<T: Object>(&self, obj: &T) -> Result<()> {
        self.store.delete(&obj.gvk(), &obj.key()).await
    }

    /// Update `obj` only if it differs from `original`. Returns whether a
    /// write was issued.
    pub async fn update_if_changed<T: Object>(&self, original: &T, obj: &mut T) -> Result<bool> {
        if original == obj {
            return Ok(false);
        }
        self.update(obj).await.map(|()| true)
    }

    /// Status counterpart of [`Client::update_if_changed`].
    pub async fn update_status_if_changed<T: Object>(
        &self,
        original: &T,
        obj: &mut T,
    ) -> Result<bool> {
        if original == obj {
            return Ok(false);
        }
        self.update_status(obj).await.map(|()| true)
    }
}
