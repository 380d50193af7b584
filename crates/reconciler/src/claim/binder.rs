//! Binding and unbinding claims to managed resources.

use async_trait::async_trait;
use tether_resource::{
    ignore_not_found, reference_to, BindingPhase, Claim, Client, Managed, ReclaimPolicy,
};
use tracing::info;

use crate::error::{Error, Result, StepExt};

pub const ERR_UPDATE_CLAIM: &str = "cannot update resource claim";
pub const ERR_UPDATE_CLAIM_STATUS: &str = "cannot update resource claim status";
pub const ERR_UPDATE_MANAGED: &str = "cannot update managed resource";
pub const ERR_UPDATE_MANAGED_STATUS: &str = "cannot update managed resource status";
pub const ERR_DELETE_MANAGED: &str = "cannot delete managed resource";

#[async_trait]
pub trait ManagedBinder<C, M>: Send + Sync {
    async fn bind(&self, claim: &mut C, managed: &mut M) -> Result<()>;
    async fn unbind(&self, claim: &C, managed: &mut M) -> Result<()>;
}

fn check_bindable<C: Claim, M: Managed>(claim: &C, managed: &M) -> Result<()> {
    if managed.meta().controller_of().is_some() {
        return Err(Error::BindControlled);
    }
    match managed.claim_reference() {
        Some(existing) if !existing.refers_to(claim.meta()) => Err(Error::BindMismatch),
        _ => Ok(()),
    }
}

fn check_unbindable<C: Claim, M: Managed>(claim: &C, managed: &M) -> Result<()> {
    match managed.claim_reference() {
        Some(existing) if existing.refers_to(claim.meta()) => Ok(()),
        _ => Err(Error::UnbindMismatch),
    }
}

async fn reclaim<M: Managed>(client: &Client, managed: &M) -> Result<()> {
    if managed.effective_reclaim_policy() != ReclaimPolicy::Delete {
        return Ok(());
    }
    ignore_not_found(client.delete(managed).await).step(ERR_DELETE_MANAGED)?;
    info!(managed = %managed.key(), "Deleted released managed resource");
    Ok(())
}

/// Binds with one write per object, the phase persisted with the rest.
///
/// Suitable for kinds whose status is stored together with their spec.
pub struct ApiBinder {
    client: Client,
}

impl ApiBinder {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<C: Claim, M: Managed> ManagedBinder<C, M> for ApiBinder {
    async fn bind(&self, claim: &mut C, managed: &mut M) -> Result<()> {
        check_bindable(&*claim, &*managed)?;

        let original = managed.clone();
        managed.set_claim_reference(Some(reference_to(&*claim)));
        managed.set_binding_phase(BindingPhase::Bound);
        self.client
            .update_if_changed(&original, managed)
            .await
            .step(ERR_UPDATE_MANAGED)?;

        let original = claim.clone();
        if let Some(name) = managed.meta().external_name() {
            claim.meta_mut().set_external_name(name);
        }
        claim.set_binding_phase(BindingPhase::Bound);
        self.client
            .update_if_changed(&original, claim)
            .await
            .step(ERR_UPDATE_CLAIM)?;
        Ok(())
    }

    async fn unbind(&self, claim: &C, managed: &mut M) -> Result<()> {
        check_unbindable(claim, &*managed)?;

        managed.set_claim_reference(None);
        managed.set_binding_phase(BindingPhase::Released);
        self.client.update(managed).await.step(ERR_UPDATE_MANAGED)?;
        reclaim(&self.client, &*managed).await
    }
}

/// Binds with a second, status-only write per object.
///
/// Suitable for kinds with a status subresource, where the main update
/// cannot change the binding phase. The status write can fail on its own
/// after the main write succeeded; it is reported with its own step.
pub struct ApiStatusBinder {
    client: Client,
}

impl ApiStatusBinder {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<C: Claim, M: Managed> ManagedBinder<C, M> for ApiStatusBinder {
    async fn bind(&self, claim: &mut C, managed: &mut M) -> Result<()> {
        check_bindable(&*claim, &*managed)?;

        let original = managed.clone();
        managed.set_claim_reference(Some(reference_to(&*claim)));
        self.client
            .update_if_changed(&original, managed)
            .await
            .step(ERR_UPDATE_MANAGED)?;

        let original = managed.clone();
        managed.set_binding_phase(BindingPhase::Bound);
        self.client
            .update_status_if_changed(&original, managed)
            .await
            .step(ERR_UPDATE_MANAGED_STATUS)?;

        let original = claim.clone();
        if let Some(name) = managed.meta().external_name() {
            claim.meta_mut().set_external_name(name);
        }
        self.client
            .update_if_changed(&original, claim)
            .await
            .step(ERR_UPDATE_CLAIM)?;

        let original = claim.clone();
        claim.set_binding_phase(BindingPhase::Bound);
        self.client
            .update_status_if_changed(&original, claim)
            .await
            .step(ERR_UPDATE_CLAIM_STATUS)?;
        Ok(())
    }

    async fn unbind(&self, claim: &C, managed: &mut M) -> Result<()> {
        check_unbindable(claim, &*managed)?;

        managed.set_claim_reference(None);
        self.client.update(managed).await.step(ERR_UPDATE_MANAGED)?;

        managed.set_binding_phase(BindingPhase::Released);
        self.client
            .update_status(managed)
            .await
            .step(ERR_UPDATE_MANAGED_STATUS)?;
        reclaim(&self.client, &*managed).await
    }
}
