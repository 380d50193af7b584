//! Claim finalizer management.

use async_trait::async_trait;
use tether_resource::{Claim, Client};

use crate::error::{Result, StepExt};

/// Finalizer keeping a claim around until it has been unbound.
pub const FINALIZER_NAME: &str = "finalizer.tether.dev";

pub const ERR_ADD_FINALIZER: &str = "cannot add finalizer to resource claim";
pub const ERR_REMOVE_FINALIZER: &str = "cannot remove finalizer from resource claim";

#[async_trait]
pub trait ClaimFinalizer<C>: Send + Sync {
    async fn add_finalizer(&self, claim: &mut C) -> Result<()>;
    async fn finalize(&self, claim: &mut C) -> Result<()>;
}

/// Adds and removes [`FINALIZER_NAME`], writing only when it changes.
pub struct ApiClaimFinalizer {
    client: Client,
}

impl ApiClaimFinalizer {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<C: Claim> ClaimFinalizer<C> for ApiClaimFinalizer {
    async fn add_finalizer(&self, claim: &mut C) -> Result<()> {
        if !claim.meta_mut().add_finalizer(FINALIZER_NAME) {
            return Ok(());
        }
        self.client.update(claim).await.step(ERR_ADD_FINALIZER)
    }

    async fn finalize(&self, claim: &mut C) -> Result<()> {
        if !claim.meta_mut().remove_finalizer(FINALIZER_NAME) {
            return Ok(());
        }
        self.client.update(claim).await.step(ERR_REMOVE_FINALIZER)
    }
}
