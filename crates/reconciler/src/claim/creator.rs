//! Dynamic provisioning of managed resources.

use async_trait::async_trait;
use tether_resource::{reference_to, Claim, Class, Client, Managed};
use tracing::info;

use crate::error::{Result, StepExt};

pub const ERR_CREATE_MANAGED: &str = "cannot create managed resource";
pub const ERR_GET_EXISTING_MANAGED: &str = "cannot get existing managed resource";
pub const ERR_UPDATE_CLAIM: &str = "cannot update resource claim";

/// Creates a managed resource for a claim, wiring up references both ways.
#[async_trait]
pub trait ManagedCreator<C, K, M>: Send + Sync {
    async fn create(&self, claim: &mut C, class: &K, managed: &mut M) -> Result<()>;
}

/// Creates the managed resource through the store, then points the claim at
/// it. A resource left behind by an earlier attempt for the same claim is
/// adopted instead of created.
pub struct ApiManagedCreator {
    client: Client,
}

impl ApiManagedCreator {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<C: Claim, K: Class, M: Managed> ManagedCreator<C, K, M> for ApiManagedCreator {
    async fn create(&self, claim: &mut C, class: &K, managed: &mut M) -> Result<()> {
        managed.set_claim_reference(Some(reference_to(&*claim)));
        managed.set_class_reference(Some(reference_to(class)));
        match self.client.create(managed).await {
            Ok(()) => info!(
                claim = %claim.key(),
                managed = %managed.key(),
                "Created managed resource"
            ),
            Err(e) if e.is_already_exists() => {
                let existing: M = self
                    .client
                    .get(&managed.gvk(), &managed.key())
                    .await
                    .step(ERR_GET_EXISTING_MANAGED)?;
                let ours = existing
                    .claim_reference()
                    .is_some_and(|r| r.refers_to(claim.meta()));
                if !ours {
                    return Err(e).step(ERR_CREATE_MANAGED);
                }
                info!(
                    claim = %claim.key(),
                    managed = %existing.key(),
                    "Adopted existing managed resource"
                );
                *managed = existing;
            }
            Err(e) => return Err(e).step(ERR_CREATE_MANAGED),
        }

        claim.set_resource_reference(Some(reference_to(&*managed)));
        self.client.update(claim).await.step(ERR_UPDATE_CLAIM)
    }
}
