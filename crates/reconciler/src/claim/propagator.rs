//! Connection secret propagation from a managed resource to its claim.

use async_trait::async_trait;
use tether_resource::{
    as_controller, secret_kind, Claim, Client, Managed, ObjectKey, Secret,
};
use tracing::debug;

use crate::error::{Error, Result, StepExt};

pub const ERR_GET_MANAGED_SECRET: &str = "cannot get managed resource's connection secret";
pub const ERR_GET_CLAIM_SECRET: &str = "cannot get resource claim's connection secret";
pub const ERR_WRITE_CLAIM_SECRET: &str = "cannot create or update resource claim's connection secret";

#[async_trait]
pub trait ManagedConnectionPropagator<C, M>: Send + Sync {
    async fn propagate_connection(&self, claim: &C, managed: &M) -> Result<()>;
}

/// Copies the managed resource's connection secret into the secret the claim
/// asked for, creating it if needed.
///
/// The source secret must be controlled by the managed resource and the
/// target secret, if it exists, by the claim.
pub struct ApiConnectionPropagator {
    client: Client,
}

impl ApiConnectionPropagator {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn controlled_by(secret: &Secret, uid: &str) -> bool {
    secret
        .metadata
        .controller_of()
        .is_some_and(|owner| owner.uid == uid)
}

#[async_trait]
impl<C: Claim, M: Managed> ManagedConnectionPropagator<C, M> for ApiConnectionPropagator {
    async fn propagate_connection(&self, claim: &C, managed: &M) -> Result<()> {
        let (Some(from), Some(to)) = (
            managed.write_connection_secret_to(),
            claim.local_connection_secret(),
        ) else {
            return Ok(());
        };

        let source: Secret = self
            .client
            .get(&secret_kind(), &from.key())
            .await
            .step(ERR_GET_MANAGED_SECRET)?;
        if !controlled_by(&source, &managed.meta().uid) {
            return Err(Error::step(ERR_GET_MANAGED_SECRET, Error::SecretConflict));
        }

        let namespace = claim.meta().namespace.clone().unwrap_or_default();
        let key = ObjectKey::namespaced(namespace.clone(), to.name.clone());
        match self.client.get::<Secret>(&secret_kind(), &key).await {
            Ok(mut target) => {
                if !controlled_by(&target, &claim.meta().uid) {
                    return Err(Error::step(ERR_WRITE_CLAIM_SECRET, Error::SecretConflict));
                }
                let original = target.clone();
                target.data.clone_from(&source.data);
                if self
                    .client
                    .update_if_changed(&original, &mut target)
                    .await
                    .step(ERR_WRITE_CLAIM_SECRET)?
                {
                    debug!(secret = %key, "Updated claim connection secret");
                }
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                let mut target = Secret::new(namespace, to.name.clone());
                target.metadata.owner_references.push(as_controller(claim));
                target.data.clone_from(&source.data);
                self.client
                    .create(&mut target)
                    .await
                    .step(ERR_WRITE_CLAIM_SECRET)?;
                debug!(secret = %key, "Created claim connection secret");
                Ok(())
            }
            Err(e) => Err(Error::step(ERR_GET_CLAIM_SECRET, e)),
        }
    }
}
