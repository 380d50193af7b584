//! A stand-in provider for managed resources.
//!
//! Real providers create the external resource and report it ready. This one
//! does so instantly: it publishes a connection secret, names the resource
//! after itself and marks it `Unbound` so the binding loop can claim it.

use async_trait::async_trait;
use tether_reconciler::{Error, ManagedKind, ReconcileResult, Reconciler, Result, StepExt};
use tether_resource::{
    as_controller, secret_kind, BindingPhase, Client, Condition, HasBindingPhase,
    HasConditions, HasConnectionSecretRef, ManagedResource, ObjectKey, Secret, SecretReference,
};
use tracing::{debug, info};
use uuid::Uuid;

const ERR_GET_MANAGED: &str = "cannot get managed resource";
const ERR_UPDATE_MANAGED: &str = "cannot update managed resource";
const ERR_UPDATE_MANAGED_STATUS: &str = "cannot update managed resource status";
const ERR_PUBLISH_SECRET: &str = "cannot publish connection secret";

pub struct Provisioner {
    client: Client,
    kind: ManagedKind,
}

impl Provisioner {
    pub fn new(client: Client, kind: ManagedKind) -> Self {
        Self { client, kind }
    }

    async fn publish(&self, managed: &ManagedResource, to: &SecretReference) -> Result<()> {
        match self.client.get::<Secret>(&secret_kind(), &to.key()).await {
            Ok(existing) => {
                let ours = existing
                    .metadata
                    .controller_of()
                    .is_some_and(|owner| owner.uid == managed.metadata.uid);
                if ours {
                    Ok(())
                } else {
                    Err(Error::step(ERR_PUBLISH_SECRET, Error::SecretConflict))
                }
            }
            Err(e) if e.is_not_found() => {
                let host = managed
                    .metadata
                    .external_name()
                    .unwrap_or(&managed.metadata.name);
                let mut secret = Secret::new(to.namespace.clone(), to.name.clone())
                    .with_data("endpoint", format!("{host}.tether.internal"))
                    .with_data("username", "tether")
                    .with_data("password", Uuid::new_v4().simple().to_string());
                secret.metadata.owner_references.push(as_controller(managed));
                self.client
                    .create(&mut secret)
                    .await
                    .step(ERR_PUBLISH_SECRET)?;
                debug!(secret = %to.key(), "Published connection secret");
                Ok(())
            }
            Err(e) => Err(Error::step(ERR_PUBLISH_SECRET, e)),
        }
    }
}

#[async_trait]
impl Reconciler for Provisioner {
    async fn reconcile(&self, key: &ObjectKey) -> Result<ReconcileResult> {
        let mut managed: ManagedResource = match self.client.get(self.kind.gvk(), key).await {
            Ok(managed) => managed,
            Err(e) if e.is_not_found() => return Ok(ReconcileResult::done()),
            Err(e) => return Err(e).step(ERR_GET_MANAGED),
        };
        if managed.metadata.was_deleted() || managed.binding_phase() != BindingPhase::Unset {
            return Ok(ReconcileResult::done());
        }

        if managed.metadata.external_name().is_none() {
            let name = managed.metadata.name.clone();
            managed.metadata.set_external_name(name);
            self.client
                .update(&mut managed)
                .await
                .step(ERR_UPDATE_MANAGED)?;
        }
        if let Some(to) = managed.write_connection_secret_to().cloned() {
            self.publish(&managed, &to).await?;
        }

        managed.set_binding_phase(BindingPhase::Unbound);
        managed.set_conditions(&[Condition::available(), Condition::reconcile_success()]);
        self.client
            .update_status(&mut managed)
            .await
            .step(ERR_UPDATE_MANAGED_STATUS)?;
        info!(managed = %key, "Managed resource is ready to bind");
        Ok(ReconcileResult::done())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tether_resource::{GroupVersionKind, InMemoryStore, Object};

    use super::*;

    fn kind() -> GroupVersionKind {
        GroupVersionKind::new("database.example.org", "v1alpha1", "CloudSQLInstance")
    }

    async fn managed(client: &Client, secret: Option<SecretReference>) -> ManagedResource {
        let mut managed = ManagedResource::of_kind(&kind());
        managed.metadata.name = "db-1".to_string();
        managed.spec.write_connection_secret_to_ref = secret;
        client.create(&mut managed).await.unwrap();
        managed
    }

    fn setup() -> (Client, Provisioner) {
        let client = Client::new(InMemoryStore::new_arc());
        (client.clone(), Provisioner::new(client, ManagedKind::from(kind())))
    }

    #[tokio::test]
    async fn test_provisions_unset_managed_resource() {
        let (client, provisioner) = setup();
        let reference = SecretReference {
            namespace: "app".to_string(),
            name: "uid-1".to_string(),
        };
        let m = managed(&client, Some(reference.clone())).await;

        provisioner.reconcile(&m.key()).await.unwrap();

        let m: ManagedResource = client.get(&kind(), &m.key()).await.unwrap();
        assert_eq!(m.binding_phase(), BindingPhase::Unbound);
        assert_eq!(m.metadata.external_name(), Some("db-1"));
        let secret: Secret = client.get(&secret_kind(), &reference.key()).await.unwrap();
        assert_eq!(
            secret.data.get("endpoint").map(Vec::as_slice),
            Some(&b"db-1.tether.internal"[..])
        );
        assert_eq!(
            secret.metadata.controller_of().map(|o| o.uid.clone()),
            Some(m.metadata.uid.clone())
        );
    }

    #[tokio::test]
    async fn test_leaves_bound_resources_alone() {
        let (client, provisioner) = setup();
        let mut m = managed(&client, None).await;
        m.set_binding_phase(BindingPhase::Bound);
        client.update_status(&mut m).await.unwrap();
        let before = m.metadata.resource_version;

        provisioner.reconcile(&m.key()).await.unwrap();

        let m: ManagedResource = client.get(&kind(), &m.key()).await.unwrap();
        assert_eq!(m.metadata.resource_version, before);
        assert!(m.metadata.external_name().is_none());
    }

    #[tokio::test]
    async fn test_refuses_foreign_secret() {
        let (client, provisioner) = setup();
        let reference = SecretReference {
            namespace: "app".to_string(),
            name: "taken".to_string(),
        };
        let mut foreign = Secret::new("app", "taken");
        client.create(&mut foreign).await.unwrap();
        let m = managed(&client, Some(reference)).await;

        let err = provisioner.reconcile(&m.key()).await.unwrap_err();

        assert_eq!(err.step_message(), Some(ERR_PUBLISH_SECRET));
    }

    #[tokio::test]
    async fn test_missing_resource_is_done() {
        let (_, provisioner) = setup();
        let result = provisioner
            .reconcile(&ObjectKey::cluster("gone"))
            .await
            .unwrap();
        assert!(result.is_done());
    }
}
