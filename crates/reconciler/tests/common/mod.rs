//! Shared fixtures for the reconciler integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use tether_reconciler::{
    ApiBinder, ApiStatusBinder, ClaimKind, ClaimReconciler, ClassKind, ConfigureConnectionSecret,
    ConfiguratorChain, ManagedKind,
};
use tether_resource::{
    as_controller, reference_to, secret_kind, BindingPhase, Client, GroupVersionKind,
    HasBindingPhase, HasConnectionSecretRef, InMemoryStore, LocalSecretReference,
    ManagedResource, Object, ObjectKey, ReclaimPolicy, ResourceClaim, ResourceClass, Secret,
    Store,
};

pub type MySqlReconciler = ClaimReconciler<ResourceClaim, ResourceClass, ManagedResource>;

pub fn claim_kind() -> GroupVersionKind {
    GroupVersionKind::new("database.example.org", "v1alpha1", "MySQLInstance")
}

pub fn class_kind() -> GroupVersionKind {
    GroupVersionKind::new("database.example.org", "v1alpha1", "MySQLInstanceClass")
}

pub fn managed_kind() -> GroupVersionKind {
    GroupVersionKind::new("database.example.org", "v1alpha1", "CloudSQLInstance")
}

/// An in-memory store, optionally with status subresources for the claim
/// and managed kinds.
pub fn store(status_subresource: bool) -> Arc<InMemoryStore> {
    let mut store = InMemoryStore::new();
    if status_subresource {
        store = store
            .with_status_subresource(claim_kind())
            .with_status_subresource(managed_kind());
    }
    Arc::new(store)
}

/// A binding loop wired the way the binary wires it.
pub fn reconciler(client: &Client, status_subresource: bool) -> MySqlReconciler {
    let builder = MySqlReconciler::builder(
        client.clone(),
        ClaimKind::from(claim_kind()),
        ClassKind::from(class_kind()),
        ManagedKind::from(managed_kind()),
    )
    .with_configurator(ConfiguratorChain::standard().with(ConfigureConnectionSecret));
    let builder = if status_subresource {
        builder.with_binder(ApiStatusBinder::new(client.clone()))
    } else {
        builder.with_binder(ApiBinder::new(client.clone()))
    };
    builder.build().expect("valid reconciler")
}

pub async fn create_class(
    client: &Client,
    name: &str,
    policy: Option<ReclaimPolicy>,
) -> ResourceClass {
    let mut class = ResourceClass::of_kind(&class_kind());
    class.metadata.name = name.to_string();
    class.metadata.namespace = Some("infra".to_string());
    class.spec_template.reclaim_policy = policy;
    client.create(&mut class).await.unwrap();
    class
}

pub fn new_claim(name: &str) -> ResourceClaim {
    let mut claim = ResourceClaim::of_kind(&claim_kind());
    claim.metadata.name = name.to_string();
    claim.metadata.namespace = Some("app".to_string());
    claim.spec.write_connection_secret_to_ref = Some(LocalSecretReference {
        name: format!("{name}-conn"),
    });
    claim
}

pub async fn create_claim_for_class(client: &Client, name: &str, class: &ResourceClass) -> ResourceClaim {
    let mut claim = new_claim(name);
    claim.spec.class_reference = Some(reference_to(class));
    client.create(&mut claim).await.unwrap();
    claim
}

pub async fn get_claim(client: &Client, key: &ObjectKey) -> ResourceClaim {
    client.get(&claim_kind(), key).await.unwrap()
}

pub async fn managed_for(client: &Client, claim: &ResourceClaim) -> ManagedResource {
    let reference = claim
        .spec
        .resource_reference
        .as_ref()
        .expect("claim references a managed resource");
    client.get(&managed_kind(), &reference.key()).await.unwrap()
}

/// Act as the provider of `managed`: publish its connection secret, give it
/// an external name and report it ready to be bound.
pub async fn provide(client: &Client, managed: &ManagedResource, external_name: &str) {
    let mut managed: ManagedResource = client.get(&managed_kind(), &managed.key()).await.unwrap();

    if let Some(reference) = managed.write_connection_secret_to().cloned() {
        let mut secret = Secret::new(reference.namespace, reference.name)
            .with_data("endpoint", "mysql.example.org:3306")
            .with_data("password", "s3cr3t");
        secret.metadata.owner_references.push(as_controller(&managed));
        client.create(&mut secret).await.unwrap();
    }

    managed.metadata.set_external_name(external_name);
    client.update(&mut managed).await.unwrap();
    managed.set_binding_phase(BindingPhase::Unbound);
    client.update_status(&mut managed).await.unwrap();
}

pub async fn secret(client: &Client, namespace: &str, name: &str) -> Option<Secret> {
    client
        .get(&secret_kind(), &ObjectKey::namespaced(namespace, name))
        .await
        .ok()
}

pub async fn exists(store: &dyn Store, gvk: &GroupVersionKind, key: &ObjectKey) -> bool {
    store.get(gvk, key).await.is_ok()
}
