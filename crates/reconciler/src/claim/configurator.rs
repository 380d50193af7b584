//! Managed resource configurators run before dynamic provisioning.

use tether_resource::{Claim, Class, Managed, ReclaimPolicy, SecretReference};

use crate::error::{Error, Result};

/// Configures a managed resource from the claim and class it is provisioned
/// for.
pub trait ManagedConfigurator<C, K, M>: Send + Sync {
    fn configure(&self, claim: &C, class: &K, managed: &mut M) -> Result<()>;
}

impl<C, K, M, F> ManagedConfigurator<C, K, M> for F
where
    F: Fn(&C, &K, &mut M) -> Result<()> + Send + Sync,
{
    fn configure(&self, claim: &C, class: &K, managed: &mut M) -> Result<()> {
        self(claim, class, managed)
    }
}

/// Runs configurators in order; the first error stops the chain.
pub struct ConfiguratorChain<C, K, M> {
    configurators: Vec<Box<dyn ManagedConfigurator<C, K, M>>>,
}

impl<C, K, M> ConfiguratorChain<C, K, M> {
    pub fn new() -> Self {
        Self {
            configurators: Vec::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, configurator: impl ManagedConfigurator<C, K, M> + 'static) -> Self {
        self.configurators.push(Box::new(configurator));
        self
    }

    pub fn push(&mut self, configurator: Box<dyn ManagedConfigurator<C, K, M>>) {
        self.configurators.push(configurator);
    }

    pub fn len(&self) -> usize {
        self.configurators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configurators.is_empty()
    }
}

impl<C: Claim, K: Class, M: Managed> ConfiguratorChain<C, K, M> {
    /// Name and reclaim policy, the configuration every managed resource needs.
    pub fn standard() -> Self {
        Self::new().with(ConfigureNames).with(ConfigureReclaimPolicy)
    }
}

impl<C, K, M> Default for ConfiguratorChain<C, K, M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C, K, M> ManagedConfigurator<C, K, M> for ConfiguratorChain<C, K, M> {
    fn configure(&self, claim: &C, class: &K, managed: &mut M) -> Result<()> {
        self.configurators
            .iter()
            .try_for_each(|c| c.configure(claim, class, managed))
    }
}

/// Names the managed resource `<claim kind>-<claim uid>` and carries the
/// claim's external name over; without one the managed resource's own name
/// is used.
pub struct ConfigureNames;

impl<C: Claim, K: Class, M: Managed> ManagedConfigurator<C, K, M> for ConfigureNames {
    fn configure(&self, claim: &C, _class: &K, managed: &mut M) -> Result<()> {
        let uid = &claim.meta().uid;
        if uid.is_empty() {
            return Err(Error::configure("claim has no uid"));
        }
        let name = format!("{}-{uid}", claim.gvk().kind.to_lowercase());

        let meta = managed.meta_mut();
        meta.name = name;
        meta.namespace = None;
        let external = claim
            .meta()
            .external_name()
            .map_or_else(|| meta.name.clone(), str::to_string);
        meta.set_external_name(external);
        Ok(())
    }
}

/// A policy already set on the managed resource wins, then the class's,
/// then `Delete`.
pub struct ConfigureReclaimPolicy;

impl<C: Claim, K: Class, M: Managed> ManagedConfigurator<C, K, M> for ConfigureReclaimPolicy {
    fn configure(&self, _claim: &C, class: &K, managed: &mut M) -> Result<()> {
        let policy = managed
            .reclaim_policy()
            .or_else(|| class.reclaim_policy())
            .unwrap_or(ReclaimPolicy::Delete);
        managed.set_reclaim_policy(Some(policy));
        Ok(())
    }
}

/// Copies the class's provider reference.
pub struct ConfigureProviderReference;

impl<C: Claim, K: Class, M: Managed> ManagedConfigurator<C, K, M>
    for ConfigureProviderReference
{
    fn configure(&self, _claim: &C, class: &K, managed: &mut M) -> Result<()> {
        managed.set_provider_reference(class.provider_reference().cloned());
        Ok(())
    }
}

/// Points the managed resource's connection secret at the class's secret
/// namespace (else the claim's), named after the claim uid.
pub struct ConfigureConnectionSecret;

impl<C: Claim, K: Class, M: Managed> ManagedConfigurator<C, K, M>
    for ConfigureConnectionSecret
{
    fn configure(&self, claim: &C, class: &K, managed: &mut M) -> Result<()> {
        let namespace = class
            .write_connection_secrets_to_namespace()
            .or(claim.meta().namespace.as_deref())
            .ok_or_else(|| Error::configure("no namespace for the connection secret"))?;
        let uid = &claim.meta().uid;
        if uid.is_empty() {
            return Err(Error::configure("claim has no uid"));
        }
        managed.set_write_connection_secret_to(Some(SecretReference {
            namespace: namespace.to_string(),
            name: uid.clone(),
        }));
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tether_resource::{
        GroupVersionKind, HasConnectionSecretRef, HasProviderReference, HasReclaimPolicy,
        ManagedResource, Object, ObjectReference, ResourceClaim, ResourceClass,
    };

    type Chain = ConfiguratorChain<ResourceClaim, ResourceClass, ManagedResource>;

    fn claim() -> ResourceClaim {
        let mut claim = ResourceClaim::of_kind(&GroupVersionKind::new(
            "database.example.org",
            "v1alpha1",
            "MySQLInstance",
        ));
        claim.metadata.name = "c1".into();
        claim.metadata.namespace = Some("default".into());
        claim.metadata.uid = "uid-c1".into();
        claim
    }

    fn policy() -> impl Strategy<Value = Option<ReclaimPolicy>> {
        prop_oneof![
            Just(None),
            Just(Some(ReclaimPolicy::Retain)),
            Just(Some(ReclaimPolicy::Delete)),
        ]
    }

    proptest! {
        #[test]
        fn prop_reclaim_policy_precedence(class_policy in policy(), managed_policy in policy()) {
            let mut class = ResourceClass::default();
            class.set_reclaim_policy(class_policy);
            let mut managed = ManagedResource::default();
            managed.set_reclaim_policy(managed_policy);

            let chain = Chain::new().with(ConfigureReclaimPolicy);
            chain.configure(&claim(), &class, &mut managed).unwrap();

            let expected = managed_policy.or(class_policy).unwrap_or(ReclaimPolicy::Delete);
            prop_assert_eq!(managed.reclaim_policy(), Some(expected));
        }
    }

    #[test]
    fn test_names_from_claim_kind_and_uid() {
        let mut managed = ManagedResource::default();
        Chain::new()
            .with(ConfigureNames)
            .configure(&claim(), &ResourceClass::default(), &mut managed)
            .unwrap();
        assert_eq!(managed.metadata.name, "mysqlinstance-uid-c1");
        assert_eq!(managed.metadata.external_name(), Some("mysqlinstance-uid-c1"));
    }

    #[test]
    fn test_claim_external_name_wins() {
        let mut c = claim();
        c.metadata.set_external_name("ext-1");
        let mut managed = ManagedResource::default();
        Chain::new()
            .with(ConfigureNames)
            .configure(&c, &ResourceClass::default(), &mut managed)
            .unwrap();
        assert_eq!(managed.metadata.external_name(), Some("ext-1"));
    }

    #[test]
    fn test_first_error_stops_chain() {
        let mut c = claim();
        c.metadata.uid.clear();
        let mut managed = ManagedResource::default();
        let chain = Chain::new()
            .with(ConfigureNames)
            .with(ConfigureReclaimPolicy);
        let err = chain
            .configure(&c, &ResourceClass::default(), &mut managed)
            .unwrap_err();
        assert!(matches!(err, Error::Configure { .. }));
        assert_eq!(managed.reclaim_policy(), None);
    }

    #[test]
    fn test_closures_are_configurators() {
        let chain = Chain::new().with(
            |_: &ResourceClaim, _: &ResourceClass, m: &mut ManagedResource| -> Result<()> {
                m.metadata.labels.insert("configured".into(), "true".into());
                Ok(())
            },
        );
        let mut managed = ManagedResource::default();
        chain
            .configure(&claim(), &ResourceClass::default(), &mut managed)
            .unwrap();
        assert_eq!(managed.metadata.labels.get("configured").map(String::as_str), Some("true"));
    }

    #[test]
    fn test_connection_secret_and_provider() {
        let mut class = ResourceClass::default();
        class.spec_template.write_connection_secrets_to_namespace = Some("infra".into());
        class.set_provider_reference(Some(ObjectReference {
            name: "aws".into(),
            ..ObjectReference::default()
        }));
        let mut managed = ManagedResource::default();
        Chain::new()
            .with(ConfigureConnectionSecret)
            .with(ConfigureProviderReference)
            .configure(&claim(), &class, &mut managed)
            .unwrap();

        let secret = managed.write_connection_secret_to().unwrap();
        assert_eq!(secret.namespace, "infra");
        assert_eq!(secret.name, "uid-c1");
        assert_eq!(managed.provider_reference().map(|r| r.name.as_str()), Some("aws"));
    }
}
