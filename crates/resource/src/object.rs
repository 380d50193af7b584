//! The `Object` trait and the capability traits the control loops are written
//! against.
//!
//! Loops never name a concrete kind. A claim is anything that is an
//! [`Object`] and implements the claim capabilities; the blanket impls of
//! [`Claim`], [`Class`] and [`Managed`] pick such types up automatically.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::condition::{Condition, ConditionedStatus};
use crate::meta::{
    GroupVersionKind, LabelSelector, LocalSecretReference, ObjectKey, ObjectMeta, ObjectReference,
    OwnerReference, SecretReference, TypeMeta,
};

/// Binding lifecycle of a claim or managed resource.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BindingPhase {
    /// Never set; treated as `Unbindable`.
    #[default]
    Unset,
    Unbindable,
    Unbound,
    Bound,
    Released,
}

impl fmt::Display for BindingPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// What happens to a managed resource once its claim goes away.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReclaimPolicy {
    Retain,
    #[default]
    Delete,
}

/// A serializable, storable object with standard metadata.
pub trait Object:
    Serialize + DeserializeOwned + Clone + Default + PartialEq + fmt::Debug + Send + Sync + 'static
{
    fn type_meta(&self) -> &TypeMeta;
    fn type_meta_mut(&mut self) -> &mut TypeMeta;
    fn meta(&self) -> &ObjectMeta;
    fn meta_mut(&mut self) -> &mut ObjectMeta;

    fn gvk(&self) -> GroupVersionKind {
        GroupVersionKind::from(self.type_meta())
    }

    fn set_gvk(&mut self, gvk: &GroupVersionKind) {
        *self.type_meta_mut() = gvk.type_meta();
    }

    fn key(&self) -> ObjectKey {
        self.meta().key()
    }

    /// An empty object of the given kind.
    fn of_kind(gvk: &GroupVersionKind) -> Self {
        let mut obj = Self::default();
        obj.set_gvk(gvk);
        obj
    }
}

/// A reference to `obj`, pinned to its uid.
pub fn reference_to<T: Object>(obj: &T) -> ObjectReference {
    let meta = obj.meta();
    ObjectReference {
        api_version: Some(obj.type_meta().api_version.clone()),
        kind: Some(obj.type_meta().kind.clone()),
        namespace: meta.namespace.clone(),
        name: meta.name.clone(),
        uid: (!meta.uid.is_empty()).then(|| meta.uid.clone()),
    }
}

/// An owner reference marking `obj` as the controller.
pub fn as_controller<T: Object>(obj: &T) -> OwnerReference {
    OwnerReference {
        api_version: obj.type_meta().api_version.clone(),
        kind: obj.type_meta().kind.clone(),
        name: obj.meta().name.clone(),
        uid: obj.meta().uid.clone(),
        controller: true,
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// CAPABILITIES
// ═══════════════════════════════════════════════════════════════════════════

pub trait HasConditions {
    fn conditioned_status(&self) -> &ConditionedStatus;
    fn conditioned_status_mut(&mut self) -> &mut ConditionedStatus;

    fn set_conditions(&mut self, conditions: &[Condition]) {
        self.conditioned_status_mut().set_conditions(conditions);
    }
}

pub trait HasBindingPhase {
    fn binding_phase(&self) -> BindingPhase;
    fn set_binding_phase(&mut self, phase: BindingPhase);

    /// Only an `Unbound` resource may be bound.
    fn is_bindable(&self) -> bool {
        self.binding_phase() == BindingPhase::Unbound
    }

    fn is_bound(&self) -> bool {
        self.binding_phase() == BindingPhase::Bound
    }
}

pub trait HasClaimReference {
    fn claim_reference(&self) -> Option<&ObjectReference>;
    fn set_claim_reference(&mut self, reference: Option<ObjectReference>);
}

pub trait HasClassReference {
    fn class_reference(&self) -> Option<&ObjectReference>;
    fn set_class_reference(&mut self, reference: Option<ObjectReference>);
}

pub trait HasClassSelector {
    fn class_selector(&self) -> Option<&LabelSelector>;
}

pub trait HasResourceReference {
    fn resource_reference(&self) -> Option<&ObjectReference>;
    fn set_resource_reference(&mut self, reference: Option<ObjectReference>);
}

pub trait HasReclaimPolicy {
    /// `None` until something sets it; consumers treat `None` as `Delete`.
    fn reclaim_policy(&self) -> Option<ReclaimPolicy>;
    fn set_reclaim_policy(&mut self, policy: Option<ReclaimPolicy>);

    fn effective_reclaim_policy(&self) -> ReclaimPolicy {
        self.reclaim_policy().unwrap_or_default()
    }
}

pub trait HasProviderReference {
    fn provider_reference(&self) -> Option<&ObjectReference>;
    fn set_provider_reference(&mut self, reference: Option<ObjectReference>);
}

/// Where a claim wants its connection details written (same namespace).
pub trait HasLocalConnectionSecretRef {
    fn local_connection_secret(&self) -> Option<&LocalSecretReference>;
}

/// Where a managed resource writes its connection details.
pub trait HasConnectionSecretRef {
    fn write_connection_secret_to(&self) -> Option<&SecretReference>;
    fn set_write_connection_secret_to(&mut self, reference: Option<SecretReference>);
}

/// Namespace a class wants its managed resources' secrets written to.
pub trait HasConnectionSecretNamespace {
    fn write_connection_secrets_to_namespace(&self) -> Option<&str>;
}

// ═══════════════════════════════════════════════════════════════════════════
// COMPOSITES
// ═══════════════════════════════════════════════════════════════════════════

/// A request for a provisioned capability.
pub trait Claim:
    Object
    + HasConditions
    + HasBindingPhase
    + HasClassSelector
    + HasClassReference
    + HasResourceReference
    + HasLocalConnectionSecretRef
{
}

impl<T> Claim for T where
    T: Object
        + HasConditions
        + HasBindingPhase
        + HasClassSelector
        + HasClassReference
        + HasResourceReference
        + HasLocalConnectionSecretRef
{
}

/// A template used to dynamically provision managed resources.
pub trait Class:
    Object + HasReclaimPolicy + HasProviderReference + HasConnectionSecretNamespace
{
}

impl<T> Class for T where
    T: Object + HasReclaimPolicy + HasProviderReference + HasConnectionSecretNamespace
{
}

/// A provisioned unit, owned by at most one claim.
pub trait Managed:
    Object
    + HasConditions
    + HasBindingPhase
    + HasClaimReference
    + HasClassReference
    + HasProviderReference
    + HasReclaimPolicy
    + HasConnectionSecretRef
{
}

impl<T> Managed for T where
    T: Object
        + HasConditions
        + HasBindingPhase
        + HasClaimReference
        + HasClassReference
        + HasProviderReference
        + HasReclaimPolicy
        + HasConnectionSecretRef
{
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Phase(BindingPhase);

    impl HasBindingPhase for Phase {
        fn binding_phase(&self) -> BindingPhase {
            self.0
        }

        fn set_binding_phase(&mut self, phase: BindingPhase) {
            self.0 = phase;
        }
    }

    #[test]
    fn test_unset_phase_is_not_bindable() {
        let p = Phase(BindingPhase::Unset);
        assert!(!p.is_bindable());
        assert!(!p.is_bound());
    }

    #[test]
    fn test_only_unbound_is_bindable() {
        for (phase, bindable) in [
            (BindingPhase::Unbindable, false),
            (BindingPhase::Unbound, true),
            (BindingPhase::Bound, false),
            (BindingPhase::Released, false),
        ] {
            assert_eq!(Phase(phase).is_bindable(), bindable, "{phase}");
        }
    }

    #[test]
    fn test_default_reclaim_policy_is_delete() {
        assert_eq!(ReclaimPolicy::default(), ReclaimPolicy::Delete);
    }
}
