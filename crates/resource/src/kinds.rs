//! Generic claim, class and managed resource kinds.
//!
//! One struct serves every concrete kind of its family; the kind itself is
//! carried in [`TypeMeta`], so a `MySQLInstance` claim and a
//! `PostgreSQLInstance` claim are both a [`ResourceClaim`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::condition::ConditionedStatus;
use crate::meta::{
    LabelSelector, LocalSecretReference, ObjectMeta, ObjectReference, SecretReference, TypeMeta,
};
use crate::object::{
    BindingPhase, HasBindingPhase, HasClaimReference, HasClassReference, HasClassSelector,
    HasConditions, HasConnectionSecretNamespace, HasConnectionSecretRef,
    HasLocalConnectionSecretRef, HasProviderReference, HasReclaimPolicy, HasResourceReference,
    Object, ReclaimPolicy,
};

/// Free-form, kind-specific parameters.
pub type Parameters = BTreeMap<String, serde_json::Value>;

/// Status shared by claims and managed resources.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceStatus {
    #[serde(flatten)]
    pub conditioned: ConditionedStatus,
    #[serde(default)]
    pub binding_phase: BindingPhase,
}

macro_rules! impl_object {
    ($ty:ty) => {
        impl Object for $ty {
            fn type_meta(&self) -> &TypeMeta {
                &self.types
            }

            fn type_meta_mut(&mut self) -> &mut TypeMeta {
                &mut self.types
            }

            fn meta(&self) -> &ObjectMeta {
                &self.metadata
            }

            fn meta_mut(&mut self) -> &mut ObjectMeta {
                &mut self.metadata
            }
        }
    };
}

macro_rules! impl_status {
    ($ty:ty) => {
        impl HasConditions for $ty {
            fn conditioned_status(&self) -> &ConditionedStatus {
                &self.status.conditioned
            }

            fn conditioned_status_mut(&mut self) -> &mut ConditionedStatus {
                &mut self.status.conditioned
            }
        }

        impl HasBindingPhase for $ty {
            fn binding_phase(&self) -> BindingPhase {
                self.status.binding_phase
            }

            fn set_binding_phase(&mut self, phase: BindingPhase) {
                self.status.binding_phase = phase;
            }
        }
    };
}

// ═══════════════════════════════════════════════════════════════════════════
// CLAIM
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceClaimSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_selector: Option<LabelSelector>,
    #[serde(default, rename = "classRef", skip_serializing_if = "Option::is_none")]
    pub class_reference: Option<ObjectReference>,
    #[serde(default, rename = "resourceRef", skip_serializing_if = "Option::is_none")]
    pub resource_reference: Option<ObjectReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_connection_secret_to_ref: Option<LocalSecretReference>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: Parameters,
}

/// A request for a provisioned capability.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceClaim {
    #[serde(flatten)]
    pub types: TypeMeta,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ResourceClaimSpec,
    #[serde(default)]
    pub status: ResourceStatus,
}

impl_object!(ResourceClaim);
impl_status!(ResourceClaim);

impl HasClassSelector for ResourceClaim {
    fn class_selector(&self) -> Option<&LabelSelector> {
        self.spec.class_selector.as_ref()
    }
}

impl HasClassReference for ResourceClaim {
    fn class_reference(&self) -> Option<&ObjectReference> {
        self.spec.class_reference.as_ref()
    }

    fn set_class_reference(&mut self, reference: Option<ObjectReference>) {
        self.spec.class_reference = reference;
    }
}

impl HasResourceReference for ResourceClaim {
    fn resource_reference(&self) -> Option<&ObjectReference> {
        self.spec.resource_reference.as_ref()
    }

    fn set_resource_reference(&mut self, reference: Option<ObjectReference>) {
        self.spec.resource_reference = reference;
    }
}

impl HasLocalConnectionSecretRef for ResourceClaim {
    fn local_connection_secret(&self) -> Option<&LocalSecretReference> {
        self.spec.write_connection_secret_to_ref.as_ref()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// CLASS
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassSpecTemplate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reclaim_policy: Option<ReclaimPolicy>,
    #[serde(default, rename = "providerRef", skip_serializing_if = "Option::is_none")]
    pub provider_reference: Option<ObjectReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_connection_secrets_to_namespace: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: Parameters,
}

/// A template selected by claims for dynamic provisioning.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceClass {
    #[serde(flatten)]
    pub types: TypeMeta,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec_template: ClassSpecTemplate,
}

impl_object!(ResourceClass);

impl HasReclaimPolicy for ResourceClass {
    fn reclaim_policy(&self) -> Option<ReclaimPolicy> {
        self.spec_template.reclaim_policy
    }

    fn set_reclaim_policy(&mut self, policy: Option<ReclaimPolicy>) {
        self.spec_template.reclaim_policy = policy;
    }
}

impl HasProviderReference for ResourceClass {
    fn provider_reference(&self) -> Option<&ObjectReference> {
        self.spec_template.provider_reference.as_ref()
    }

    fn set_provider_reference(&mut self, reference: Option<ObjectReference>) {
        self.spec_template.provider_reference = reference;
    }
}

impl HasConnectionSecretNamespace for ResourceClass {
    fn write_connection_secrets_to_namespace(&self) -> Option<&str> {
        self.spec_template
            .write_connection_secrets_to_namespace
            .as_deref()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// MANAGED
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedResourceSpec {
    #[serde(default, rename = "claimRef", skip_serializing_if = "Option::is_none")]
    pub claim_reference: Option<ObjectReference>,
    #[serde(default, rename = "classRef", skip_serializing_if = "Option::is_none")]
    pub class_reference: Option<ObjectReference>,
    #[serde(default, rename = "providerRef", skip_serializing_if = "Option::is_none")]
    pub provider_reference: Option<ObjectReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reclaim_policy: Option<ReclaimPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_connection_secret_to_ref: Option<SecretReference>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: Parameters,
}

/// The object representing a provisioned unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManagedResource {
    #[serde(flatten)]
    pub types: TypeMeta,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ManagedResourceSpec,
    #[serde(default)]
    pub status: ResourceStatus,
}

impl_object!(ManagedResource);
impl_status!(ManagedResource);

impl HasClaimReference for ManagedResource {
    fn claim_reference(&self) -> Option<&ObjectReference> {
        self.spec.claim_reference.as_ref()
    }

    fn set_claim_reference(&mut self, reference: Option<ObjectReference>) {
        self.spec.claim_reference = reference;
    }
}

impl HasClassReference for ManagedResource {
    fn class_reference(&self) -> Option<&ObjectReference> {
        self.spec.class_reference.as_ref()
    }

    fn set_class_reference(&mut self, reference: Option<ObjectReference>) {
        self.spec.class_reference = reference;
    }
}

impl HasProviderReference for ManagedResource {
    fn provider_reference(&self) -> Option<&ObjectReference> {
        self.spec.provider_reference.as_ref()
    }

    fn set_provider_reference(&mut self, reference: Option<ObjectReference>) {
        self.spec.provider_reference = reference;
    }
}

impl HasReclaimPolicy for ManagedResource {
    fn reclaim_policy(&self) -> Option<ReclaimPolicy> {
        self.spec.reclaim_policy
    }

    fn set_reclaim_policy(&mut self, policy: Option<ReclaimPolicy>) {
        self.spec.reclaim_policy = policy;
    }
}

impl HasConnectionSecretRef for ManagedResource {
    fn write_connection_secret_to(&self) -> Option<&SecretReference> {
        self.spec.write_connection_secret_to_ref.as_ref()
    }

    fn set_write_connection_secret_to(&mut self, reference: Option<SecretReference>) {
        self.spec.write_connection_secret_to_ref = reference;
    }
}
