//! # tether-resource
//!
//! Object model for tether: metadata, conditions, the capability traits that
//! control loops are written against, the generic claim/class/managed kinds,
//! connection secrets, and a versioned object store.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod client;
pub mod condition;
pub mod crd;
pub mod error;
pub mod kinds;
pub mod meta;
pub mod object;
pub mod reference;
pub mod secret;
pub mod store;

pub use client::Client;
pub use condition::{Condition, ConditionReason, ConditionStatus, ConditionType, ConditionedStatus};
pub use crd::{crd_kind, CustomResourceDefinition};
pub use error::{ignore_conflict, ignore_not_found, Error, Result};
pub use kinds::{ManagedResource, Parameters, ResourceClaim, ResourceClass, ResourceStatus};
pub use meta::{
    GroupVersionKind, LabelSelector, LocalSecretReference, ObjectKey, ObjectMeta, ObjectReference,
    OwnerReference, SecretReference, TypeMeta, ANNOTATION_EXTERNAL_NAME,
};
pub use object::{
    as_controller, reference_to, BindingPhase, Claim, Class, HasBindingPhase, HasClaimReference,
    HasClassReference, HasClassSelector, HasConditions, HasConnectionSecretNamespace,
    HasConnectionSecretRef, HasLocalConnectionSecretRef, HasProviderReference, HasReclaimPolicy,
    HasResourceReference, Managed, Object, ReclaimPolicy,
};
pub use reference::{Policy, Reference, ResolutionPolicy, ResolvePolicy, Selector};
pub use secret::{allow_propagation, secret_kind, ConnectionDetails, Secret};
pub use store::{
    DynamicObject, FaultyStore, InMemoryStore, ListOptions, Operation, Store, StoreStats,
    TracingStore,
};
