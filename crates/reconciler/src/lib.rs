//! Level-triggered control loops over claims, classes and managed resources.
//!
//! Every loop recomputes what to do from the objects it reads, so it can be
//! invoked any number of times, in any order, for the same key:
//!
//! - **Binding**: provisions a managed resource for a claim from its class
//!   and binds the two ([`ClaimReconciler`])
//! - **Defaulting**: points claims that name no class at a default one
//!   ([`DefaultClassReconciler`])
//! - **Scheduling**: points claims with a class selector at a matching
//!   class ([`ClassSchedulingReconciler`])
//! - **Secret propagation**: copies secret data across namespaces when both
//!   secrets consent ([`SecretPropagatingReconciler`])
//! - **Readiness gating**: starts dependent loops once the kinds they
//!   watch are served ([`Gate`], [`CustomResourceGateReconciler`])
//!
//! [`ApiResolver`] resolves cross-resource references for loops that need
//! them.
//!
//! # Example
//!
//! ```ignore
//! use tether_reconciler::{ClaimReconciler, Reconciler};
//! use tether_resource::{Client, InMemoryStore, ManagedResource, ResourceClaim, ResourceClass};
//!
//! let client = Client::new(InMemoryStore::new_arc());
//! let reconciler = ClaimReconciler::<ResourceClaim, ResourceClass, ManagedResource>::builder(
//!     client, claim_kind, class_kind, managed_kind,
//! )
//! .build()?;
//!
//! let result = reconciler.reconcile(&key).await?;
//! ```

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod claim;
pub mod crd;
pub mod error;
pub mod gate;
pub mod reconciler;
pub mod reference;
pub mod secret;
pub mod types;

pub use claim::{
    ApiBinder, ApiClaimFinalizer, ApiConnectionPropagator, ApiManagedCreator, ApiStatusBinder,
    ClaimFinalizer, ClaimReconciler, ClaimReconcilerBuilder, ClassSchedulingReconciler,
    ConfigureConnectionSecret, ConfigureNames, ConfigureProviderReference,
    ConfigureReclaimPolicy, ConfiguratorChain, DefaultClassReconciler, ManagedBinder,
    ManagedConfigurator, ManagedConnectionPropagator, ManagedCreator, ANNOTATION_DEFAULT_CLASS,
    FINALIZER_NAME, LONG_WAIT, SHORT_WAIT,
};
pub use crd::CustomResourceGateReconciler;
pub use error::{Error, Result, StepExt};
pub use gate::Gate;
pub use reconciler::{Reconciler, TimeoutReconciler, DEFAULT_TIMEOUT};
pub use reference::{
    extract_external_name, extract_name, extract_uid, ApiResolver, MultiResolutionRequest,
    MultiResolutionResponse, ResolutionRequest, ResolutionResponse,
};
pub use secret::{Propagation, SecretPropagatingReconciler, SecretPropagator};
pub use types::{ClaimKind, ClassKind, ManagedKind, ReconcileResult};
