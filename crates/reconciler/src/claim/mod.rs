//! Claim binding, defaulting and scheduling loops.
//!
//! The binding loop is a state machine over a (claim, managed resource)
//! pair, recomputed from the two objects on every invocation:
//!
//! 1. Fetch the claim and, if it references one, its managed resource
//! 2. A deleted claim is unbound and its finalizer removed
//! 3. A claim with a class but no managed resource gets one provisioned
//! 4. A managed resource that is not yet bindable leaves the claim binding
//! 5. Otherwise connection details are propagated and the pair is bound
//!
//! Every path persists the claim's conditions before returning.

pub mod binder;
pub mod configurator;
pub mod creator;
pub mod defaulting;
pub mod finalizer;
pub mod propagator;
pub mod scheduling;

use std::time::Duration;

use async_trait::async_trait;
use tether_resource::{Claim, Class, Client, Condition, Managed, ObjectKey};
use tracing::{debug, info, warn};

use crate::error::{Error, Result, StepExt};
use crate::reconciler::Reconciler;
use crate::types::{ClaimKind, ClassKind, ManagedKind, ReconcileResult};

pub use binder::{ApiBinder, ApiStatusBinder, ManagedBinder};
pub use configurator::{
    ConfigureConnectionSecret, ConfigureNames, ConfigureProviderReference,
    ConfigureReclaimPolicy, ConfiguratorChain, ManagedConfigurator,
};
pub use creator::{ApiManagedCreator, ManagedCreator};
pub use defaulting::{DefaultClassReconciler, ANNOTATION_DEFAULT_CLASS};
pub use finalizer::{ApiClaimFinalizer, ClaimFinalizer, FINALIZER_NAME};
pub use propagator::{ApiConnectionPropagator, ManagedConnectionPropagator};
pub use scheduling::ClassSchedulingReconciler;

/// Default wait before re-checking a claim that is waiting on something.
pub const SHORT_WAIT: Duration = Duration::from_secs(30);
/// Default wait before re-checking a claim no class matches.
pub const LONG_WAIT: Duration = Duration::from_secs(60);

pub const ERR_GET_CLAIM: &str = "cannot get resource claim";
pub const ERR_GET_MANAGED: &str = "cannot get managed resource";
pub const ERR_GET_CLASS: &str = "cannot get resource class";
pub const ERR_CONFIGURE_MANAGED: &str = "cannot configure managed resource";
pub const ERR_PROPAGATE_SECRET: &str = "cannot propagate connection secret";
pub const ERR_BIND: &str = "cannot bind to managed resource";
pub const ERR_UNBIND: &str = "cannot unbind managed resource";
pub const ERR_UPDATE_CLAIM_STATUS: &str = "cannot update resource claim status";

/// Binds claims of one kind to managed resources of another, provisioning
/// managed resources from classes when needed.
pub struct ClaimReconciler<C, K, M> {
    client: Client,
    claim_kind: ClaimKind,
    class_kind: ClassKind,
    managed_kind: ManagedKind,
    short_wait: Duration,
    configurator: Box<dyn ManagedConfigurator<C, K, M>>,
    creator: Box<dyn ManagedCreator<C, K, M>>,
    propagator: Box<dyn ManagedConnectionPropagator<C, M>>,
    binder: Box<dyn ManagedBinder<C, M>>,
    finalizer: Box<dyn ClaimFinalizer<C>>,
}

impl<C: Claim, K: Class, M: Managed> ClaimReconciler<C, K, M> {
    pub fn builder(
        client: Client,
        claim_kind: ClaimKind,
        class_kind: ClassKind,
        managed_kind: ManagedKind,
    ) -> ClaimReconcilerBuilder<C, K, M> {
        ClaimReconcilerBuilder::new(client, claim_kind, class_kind, managed_kind)
    }

    pub fn claim_kind(&self) -> &ClaimKind {
        &self.claim_kind
    }

    async fn update_status(
        &self,
        original: &C,
        claim: &mut C,
        result: ReconcileResult,
    ) -> Result<ReconcileResult> {
        self.client
            .update_status_if_changed(original, claim)
            .await
            .step(ERR_UPDATE_CLAIM_STATUS)?;
        Ok(result)
    }

    /// Record `err` on the claim alongside `condition` and retry later.
    async fn fail(
        &self,
        original: &C,
        claim: &mut C,
        condition: Option<Condition>,
        err: &Error,
    ) -> Result<ReconcileResult> {
        warn!(claim = %claim.key(), error = %err, "Claim reconcile step failed");
        let conditions: Vec<Condition> = condition
            .into_iter()
            .chain(std::iter::once(Condition::reconcile_error(err)))
            .collect();
        claim.set_conditions(&conditions);
        self.update_status(original, claim, ReconcileResult::requeue_after(self.short_wait))
            .await
    }

    async fn delete(
        &self,
        original: &C,
        mut claim: C,
        mut managed: M,
    ) -> Result<ReconcileResult> {
        debug!(claim = %claim.key(), "Claim is being deleted");
        claim.set_conditions(&[Condition::deleting()]);

        // A managed resource with no claim reference was never bound or has
        // already been released by an earlier attempt.
        if managed.meta().was_created() && managed.claim_reference().is_some() {
            if let Err(e) = self
                .binder
                .unbind(&claim, &mut managed)
                .await
                .step(ERR_UNBIND)
            {
                return self
                    .fail(original, &mut claim, Some(Condition::deleting()), &e)
                    .await;
            }
        }
        if let Err(e) = self.finalizer.finalize(&mut claim).await {
            return self
                .fail(original, &mut claim, Some(Condition::deleting()), &e)
                .await;
        }

        // The claim is most likely gone by now; anything else still holding
        // it will see the final status.
        claim.set_conditions(&[Condition::reconcile_success()]);
        match self
            .update_status(original, &mut claim, ReconcileResult::done())
            .await
        {
            Err(e) if e.is_not_found() => Ok(ReconcileResult::done()),
            other => other,
        }
    }

    async fn provision(&self, claim: &mut C, managed: &mut M) -> Result<()> {
        let Some(class_ref) = claim.class_reference().cloned() else {
            return Ok(());
        };
        let class: K = self
            .client
            .get(self.class_kind.gvk(), &class_ref.key())
            .await
            .step(ERR_GET_CLASS)?;
        self.configurator
            .configure(claim, &class, managed)
            .step(ERR_CONFIGURE_MANAGED)?;
        self.creator.create(claim, &class, managed).await?;
        self.finalizer.add_finalizer(claim).await
    }

    async fn bind(&self, claim: &mut C, managed: &mut M) -> Result<()> {
        self.propagator
            .propagate_connection(claim, managed)
            .await
            .step(ERR_PROPAGATE_SECRET)?;
        self.finalizer.add_finalizer(claim).await?;
        self.binder.bind(claim, managed).await.step(ERR_BIND)
    }
}

#[async_trait]
impl<C: Claim, K: Class, M: Managed> Reconciler for ClaimReconciler<C, K, M> {
    async fn reconcile(&self, key: &ObjectKey) -> Result<ReconcileResult> {
        debug!(claim = %key, kind = %self.claim_kind, "Reconciling claim");

        let mut claim: C = match self.client.get(self.claim_kind.gvk(), key).await {
            Ok(claim) => claim,
            Err(e) if e.is_not_found() => return Ok(ReconcileResult::done()),
            Err(e) => {
                warn!(claim = %key, error = %e, "{ERR_GET_CLAIM}");
                return Ok(ReconcileResult::requeue_after(self.short_wait));
            }
        };
        let original = claim.clone();

        let mut managed = M::of_kind(self.managed_kind.gvk());
        if let Some(reference) = claim.resource_reference().cloned() {
            match self
                .client
                .get::<M>(self.managed_kind.gvk(), &reference.key())
                .await
            {
                Ok(found) => managed = found,
                Err(e) if e.is_not_found() => {
                    if !claim.meta().was_deleted() {
                        debug!(claim = %key, managed = %reference, "Referenced managed resource does not exist yet");
                        claim.set_conditions(&[Condition::binding(), Condition::reconcile_success()]);
                        return self
                            .update_status(
                                &original,
                                &mut claim,
                                ReconcileResult::requeue_after(self.short_wait),
                            )
                            .await;
                    }
                }
                Err(e) => {
                    let err = Error::step(ERR_GET_MANAGED, e);
                    return self.fail(&original, &mut claim, None, &err).await;
                }
            }
        }

        if claim.meta().was_deleted() {
            return self.delete(&original, claim, managed).await;
        }

        if !managed.meta().was_created() && claim.class_reference().is_some() {
            claim.set_conditions(&[Condition::creating()]);
            if let Err(e) = self.provision(&mut claim, &mut managed).await {
                return self
                    .fail(&original, &mut claim, Some(Condition::creating()), &e)
                    .await;
            }
        }

        if !managed.is_bindable() && !managed.is_bound() {
            claim.set_conditions(&[Condition::binding(), Condition::reconcile_success()]);
            // Until something claims it there is nothing to watch that
            // would wake us up.
            let result = if managed.claim_reference().is_none() {
                ReconcileResult::requeue_after(self.short_wait)
            } else {
                ReconcileResult::done()
            };
            return self.update_status(&original, &mut claim, result).await;
        }

        if let Err(e) = self.bind(&mut claim, &mut managed).await {
            return self.fail(&original, &mut claim, None, &e).await;
        }
        if original.binding_phase() != claim.binding_phase() {
            info!(claim = %key, managed = %managed.key(), "Bound claim to managed resource");
        }

        claim.set_conditions(&[Condition::available(), Condition::reconcile_success()]);
        self.update_status(&original, &mut claim, ReconcileResult::done())
            .await
    }
}

/// Builder for [`ClaimReconciler`].
pub struct ClaimReconcilerBuilder<C, K, M> {
    client: Client,
    claim_kind: ClaimKind,
    class_kind: ClassKind,
    managed_kind: ManagedKind,
    short_wait: Duration,
    configurator: Option<Box<dyn ManagedConfigurator<C, K, M>>>,
    creator: Option<Box<dyn ManagedCreator<C, K, M>>>,
    propagator: Option<Box<dyn ManagedConnectionPropagator<C, M>>>,
    binder: Option<Box<dyn ManagedBinder<C, M>>>,
    finalizer: Option<Box<dyn ClaimFinalizer<C>>>,
}

impl<C: Claim, K: Class, M: Managed> ClaimReconcilerBuilder<C, K, M> {
    pub fn new(
        client: Client,
        claim_kind: ClaimKind,
        class_kind: ClassKind,
        managed_kind: ManagedKind,
    ) -> Self {
        Self {
            client,
            claim_kind,
            class_kind,
            managed_kind,
            short_wait: SHORT_WAIT,
            configurator: None,
            creator: None,
            propagator: None,
            binder: None,
            finalizer: None,
        }
    }

    #[must_use]
    pub fn with_short_wait(mut self, wait: Duration) -> Self {
        self.short_wait = wait;
        self
    }

    /// Replace the configurators run before provisioning.
    #[must_use]
    pub fn with_configurator(
        mut self,
        configurator: impl ManagedConfigurator<C, K, M> + 'static,
    ) -> Self {
        self.configurator = Some(Box::new(configurator));
        self
    }

    #[must_use]
    pub fn with_creator(mut self, creator: impl ManagedCreator<C, K, M> + 'static) -> Self {
        self.creator = Some(Box::new(creator));
        self
    }

    #[must_use]
    pub fn with_propagator(
        mut self,
        propagator: impl ManagedConnectionPropagator<C, M> + 'static,
    ) -> Self {
        self.propagator = Some(Box::new(propagator));
        self
    }

    #[must_use]
    pub fn with_binder(mut self, binder: impl ManagedBinder<C, M> + 'static) -> Self {
        self.binder = Some(Box::new(binder));
        self
    }

    #[must_use]
    pub fn with_finalizer(mut self, finalizer: impl ClaimFinalizer<C> + 'static) -> Self {
        self.finalizer = Some(Box::new(finalizer));
        self
    }

    /// Build the reconciler. Unset capabilities default to their API
    /// implementations and the standard configurator chain.
    pub fn build(self) -> Result<ClaimReconciler<C, K, M>> {
        if self.short_wait.is_zero() {
            return Err(Error::invalid_config("short wait must be non-zero"));
        }
        if self.claim_kind.gvk() == self.managed_kind.gvk() {
            return Err(Error::invalid_config(format!(
                "claim and managed resource kinds must differ, both are {}",
                self.claim_kind
            )));
        }

        let client = self.client;
        Ok(ClaimReconciler {
            configurator: self
                .configurator
                .unwrap_or_else(|| Box::new(ConfiguratorChain::standard())),
            creator: self
                .creator
                .unwrap_or_else(|| Box::new(ApiManagedCreator::new(client.clone()))),
            propagator: self
                .propagator
                .unwrap_or_else(|| Box::new(ApiConnectionPropagator::new(client.clone()))),
            binder: self
                .binder
                .unwrap_or_else(|| Box::new(ApiBinder::new(client.clone()))),
            finalizer: self
                .finalizer
                .unwrap_or_else(|| Box::new(ApiClaimFinalizer::new(client.clone()))),
            client,
            claim_kind: self.claim_kind,
            class_kind: self.class_kind,
            managed_kind: self.managed_kind,
            short_wait: self.short_wait,
        })
    }
}
