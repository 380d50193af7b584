//! Mutual-consent propagation of secret data.
//!
//! A propagated secret names its source; the source names each consumer it
//! agrees to feed. Data is only copied when both sides agree on each
//! other's identity.

use std::time::Duration;

use async_trait::async_trait;
use tether_resource::secret::{
    propagate_to_key, propagation_consumers, ANNOTATION_DELIMITER,
    ANNOTATION_PROPAGATE_FROM_NAME, ANNOTATION_PROPAGATE_FROM_NAMESPACE,
    ANNOTATION_PROPAGATE_FROM_UID,
};
use tether_resource::{secret_kind, Client, ObjectKey, Secret};
use tracing::{debug, info, warn};

use crate::error::{Error, Result, StepExt};
use crate::reconciler::Reconciler;
use crate::types::ReconcileResult;

pub const ERR_GET_PROPAGATED: &str = "cannot get propagated secret";
pub const ERR_GET_PROPAGATING: &str = "cannot get propagating secret";
pub const ERR_UPDATE_PROPAGATED: &str = "cannot update propagated secret";

/// What a propagation attempt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Propagation {
    /// Target or source does not exist, or the target names no source.
    Skipped,
    /// Target data already matched the source.
    Unchanged,
    Updated,
}

/// Copies data from propagating secrets into the secrets they agreed to
/// feed.
#[derive(Clone)]
pub struct SecretPropagator {
    client: Client,
}

impl SecretPropagator {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Check consent between `from` and `to`.
    fn check_consent(from: &Secret, to: &Secret) -> Result<()> {
        if to.metadata.annotation(ANNOTATION_PROPAGATE_FROM_UID) != Some(from.metadata.uid.as_str())
        {
            return Err(Error::UnexpectedFromUid);
        }
        if from
            .metadata
            .annotation(&propagate_to_key(&to.metadata.uid))
            .is_some()
        {
            return Ok(());
        }

        let target = format!(
            "{}{ANNOTATION_DELIMITER}{}",
            to.metadata.namespace.as_deref().unwrap_or_default(),
            to.metadata.name
        );
        if propagation_consumers(from).any(|(_, named)| named == target) {
            // Consent was given to an earlier secret with the same name.
            return Err(Error::UnexpectedToUid);
        }
        Err(Error::PropagationNotAllowed)
    }

    /// Propagate into the secret at `key`.
    pub async fn propagate(&self, key: &ObjectKey) -> Result<Propagation> {
        let mut to: Secret = match self.client.get(&secret_kind(), key).await {
            Ok(secret) => secret,
            Err(e) if e.is_not_found() => return Ok(Propagation::Skipped),
            Err(e) => return Err(e).step(ERR_GET_PROPAGATED),
        };

        let (Some(namespace), Some(name)) = (
            to.metadata.annotation(ANNOTATION_PROPAGATE_FROM_NAMESPACE),
            to.metadata.annotation(ANNOTATION_PROPAGATE_FROM_NAME),
        ) else {
            return Ok(Propagation::Skipped);
        };
        let from_key = ObjectKey::namespaced(namespace, name);

        let from: Secret = match self.client.get(&secret_kind(), &from_key).await {
            Ok(secret) => secret,
            Err(e) if e.is_not_found() => {
                debug!(secret = %key, from = %from_key, "Propagating secret does not exist");
                return Ok(Propagation::Skipped);
            }
            Err(e) => return Err(e).step(ERR_GET_PROPAGATING),
        };

        Self::check_consent(&from, &to)?;

        let original = to.clone();
        to.data.clone_from(&from.data);
        let updated = self
            .client
            .update_if_changed(&original, &mut to)
            .await
            .step(ERR_UPDATE_PROPAGATED)?;
        if updated {
            info!(secret = %key, from = %from_key, "Propagated secret data");
            Ok(Propagation::Updated)
        } else {
            Ok(Propagation::Unchanged)
        }
    }
}

/// Runs [`SecretPropagator`] for each propagated secret.
///
/// Refusals stop without requeueing: only a change to one of the secrets
/// can resolve them.
pub struct SecretPropagatingReconciler {
    propagator: SecretPropagator,
    short_wait: Duration,
}

impl SecretPropagatingReconciler {
    pub fn new(client: Client) -> Self {
        Self {
            propagator: SecretPropagator::new(client),
            short_wait: crate::claim::SHORT_WAIT,
        }
    }

    #[must_use]
    pub fn with_short_wait(mut self, wait: Duration) -> Self {
        self.short_wait = wait;
        self
    }
}

#[async_trait]
impl Reconciler for SecretPropagatingReconciler {
    async fn reconcile(&self, key: &ObjectKey) -> Result<ReconcileResult> {
        match self.propagator.propagate(key).await {
            Ok(_) => Ok(ReconcileResult::done()),
            Err(e) if e.is_refusal() => {
                warn!(secret = %key, error = %e, "Refusing to propagate secret");
                Ok(ReconcileResult::done())
            }
            Err(e) => {
                warn!(secret = %key, error = %e, "Secret propagation failed");
                Ok(ReconcileResult::requeue_after(self.short_wait))
            }
        }
    }
}
