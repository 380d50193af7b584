//! Class selection by label selector.

use std::marker::PhantomData;
use std::time::Duration;

use async_trait::async_trait;
use tether_resource::{Claim, Class, Client, ListOptions, ObjectKey};
use tracing::{debug, info};

use crate::error::{Result, StepExt};
use crate::reconciler::Reconciler;
use crate::types::{ClaimKind, ClassKind, ReconcileResult};

use super::defaulting::{get_claim, needs_class, set_class, ClassPicker, ERR_LIST_CLASSES};
use super::LONG_WAIT;

/// Assigns claims that carry a class selector a random matching class.
pub struct ClassSchedulingReconciler<C, K> {
    client: Client,
    claim_kind: ClaimKind,
    class_kind: ClassKind,
    long_wait: Duration,
    picker: ClassPicker,
    _kinds: PhantomData<fn() -> (C, K)>,
}

impl<C: Claim, K: Class> ClassSchedulingReconciler<C, K> {
    pub fn new(client: Client, claim_kind: ClaimKind, class_kind: ClassKind) -> Self {
        Self {
            client,
            claim_kind,
            class_kind,
            long_wait: LONG_WAIT,
            picker: ClassPicker::from_entropy(),
            _kinds: PhantomData,
        }
    }

    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        let mut picker = ClassPicker::seeded(seed);
        picker.set_max_jitter(self.picker.max_jitter());
        self.picker = picker;
        self
    }

    #[must_use]
    pub fn with_max_jitter(mut self, max_jitter: Duration) -> Self {
        self.picker.set_max_jitter(max_jitter);
        self
    }

    #[must_use]
    pub fn with_long_wait(mut self, wait: Duration) -> Self {
        self.long_wait = wait;
        self
    }
}

#[async_trait]
impl<C: Claim, K: Class> Reconciler for ClassSchedulingReconciler<C, K> {
    async fn reconcile(&self, key: &ObjectKey) -> Result<ReconcileResult> {
        let Some(mut claim) = get_claim::<C>(&self.client, &self.claim_kind, key).await? else {
            return Ok(ReconcileResult::done());
        };
        if !needs_class(&claim) {
            return Ok(ReconcileResult::done());
        }
        let Some(selector) = claim.class_selector().cloned() else {
            return Ok(ReconcileResult::done());
        };

        let options = ListOptions::default().with_labels(selector.match_labels);
        let classes: Vec<K> = self
            .client
            .list(self.class_kind.gvk(), &options)
            .await
            .step(ERR_LIST_CLASSES)?;

        let Some((class, jitter)) = self.picker.pick(&classes) else {
            debug!(claim = %key, class_kind = %self.class_kind, "No class matches claim selector");
            return Ok(ReconcileResult::requeue_after(self.long_wait));
        };

        tokio::time::sleep(jitter).await;
        if set_class(&self.client, &mut claim, class).await? {
            info!(claim = %key, class = %class.key(), "Scheduled claim to class");
        } else {
            debug!(claim = %key, "Claim was scheduled concurrently");
        }
        Ok(ReconcileResult::done())
    }
}
