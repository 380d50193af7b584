//! Default class selection for claims that name no class.
//!
//! Several defaulting loops may race for the same claim (one per claim and
//! class kind pair). Each picks uniformly among its default classes and
//! waits a random jitter before writing, so identical list results do not
//! lead every loop to the same class at the same instant. Whoever writes
//! first wins; the others see a conflict and stop.

use std::marker::PhantomData;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tether_resource::{reference_to, Claim, Class, Client, ListOptions, ObjectKey};
use tracing::{debug, info};

use crate::error::{Result, StepExt};
use crate::reconciler::Reconciler;
use crate::types::{ClaimKind, ClassKind, ReconcileResult};

use super::{ERR_GET_CLAIM, SHORT_WAIT};

/// Marks a class as a default for claims of its kind.
pub const ANNOTATION_DEFAULT_CLASS: &str = "tether.dev/default-class";
pub const ANNOTATION_DEFAULT_CLASS_VALUE: &str = "true";

/// Upper bound of the random wait before writing a chosen class.
pub const DEFAULT_MAX_JITTER: Duration = Duration::from_millis(1500);

pub const ERR_LIST_CLASSES: &str = "cannot list resource classes";
pub const ERR_UPDATE_CLAIM: &str = "cannot update resource claim";

/// Random class choice and write jitter, shared by the defaulting and
/// scheduling loops.
pub(crate) struct ClassPicker {
    rng: Mutex<StdRng>,
    max_jitter: Duration,
}

impl ClassPicker {
    pub(crate) fn from_entropy() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
            max_jitter: DEFAULT_MAX_JITTER,
        }
    }

    pub(crate) fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            max_jitter: DEFAULT_MAX_JITTER,
        }
    }

    pub(crate) fn max_jitter(&self) -> Duration {
        self.max_jitter
    }

    pub(crate) fn set_max_jitter(&mut self, max_jitter: Duration) {
        self.max_jitter = max_jitter;
    }

    /// Pick one candidate and a jitter to wait before using it.
    pub(crate) fn pick<'a, T>(&self, candidates: &'a [T]) -> Option<(&'a T, Duration)> {
        // The lock only guards the rng; it is never held across an await.
        let mut rng = self
            .rng
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let chosen = candidates.choose(&mut *rng)?;
        let max_ms = u64::try_from(self.max_jitter.as_millis()).unwrap_or(u64::MAX);
        let jitter = Duration::from_millis(rng.gen_range(0..=max_ms));
        Some((chosen, jitter))
    }
}

/// Point `claim` at `class`. Losing the race to another writer is success;
/// returns whether this write landed.
pub(crate) async fn set_class<C: Claim, K: Class>(
    client: &Client,
    claim: &mut C,
    class: &K,
) -> Result<bool> {
    claim.set_class_reference(Some(reference_to(class)));
    match client.update(claim).await {
        Ok(()) => Ok(true),
        Err(e) if e.is_conflict() => Ok(false),
        Err(e) => Err(e).step(ERR_UPDATE_CLAIM),
    }
}

/// Fetch a claim for one of the class selection loops. `None` means there
/// is nothing to do.
pub(crate) async fn get_claim<C: Claim>(
    client: &Client,
    kind: &ClaimKind,
    key: &ObjectKey,
) -> Result<Option<C>> {
    match client.get::<C>(kind.gvk(), key).await {
        Ok(claim) => Ok(Some(claim)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e).step(ERR_GET_CLAIM),
    }
}

/// Assigns a randomly chosen default class to claims of one kind.
pub struct DefaultClassReconciler<C, K> {
    client: Client,
    claim_kind: ClaimKind,
    class_kind: ClassKind,
    short_wait: Duration,
    picker: ClassPicker,
    _kinds: PhantomData<fn() -> (C, K)>,
}

impl<C: Claim, K: Class> DefaultClassReconciler<C, K> {
    pub fn new(client: Client, claim_kind: ClaimKind, class_kind: ClassKind) -> Self {
        Self {
            client,
            claim_kind,
            class_kind,
            short_wait: SHORT_WAIT,
            picker: ClassPicker::from_entropy(),
            _kinds: PhantomData,
        }
    }

    /// Use a deterministic random sequence.
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
    pub fn with_short_wait(mut self, wait: Duration) -> Self {
        self.short_wait = wait;
        self
    }
}

/// Whether a claim is still waiting for any class to be chosen.
pub(crate) fn needs_class<C: Claim>(claim: &C) -> bool {
    claim.class_reference().is_none() && claim.resource_reference().is_none()
}

#[async_trait]
impl<C: Claim, K: Class> Reconciler for DefaultClassReconciler<C, K> {
    async fn reconcile(&self, key: &ObjectKey) -> Result<ReconcileResult> {
        let Some(mut claim) = get_claim::<C>(&self.client, &self.claim_kind, key).await? else {
            return Ok(ReconcileResult::done());
        };
        if !needs_class(&claim) || claim.class_selector().is_some() {
            return Ok(ReconcileResult::done());
        }

        let defaults: Vec<K> = self
            .client
            .list::<K>(self.class_kind.gvk(), &ListOptions::default())
            .await
            .step(ERR_LIST_CLASSES)?
            .into_iter()
            .filter(|class| {
                class.meta().annotation(ANNOTATION_DEFAULT_CLASS)
                    == Some(ANNOTATION_DEFAULT_CLASS_VALUE)
            })
            .collect();

        let Some((class, jitter)) = self.picker.pick(&defaults) else {
            debug!(claim = %key, class_kind = %self.class_kind, "No default class found");
            return Ok(ReconcileResult::requeue_after(self.short_wait));
        };

        tokio::time::sleep(jitter).await;
        if set_class(&self.client, &mut claim, class).await? {
            info!(claim = %key, class = %class.key(), "Defaulted claim class");
        } else {
            debug!(claim = %key, "Claim was defaulted concurrently");
        }
        Ok(ReconcileResult::done())
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use tether_resource::{
        FaultyStore, GroupVersionKind, HasClassReference, InMemoryStore, Object, Operation,
        ResourceClaim, ResourceClass, Error as StoreError,
    };

    use super::*;

    fn claim_kind() -> ClaimKind {
        GroupVersionKind::new("database.example.org", "v1", "MySQLInstance").into()
    }

    fn class_kind() -> ClassKind {
        GroupVersionKind::new("database.example.org", "v1", "MySQLInstanceClass").into()
    }

    async fn create_class(client: &Client, name: &str, default: bool) -> ResourceClass {
        let mut class = ResourceClass::of_kind(class_kind().gvk());
        class.metadata.name = name.to_string();
        class.metadata.namespace = Some("infra".to_string());
        if default {
            class
                .metadata
                .set_annotation(ANNOTATION_DEFAULT_CLASS, ANNOTATION_DEFAULT_CLASS_VALUE);
        }
        client.create(&mut class).await.unwrap();
        class
    }

    async fn create_claim(client: &Client, name: &str) -> ResourceClaim {
        let mut claim = ResourceClaim::of_kind(claim_kind().gvk());
        claim.metadata.name = name.to_string();
        claim.metadata.namespace = Some("app".to_string());
        client.create(&mut claim).await.unwrap();
        claim
    }

    fn reconciler(client: &Client) -> DefaultClassReconciler<ResourceClaim, ResourceClass> {
        DefaultClassReconciler::new(client.clone(), claim_kind(), class_kind()).with_seed(7)
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_default_class_requeues() {
        let client = Client::new(InMemoryStore::new_arc());
        create_class(&client, "plain", false).await;
        let claim = create_claim(&client, "c1").await;

        let result = reconciler(&client).reconcile(&claim.key()).await.unwrap();

        assert_eq!(result, ReconcileResult::requeue_after(SHORT_WAIT));
        let claim: ResourceClaim = client.get(claim_kind().gvk(), &claim.key()).await.unwrap();
        assert!(claim.class_reference().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_picks_one_of_the_defaults() {
        let client = Client::new(InMemoryStore::new_arc());
        create_class(&client, "k1", true).await;
        create_class(&client, "k2", true).await;
        create_class(&client, "plain", false).await;
        let claim = create_claim(&client, "c1").await;

        let result = reconciler(&client).reconcile(&claim.key()).await.unwrap();

        assert!(result.is_done());
        let claim: ResourceClaim = client.get(claim_kind().gvk(), &claim.key()).await.unwrap();
        let chosen = claim.class_reference().expect("class reference");
        assert!(chosen.name == "k1" || chosen.name == "k2");
        assert_eq!(chosen.namespace.as_deref(), Some("infra"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_claim_with_class_is_left_alone() {
        let store = InMemoryStore::new_arc();
        let client = Client::new(store.clone());
        let class = create_class(&client, "k1", true).await;
        let mut claim = create_claim(&client, "c1").await;
        claim.set_class_reference(Some(reference_to(&class)));
        client.update(&mut claim).await.unwrap();
        let writes = store.stats().writes;

        let result = reconciler(&client).reconcile(&claim.key()).await.unwrap();

        assert!(result.is_done());
        assert_eq!(store.stats().writes, writes);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_claim_is_done() {
        let client = Client::new(InMemoryStore::new_arc());
        let result = reconciler(&client)
            .reconcile(&ObjectKey::namespaced("app", "gone"))
            .await
            .unwrap();
        assert!(result.is_done());
    }

    #[tokio::test(start_paused = true)]
    async fn test_conflict_on_write_is_success() {
        let store = Arc::new(FaultyStore::new(InMemoryStore::new()));
        let client = Client::new(store.clone());
        create_class(&client, "k1", true).await;
        let claim = create_claim(&client, "c1").await;
        store.fail(
            Operation::Update,
            StoreError::conflict(claim_kind().gvk(), claim.key(), "stale"),
        );

        let result = reconciler(&client).reconcile(&claim.key()).await.unwrap();

        assert!(result.is_done());
    }

    #[tokio::test]
    async fn test_set_class_reports_whether_the_write_landed() {
        let store = Arc::new(FaultyStore::new(InMemoryStore::new()));
        let client = Client::new(store.clone());
        let class = create_class(&client, "k1", true).await;
        let mut claim = create_claim(&client, "c1").await;

        store.fail(
            Operation::Update,
            StoreError::conflict(claim_kind().gvk(), claim.key(), "stale"),
        );
        assert!(!set_class(&client, &mut claim.clone(), &class).await.unwrap());

        store.clear();
        assert!(set_class(&client, &mut claim, &class).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_write_errors_surface() {
        let store = Arc::new(FaultyStore::new(InMemoryStore::new()));
        let client = Client::new(store.clone());
        create_class(&client, "k1", true).await;
        let claim = create_claim(&client, "c1").await;
        store.fail(Operation::Update, StoreError::unavailable("update", "down"));

        let err = reconciler(&client).reconcile(&claim.key()).await.unwrap_err();

        assert_eq!(err.step_message(), Some(ERR_UPDATE_CLAIM));
    }

    #[tokio::test(start_paused = true)]
    async fn test_choice_is_spread_across_defaults() {
        let client = Client::new(InMemoryStore::new_arc());
        create_class(&client, "k1", true).await;
        create_class(&client, "k2", true).await;
        let r = reconciler(&client);

        let mut chosen = HashSet::new();
        for i in 0..20 {
            let claim = create_claim(&client, &format!("c{i}")).await;
            r.reconcile(&claim.key()).await.unwrap();
            let claim: ResourceClaim =
                client.get(claim_kind().gvk(), &claim.key()).await.unwrap();
            chosen.insert(claim.class_reference().unwrap().name.clone());
        }

        assert!(chosen.len() > 1, "every claim got the same class: {chosen:?}");
    }

    #[test]
    fn test_jitter_is_bounded() {
        let mut picker = ClassPicker::seeded(1);
        picker.set_max_jitter(Duration::from_millis(10));
        for _ in 0..100 {
            let (_, jitter) = picker.pick(&[1, 2, 3]).unwrap();
            assert!(jitter <= Duration::from_millis(10));
        }
        assert!(picker.pick::<u8>(&[]).is_none());
    }
}
