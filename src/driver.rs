//! Polling driver for the control loops.
//!
//! Each round lists every watched kind and diffs the result against the
//! previous round. A controller reconciles the keys of its own kind that
//! changed, the keys its triggers map related changes to, and the keys whose
//! requeue is due. Errors are retried after `retry_after`.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tether_reconciler::Reconciler;
use tether_resource::{DynamicObject, GroupVersionKind, ListOptions, ObjectKey, Store};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Maps an object of a related kind to the keys a controller should revisit.
pub type KeyMapper = Arc<dyn Fn(&DynamicObject) -> Vec<ObjectKey> + Send + Sync>;

/// One control loop and the kinds whose changes wake it.
pub struct Controller {
    name: String,
    kind: GroupVersionKind,
    reconciler: Arc<dyn Reconciler>,
    triggers: Vec<(GroupVersionKind, KeyMapper)>,
}

impl Controller {
    pub fn new(
        name: impl Into<String>,
        kind: GroupVersionKind,
        reconciler: impl Reconciler + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            reconciler: Arc::new(reconciler),
            triggers: Vec::new(),
        }
    }

    /// Also reconcile the keys `mapper` returns for changed objects of `kind`.
    #[must_use]
    pub fn triggered_by<F>(mut self, kind: GroupVersionKind, mapper: F) -> Self
    where
        F: Fn(&DynamicObject) -> Vec<ObjectKey> + Send + Sync + 'static,
    {
        self.triggers.push((kind, Arc::new(mapper)));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &GroupVersionKind {
        &self.kind
    }
}

/// Controllers waiting to join the driver at its next round.
///
/// Cloned into readiness gate callbacks, which may fire in the middle of a
/// round.
#[derive(Clone, Default)]
pub struct Starter {
    queue: Arc<Mutex<Vec<Controller>>>,
}

impl Starter {
    pub fn start(&self, controller: Controller) {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(controller);
    }

    pub fn is_empty(&self) -> bool {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    fn drain(&self) -> Vec<Controller> {
        std::mem::take(&mut *self.queue.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Configuration for the driver.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Interval between rounds when running continuously.
    pub interval: Duration,
    /// Rounds [`Driver::converge`] runs before giving up.
    pub max_rounds: u32,
    /// Delay before retrying a key whose reconcile failed.
    pub retry_after: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            max_rounds: 20,
            retry_after: Duration::from_secs(30),
        }
    }
}

impl From<&tether_core::Config> for DriverConfig {
    fn from(config: &tether_core::Config) -> Self {
        Self {
            interval: config.runtime.poll_interval(),
            max_rounds: config.runtime.max_rounds,
            retry_after: config.reconcile.short_wait(),
        }
    }
}

/// What a single round did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundOutcome {
    pub started: usize,
    pub changed: usize,
    pub reconciled: usize,
    pub errors: usize,
}

impl RoundOutcome {
    /// Nothing started, nothing changed since the last round and nothing
    /// failed.
    pub const fn is_quiet(&self) -> bool {
        self.started == 0 && self.changed == 0 && self.errors == 0
    }
}

/// How [`Driver::converge`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Convergence {
    pub rounds: u32,
    pub converged: bool,
}

type Snapshot = BTreeMap<(GroupVersionKind, ObjectKey), DynamicObject>;
type Slot = (usize, ObjectKey);

/// Runs controllers against a store in rounds.
pub struct Driver {
    store: Arc<dyn Store>,
    config: DriverConfig,
    controllers: Vec<Controller>,
    starter: Starter,
    seen: Snapshot,
    /// Keys to reconcile; `None` means at the next round.
    queue: BTreeMap<Slot, Option<Instant>>,
    stop_tx: watch::Sender<bool>,
}

impl Driver {
    pub fn new(store: Arc<dyn Store>, config: DriverConfig) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            store,
            config,
            controllers: Vec::new(),
            starter: Starter::default(),
            seen: Snapshot::new(),
            queue: BTreeMap::new(),
            stop_tx,
        }
    }

    /// Start `controller` at the next round.
    pub fn add(&self, controller: Controller) {
        self.starter.start(controller);
    }

    /// Handle for starting controllers later, e.g. from a gate callback.
    pub fn starter(&self) -> Starter {
        self.starter.clone()
    }

    /// Names of the running controllers, in start order.
    pub fn controllers(&self) -> Vec<&str> {
        self.controllers.iter().map(Controller::name).collect()
    }

    fn watched_kinds(&self) -> BTreeSet<GroupVersionKind> {
        self.controllers
            .iter()
            .flat_map(|c| std::iter::once(&c.kind).chain(c.triggers.iter().map(|(k, _)| k)))
            .cloned()
            .collect()
    }

    /// List every watched kind. A kind that cannot be listed keeps its
    /// previous objects so they do not look deleted.
    async fn snapshot(&self) -> (Snapshot, usize) {
        let mut snapshot = Snapshot::new();
        let mut errors = 0;
        for gvk in self.watched_kinds() {
            match self.store.list(&gvk, &ListOptions::default()).await {
                Ok(objects) => {
                    for obj in objects {
                        snapshot.insert((gvk.clone(), obj.key()), obj);
                    }
                }
                Err(e) => {
                    warn!(kind = %gvk, error = %e, "Cannot list watched kind");
                    errors += 1;
                    snapshot.extend(
                        self.seen
                            .iter()
                            .filter(|((kind, _), _)| *kind == gvk)
                            .map(|(k, v)| (k.clone(), v.clone())),
                    );
                }
            }
        }
        (snapshot, errors)
    }

    /// Objects that appeared, changed version or vanished between `before`
    /// and `after`. Vanished objects are reported as last seen.
    fn diff<'a>(before: &'a Snapshot, after: &'a Snapshot) -> Vec<&'a DynamicObject> {
        let changed = after.iter().filter(|(key, obj)| {
            before
                .get(*key)
                .is_none_or(|old| old.metadata.resource_version != obj.metadata.resource_version)
        });
        let vanished = before.iter().filter(|(key, _)| !after.contains_key(*key));
        changed.chain(vanished).map(|(_, obj)| obj).collect()
    }

    fn enqueue(&mut self, changed: &[DynamicObject]) {
        let mut slots = Vec::new();
        for obj in changed {
            for (index, controller) in self.controllers.iter().enumerate() {
                if controller.kind == obj.gvk {
                    slots.push((index, obj.key()));
                }
                for (kind, mapper) in &controller.triggers {
                    if *kind == obj.gvk {
                        slots.extend(mapper(obj).into_iter().map(|key| (index, key)));
                    }
                }
            }
        }
        for slot in slots {
            self.queue.insert(slot, None);
        }
    }

    /// Run one round. With `eager`, requeued keys are reconciled regardless
    /// of their deadline.
    pub async fn round(&mut self, eager: bool) -> RoundOutcome {
        let mut outcome = RoundOutcome::default();

        let first_new = self.controllers.len();
        for controller in self.starter.drain() {
            info!(controller = controller.name(), kind = %controller.kind, "Starting controller");
            self.controllers.push(controller);
            outcome.started += 1;
        }

        let (snapshot, list_errors) = self.snapshot().await;
        outcome.errors += list_errors;
        let changed: Vec<DynamicObject> = Self::diff(&self.seen, &snapshot)
            .into_iter()
            .cloned()
            .collect();
        outcome.changed = changed.len();
        // New controllers start from a full listing of their kind.
        for (index, controller) in self.controllers.iter().enumerate().skip(first_new) {
            for (kind, key) in snapshot.keys() {
                if *kind == controller.kind {
                    self.queue.insert((index, key.clone()), None);
                }
            }
        }
        self.seen = snapshot;
        self.enqueue(&changed);

        let now = Instant::now();
        let due: Vec<Slot> = self
            .queue
            .iter()
            .filter(|(_, at)| eager || at.is_none_or(|at| at <= now))
            .map(|(slot, _)| slot.clone())
            .collect();

        for slot in due {
            self.queue.remove(&slot);
            let Some(controller) = self.controllers.get(slot.0) else {
                continue;
            };
            let name = controller.name.clone();
            let reconciler = Arc::clone(&controller.reconciler);
            let (_, key) = &slot;

            outcome.reconciled += 1;
            match reconciler.reconcile(key).await {
                Ok(result) if result.requeue => {
                    self.queue.insert(slot, None);
                }
                Ok(result) => {
                    if let Some(after) = result.requeue_after {
                        debug!(controller = %name, key = %key, ?after, "Requeued");
                        self.queue.insert(slot, Some(now + after));
                    }
                }
                Err(e) => {
                    error!(controller = %name, key = %key, error = %e, "Reconcile failed");
                    outcome.errors += 1;
                    self.queue.insert(slot, Some(now + self.config.retry_after));
                }
            }
        }
        outcome
    }

    /// Changes made since the last round's snapshot.
    async fn unobserved_changes(&self) -> usize {
        let (snapshot, errors) = self.snapshot().await;
        Self::diff(&self.seen, &snapshot).len() + errors
    }

    /// Run eager rounds until one observes no change and leaves none behind,
    /// or `max_rounds` is reached.
    pub async fn converge(&mut self) -> Convergence {
        for round in 1..=self.config.max_rounds {
            let outcome = self.round(true).await;
            debug!(round, ?outcome, "Round finished");
            if outcome.is_quiet()
                && self.starter.is_empty()
                && self.unobserved_changes().await == 0
            {
                info!(rounds = round, "Converged");
                return Convergence {
                    rounds: round,
                    converged: true,
                };
            }
        }
        warn!(max_rounds = self.config.max_rounds, "Did not converge");
        Convergence {
            rounds: self.config.max_rounds,
            converged: false,
        }
    }

    /// Run rounds every `interval` until stopped.
    pub async fn run(&mut self) {
        info!(
            interval_ms = self.config.interval.as_millis(),
            "Starting driver"
        );
        let mut stop_rx = self.stop_tx.subscribe();
        let mut interval = tokio::time::interval(self.config.interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let outcome = self.round(false).await;
                    if !outcome.is_quiet() {
                        debug!(?outcome, "Round finished");
                    }
                }
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        info!("Driver stopped");
                        return;
                    }
                }
            }
        }
    }

    pub fn stopper(&self) -> DriverStopper {
        DriverStopper {
            stop_tx: self.stop_tx.clone(),
        }
    }
}

/// Handle to stop a running driver.
#[derive(Clone)]
pub struct DriverStopper {
    stop_tx: watch::Sender<bool>,
}

impl DriverStopper {
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tether_reconciler::ReconcileResult;
    use tether_resource::{InMemoryStore, ObjectMeta};

    use super::*;

    struct Counting {
        calls: Arc<AtomicUsize>,
        result: ReconcileResult,
    }

    #[async_trait]
    impl Reconciler for Counting {
        async fn reconcile(&self, _key: &ObjectKey) -> tether_reconciler::Result<ReconcileResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.result)
        }
    }

    fn kind() -> GroupVersionKind {
        GroupVersionKind::new("example.org", "v1", "Widget")
    }

    fn widget(name: &str) -> DynamicObject {
        DynamicObject {
            gvk: kind(),
            metadata: ObjectMeta {
                name: name.to_string(),
                namespace: Some("default".to_string()),
                ..ObjectMeta::default()
            },
            ..DynamicObject::default()
        }
    }

    fn counting(result: ReconcileResult) -> (Arc<AtomicUsize>, Controller) {
        let calls = Arc::new(AtomicUsize::new(0));
        let reconciler = Counting {
            calls: Arc::clone(&calls),
            result,
        };
        (calls, Controller::new("widgets", kind(), reconciler))
    }

    /// Given a store with two objects
    /// When a controller starts and two rounds run
    /// Then each object is reconciled once
    #[tokio::test]
    async fn new_controller_sees_existing_objects_once() {
        let store = InMemoryStore::new_arc();
        store.create(widget("a")).await.unwrap();
        store.create(widget("b")).await.unwrap();
        let mut driver = Driver::new(store, DriverConfig::default());
        let (calls, controller) = counting(ReconcileResult::done());
        driver.add(controller);

        let first = driver.round(false).await;
        let second = driver.round(false).await;

        assert_eq!(first.started, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(second.is_quiet());
        assert_eq!(driver.controllers(), vec!["widgets"]);
    }

    #[tokio::test]
    async fn changed_and_deleted_objects_are_reconciled() {
        let store = InMemoryStore::new_arc();
        let a = store.create(widget("a")).await.unwrap();
        let mut driver = Driver::new(store.clone(), DriverConfig::default());
        let (calls, controller) = counting(ReconcileResult::done());
        driver.add(controller);
        driver.round(false).await;

        let mut updated = a.clone();
        updated.metadata.labels.insert("tier".into(), "gold".into());
        store.update(updated).await.unwrap();
        let outcome = driver.round(false).await;
        assert_eq!((outcome.changed, outcome.reconciled), (1, 1));

        store.delete(&kind(), &a.key()).await.unwrap();
        let outcome = driver.round(false).await;
        assert_eq!((outcome.changed, outcome.reconciled), (1, 1));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn requeue_after_waits_unless_eager() {
        let store = InMemoryStore::new_arc();
        store.create(widget("a")).await.unwrap();
        let mut driver = Driver::new(store, DriverConfig::default());
        let (calls, controller) =
            counting(ReconcileResult::requeue_after(Duration::from_secs(10)));
        driver.add(controller);

        driver.round(false).await;
        driver.round(false).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(11)).await;
        driver.round(false).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        driver.round(true).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    /// Given a controller that always asks to be requeued later
    /// When a round runs with nothing new to observe
    /// Then the round is quiet, while a failing round is not
    #[tokio::test]
    async fn requeued_keys_do_not_keep_rounds_busy() {
        let store = InMemoryStore::new_arc();
        store.create(widget("a")).await.unwrap();
        let mut driver = Driver::new(store, DriverConfig::default());
        let (calls, controller) =
            counting(ReconcileResult::requeue_after(Duration::from_secs(10)));
        driver.add(controller);
        driver.round(false).await;

        let outcome = driver.round(true).await;
        assert_eq!(outcome.reconciled, 1);
        assert!(outcome.is_quiet());
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let failing = RoundOutcome {
            errors: 1,
            ..RoundOutcome::default()
        };
        assert!(!failing.is_quiet());
    }

    #[tokio::test]
    async fn triggers_map_related_changes() {
        let store = InMemoryStore::new_arc();
        let mut driver = Driver::new(store.clone(), DriverConfig::default());
        let (calls, controller) = counting(ReconcileResult::done());
        let related = GroupVersionKind::new("example.org", "v1", "Gadget");
        driver.add(controller.triggered_by(related.clone(), |_| {
            vec![ObjectKey::namespaced("default", "owner")]
        }));
        driver.round(false).await;

        let mut gadget = widget("g");
        gadget.gvk = related;
        store.create(gadget).await.unwrap();
        driver.round(false).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn converge_stops_when_quiet() {
        let store = InMemoryStore::new_arc();
        store.create(widget("a")).await.unwrap();
        let mut driver = Driver::new(store, DriverConfig::default());
        let (_, controller) = counting(ReconcileResult::done());
        driver.add(controller);

        let convergence = driver.converge().await;

        assert!(convergence.converged);
        assert_eq!(convergence.rounds, 2);
    }

    #[tokio::test]
    async fn stop_signal_terminates_run() {
        let mut driver = Driver::new(
            InMemoryStore::new_arc(),
            DriverConfig {
                interval: Duration::from_millis(10),
                ..DriverConfig::default()
            },
        );
        let stopper = driver.stopper();
        let handle = tokio::spawn(async move { driver.run().await });

        tokio::time::sleep(Duration::from_millis(30)).await;
        stopper.stop();

        let result = tokio::time::timeout(Duration::from_secs(1), handle).await;
        assert!(result.is_ok(), "driver should stop within the timeout");
    }
}
