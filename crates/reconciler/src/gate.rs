//! Readiness gate for deferred controller start-up.
//!
//! Dependent loops register a callback against the set of kinds they need.
//! The callback fires once, the first time every one of those kinds is
//! ready at the same moment.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

type Callback = Box<dyn FnOnce() + Send + 'static>;

struct Registration<T> {
    kinds: Vec<T>,
    callback: Callback,
}

struct GateState<T> {
    ready: HashMap<T, bool>,
    pending: Vec<Registration<T>>,
}

impl<T: Eq + Hash> GateState<T> {
    fn all_ready(&self, kinds: &[T]) -> bool {
        kinds
            .iter()
            .all(|k| self.ready.get(k).copied().unwrap_or(false))
    }
}

/// Tracks which kinds are ready and who is waiting for them.
pub struct Gate<T> {
    state: Mutex<GateState<T>>,
}

impl<T: Eq + Hash + Clone> Default for Gate<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Eq + Hash + Clone> Gate<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GateState {
                ready: HashMap::new(),
                pending: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GateState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record whether `kind` is ready. Returns true if that changed.
    ///
    /// Marking a kind ready fires every registration that is now satisfied.
    pub fn set(&self, kind: T, ready: bool) -> bool {
        let fire: Vec<Callback> = {
            let mut state = self.lock();
            let previous = state.ready.insert(kind, ready).unwrap_or(false);
            if previous == ready {
                return false;
            }
            if !ready {
                return true;
            }
            let (satisfied, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut state.pending)
                .into_iter()
                .partition(|r| state.all_ready(&r.kinds));
            state.pending = waiting;
            satisfied.into_iter().map(|r| r.callback).collect()
        };

        if !fire.is_empty() {
            debug!(count = fire.len(), "Readiness gate firing callbacks");
        }
        for callback in fire {
            callback();
        }
        true
    }

    /// Run `callback` once every kind in `kinds` is ready, immediately if
    /// they already are.
    pub fn register<F, I>(&self, callback: F, kinds: I)
    where
        F: FnOnce() + Send + 'static,
        I: IntoIterator<Item = T>,
    {
        let kinds: Vec<T> = kinds.into_iter().collect();
        {
            let mut state = self.lock();
            if !state.all_ready(&kinds) {
                state.pending.push(Registration {
                    kinds,
                    callback: Box::new(callback),
                });
                return;
            }
        }
        callback();
    }

    pub fn is_ready(&self, kind: &T) -> bool {
        self.lock().ready.get(kind).copied().unwrap_or(false)
    }

    /// Registrations still waiting.
    pub fn pending(&self) -> usize {
        self.lock().pending.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use proptest::prelude::*;

    use super::*;

    fn counter() -> (Arc<AtomicUsize>, impl FnOnce() + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        (count, move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_fires_once_when_all_kinds_ready() {
        let gate = Gate::new();
        let (count, cb) = counter();
        gate.register(cb, ["a", "b"]);

        assert!(gate.set("a", true));
        assert_eq!(count.load(Ordering::SeqCst), 0);

        assert!(gate.set("b", true));
        assert_eq!(count.load(Ordering::SeqCst), 1);

        assert!(gate.set("a", false));
        assert!(gate.set("a", true));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(gate.pending(), 0);
    }

    #[test]
    fn test_register_when_ready_fires_immediately() {
        let gate = Gate::new();
        gate.set("a", true);
        let (count, cb) = counter();

        gate.register(cb, ["a"]);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(gate.pending(), 0);
    }

    #[test]
    fn test_set_reports_changes_only() {
        let gate = Gate::new();
        assert!(!gate.set("a", false));
        assert!(gate.set("a", true));
        assert!(!gate.set("a", true));
        assert!(gate.is_ready(&"a"));
        assert!(!gate.is_ready(&"b"));
    }

    #[test]
    fn test_callback_may_use_gate() {
        let gate = Arc::new(Gate::new());
        let (count, cb) = counter();
        let inner = Arc::clone(&gate);
        gate.register(
            move || {
                // Runs outside the lock, so re-entering the gate is fine.
                inner.register(cb, ["a"]);
            },
            ["a"],
        );

        gate.set("a", true);

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    proptest! {
        #[test]
        fn prop_fires_at_most_once(ops in proptest::collection::vec((0u8..3, any::<bool>()), 0..40)) {
            let gate = Gate::new();
            let (count, cb) = counter();
            gate.register(cb, [0u8, 1, 2]);

            let mut seen_all_ready = false;
            let mut ready = [false; 3];
            for (kind, value) in ops {
                gate.set(kind, value);
                ready[usize::from(kind)] = value;
                seen_all_ready |= ready.iter().all(|r| *r);
            }

            let fired = count.load(Ordering::SeqCst);
            prop_assert!(fired <= 1);
            prop_assert_eq!(fired == 1, seen_all_ready);
        }
    }
}
