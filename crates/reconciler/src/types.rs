//! Core types for the reconciler.

use std::fmt;
use std::time::Duration;

use tether_resource::GroupVersionKind;

/// What the runtime should do after a reconcile returned without error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileResult {
    /// Reconcile again as soon as possible.
    pub requeue: bool,
    /// Reconcile again after this long.
    pub requeue_after: Option<Duration>,
}

impl ReconcileResult {
    /// Nothing more to do until something changes.
    pub const fn done() -> Self {
        Self {
            requeue: false,
            requeue_after: None,
        }
    }

    pub const fn requeue() -> Self {
        Self {
            requeue: true,
            requeue_after: None,
        }
    }

    pub const fn requeue_after(after: Duration) -> Self {
        Self {
            requeue: false,
            requeue_after: Some(after),
        }
    }

    pub const fn is_done(&self) -> bool {
        !self.requeue && self.requeue_after.is_none()
    }
}

macro_rules! kind_newtype {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub struct $name(pub GroupVersionKind);

        impl $name {
            pub fn gvk(&self) -> &GroupVersionKind {
                &self.0
            }
        }

        impl From<GroupVersionKind> for $name {
            fn from(gvk: GroupVersionKind) -> Self {
                Self(gvk)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

kind_newtype!(
    /// Kind of the claims a loop reconciles.
    ClaimKind
);
kind_newtype!(
    /// Kind of the classes claims select.
    ClassKind
);
kind_newtype!(
    /// Kind of the managed resources claims bind to.
    ManagedKind
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_done_is_done() {
        assert!(ReconcileResult::done().is_done());
        assert!(!ReconcileResult::requeue().is_done());
        assert!(!ReconcileResult::requeue_after(Duration::from_secs(30)).is_done());
    }

    #[test]
    fn test_kind_display() {
        let kind = ClaimKind::from(GroupVersionKind::new("example.org", "v1", "Widget"));
        assert_eq!(kind.to_string(), "example.org/v1/Widget");
    }
}
