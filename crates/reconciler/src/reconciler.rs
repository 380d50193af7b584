//! The reconciler contract and the per-invocation deadline wrapper.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tether_resource::ObjectKey;
use tracing::warn;

use crate::error::{Error, Result};
use crate::types::ReconcileResult;

/// Default per-invocation deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// A level-triggered control loop, invoked once per object key.
///
/// An `Err` asks the runtime to retry with its own backoff; an `Ok` result
/// says whether and when to reconcile the key again.
#[async_trait]
pub trait Reconciler: Send + Sync {
    async fn reconcile(&self, key: &ObjectKey) -> Result<ReconcileResult>;
}

#[async_trait]
impl<R: Reconciler + ?Sized> Reconciler for Arc<R> {
    async fn reconcile(&self, key: &ObjectKey) -> Result<ReconcileResult> {
        (**self).reconcile(key).await
    }
}

#[async_trait]
impl<R: Reconciler + ?Sized> Reconciler for Box<R> {
    async fn reconcile(&self, key: &ObjectKey) -> Result<ReconcileResult> {
        (**self).reconcile(key).await
    }
}

/// Aborts an invocation that runs past its deadline.
///
/// Dropping the inner future cancels any in-flight store calls; the key will
/// be reconciled again by the runtime.
pub struct TimeoutReconciler<R> {
    inner: R,
    timeout: Duration,
}

impl<R: Reconciler> TimeoutReconciler<R> {
    pub fn new(inner: R) -> Self {
        Self::with_timeout(inner, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(inner: R, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }
}

#[async_trait]
impl<R: Reconciler> Reconciler for TimeoutReconciler<R> {
    async fn reconcile(&self, key: &ObjectKey) -> Result<ReconcileResult> {
        match tokio::time::timeout(self.timeout, self.inner.reconcile(key)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(key = %key, timeout = ?self.timeout, "Reconcile timed out");
                Err(Error::Timeout {
                    after: self.timeout,
                })
            }
        }
    }
}
