//! Drives a [`Gate`] from schema definition objects.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tether_resource::{crd_kind, Client, CustomResourceDefinition, GroupVersionKind, ObjectKey};
use tracing::{debug, info};

use crate::error::{Result, StepExt};
use crate::gate::Gate;
use crate::reconciler::Reconciler;
use crate::types::ReconcileResult;

pub const ERR_GET_CRD: &str = "cannot get custom resource definition";

/// Marks each kind a definition declares ready while the definition is
/// established, served and not being deleted.
pub struct CustomResourceGateReconciler {
    client: Client,
    gate: Arc<Gate<GroupVersionKind>>,
    known: Mutex<HashMap<ObjectKey, Vec<GroupVersionKind>>>,
}

impl CustomResourceGateReconciler {
    pub fn new(client: Client, gate: Arc<Gate<GroupVersionKind>>) -> Self {
        Self {
            client,
            gate,
            known: Mutex::new(HashMap::new()),
        }
    }

    pub fn gate(&self) -> &Arc<Gate<GroupVersionKind>> {
        &self.gate
    }

    /// Swap the kinds recorded for `key`, returning the previous ones.
    fn remember(&self, key: &ObjectKey, kinds: Vec<GroupVersionKind>) -> Vec<GroupVersionKind> {
        let mut known = self.known.lock().unwrap_or_else(PoisonError::into_inner);
        if kinds.is_empty() {
            known.remove(key).unwrap_or_default()
        } else {
            known.insert(key.clone(), kinds).unwrap_or_default()
        }
    }
}

#[async_trait]
impl Reconciler for CustomResourceGateReconciler {
    async fn reconcile(&self, key: &ObjectKey) -> Result<ReconcileResult> {
        let crd: CustomResourceDefinition = match self.client.get(&crd_kind(), key).await {
            Ok(crd) => crd,
            Err(e) if e.is_not_found() => {
                for kind in self.remember(key, Vec::new()) {
                    if self.gate.set(kind.clone(), false) {
                        info!(kind = %kind, "Kind is no longer ready");
                    }
                }
                return Ok(ReconcileResult::done());
            }
            Err(e) => return Err(e).step(ERR_GET_CRD),
        };

        let usable = crd.is_established() && !crd.metadata.was_deleted();
        let kinds = crd.served_kinds();
        let current: Vec<GroupVersionKind> = kinds.iter().map(|(gvk, _)| gvk.clone()).collect();
        let dropped: Vec<GroupVersionKind> = self
            .remember(key, current.clone())
            .into_iter()
            .filter(|gvk| !current.contains(gvk))
            .collect();

        for kind in dropped {
            self.gate.set(kind, false);
        }
        for (kind, served) in kinds {
            let ready = usable && served;
            if self.gate.set(kind.clone(), ready) {
                if ready {
                    info!(kind = %kind, "Kind is ready");
                } else {
                    info!(kind = %kind, "Kind is no longer ready");
                }
            } else {
                debug!(kind = %kind, ready, "Kind readiness unchanged");
            }
        }
        Ok(ReconcileResult::done())
    }
}
