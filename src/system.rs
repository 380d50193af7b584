//! Wires the control loops for a configuration onto a driver.
//!
//! The schema gate loop and secret propagation start immediately. Each
//! configured binding starts its loops once the readiness gate reports its
//! claim, class and managed kinds served.

use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tether_core::{BindingConfig, Config};
use tether_reconciler::{
    ApiBinder, ApiStatusBinder, ClaimKind, ClaimReconciler, ClassKind, ClassSchedulingReconciler,
    ConfigureConnectionSecret, ConfiguratorChain, CustomResourceGateReconciler,
    DefaultClassReconciler, Gate, ManagedKind, SecretPropagatingReconciler, TimeoutReconciler,
};
use tether_resource::secret::propagation_consumers;
use tether_resource::{
    crd_kind, secret_kind, Client, DynamicObject, GroupVersionKind, HasClaimReference,
    InMemoryStore, ManagedResource, ObjectKey, ResourceClaim, ResourceClass, Secret, Store,
    TracingStore,
};
use tracing::{info, warn};

use crate::driver::{Controller, Driver, DriverConfig, Starter};
use crate::provisioner::Provisioner;

/// Claim, class and managed kinds of one binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingKinds {
    pub claim: GroupVersionKind,
    pub class: GroupVersionKind,
    pub managed: GroupVersionKind,
    pub status_subresource: bool,
}

impl TryFrom<&BindingConfig> for BindingKinds {
    type Error = anyhow::Error;

    fn try_from(binding: &BindingConfig) -> Result<Self> {
        let parse = |s: &str| {
            GroupVersionKind::from_str(s).with_context(|| format!("invalid binding kind '{s}'"))
        };
        Ok(Self {
            claim: parse(&binding.claim)?,
            class: parse(&binding.class)?,
            managed: parse(&binding.managed)?,
            status_subresource: binding.status_subresource,
        })
    }
}

/// The in-memory store, the driver over it and the gate its bindings wait on.
pub struct System {
    pub store: Arc<InMemoryStore>,
    pub driver: Driver,
    pub gate: Arc<Gate<GroupVersionKind>>,
    pub bindings: Vec<BindingKinds>,
}

impl System {
    /// Every kind the system knows about, for printing.
    pub fn kinds(&self) -> BTreeSet<GroupVersionKind> {
        let mut kinds: BTreeSet<GroupVersionKind> = [crd_kind(), secret_kind()].into();
        for binding in &self.bindings {
            kinds.extend([
                binding.claim.clone(),
                binding.class.clone(),
                binding.managed.clone(),
            ]);
        }
        kinds
    }
}

/// Managed resource changes wake the claim they reference.
fn claim_of(obj: &DynamicObject) -> Vec<ObjectKey> {
    obj.clone()
        .into_object::<ManagedResource>()
        .ok()
        .and_then(|managed| managed.claim_reference().map(|r| r.key()))
        .into_iter()
        .collect()
}

/// Source secret changes wake every consumer it lists.
fn consumers_of(obj: &DynamicObject) -> Vec<ObjectKey> {
    let Ok(secret) = obj.clone().into_object::<Secret>() else {
        return Vec::new();
    };
    propagation_consumers(&secret)
        .filter_map(|(_, named)| named.split_once('/'))
        .map(|(namespace, name)| ObjectKey::namespaced(namespace, name))
        .collect()
}

fn binding_controllers(
    client: &Client,
    config: &Config,
    kinds: &BindingKinds,
) -> Result<Vec<Controller>> {
    let timeout = config.reconcile.timeout();
    let short_wait = config.reconcile.short_wait();
    let claim_kind = ClaimKind::from(kinds.claim.clone());
    let class_kind = ClassKind::from(kinds.class.clone());
    let managed_kind = ManagedKind::from(kinds.managed.clone());

    let builder = ClaimReconciler::<ResourceClaim, ResourceClass, ManagedResource>::builder(
        client.clone(),
        claim_kind.clone(),
        class_kind.clone(),
        managed_kind.clone(),
    )
    .with_short_wait(short_wait)
    .with_configurator(ConfiguratorChain::standard().with(ConfigureConnectionSecret));
    let builder = if kinds.status_subresource {
        builder.with_binder(ApiStatusBinder::new(client.clone()))
    } else {
        builder.with_binder(ApiBinder::new(client.clone()))
    };
    let binding = builder
        .build()
        .with_context(|| format!("cannot build binding loop for {}", kinds.claim))?;

    let defaulting = DefaultClassReconciler::<ResourceClaim, ResourceClass>::new(
        client.clone(),
        claim_kind.clone(),
        class_kind.clone(),
    )
    .with_max_jitter(config.reconcile.max_jitter())
    .with_short_wait(short_wait);

    let scheduling = ClassSchedulingReconciler::<ResourceClaim, ResourceClass>::new(
        client.clone(),
        claim_kind,
        class_kind,
    )
    .with_max_jitter(config.reconcile.max_jitter())
    .with_long_wait(config.reconcile.long_wait());

    let kind = &kinds.claim.kind;
    Ok(vec![
        Controller::new(
            format!("{kind}-defaulting"),
            kinds.claim.clone(),
            TimeoutReconciler::with_timeout(defaulting, timeout),
        ),
        Controller::new(
            format!("{kind}-scheduling"),
            kinds.claim.clone(),
            TimeoutReconciler::with_timeout(scheduling, timeout),
        ),
        Controller::new(
            format!("{kind}-binding"),
            kinds.claim.clone(),
            TimeoutReconciler::with_timeout(binding, timeout),
        )
        .triggered_by(kinds.managed.clone(), claim_of),
        Controller::new(
            format!("{}-provider", kinds.managed.kind),
            kinds.managed.clone(),
            TimeoutReconciler::with_timeout(
                Provisioner::new(client.clone(), managed_kind),
                timeout,
            ),
        ),
    ])
}

fn register(
    gate: &Gate<GroupVersionKind>,
    starter: Starter,
    kinds: &BindingKinds,
    controllers: Vec<Controller>,
) {
    let claim = kinds.claim.clone();
    gate.register(
        move || {
            info!(claim = %claim, "Binding kinds are ready");
            for controller in controllers {
                starter.start(controller);
            }
        },
        [kinds.claim.clone(), kinds.class.clone(), kinds.managed.clone()],
    );
}

/// Build the store, driver and gate for `config`.
///
/// # Errors
///
/// Returns error if a binding names a malformed kind or its loops cannot be
/// built.
pub fn assemble(config: &Config) -> Result<System> {
    let bindings = config
        .bindings
        .iter()
        .map(BindingKinds::try_from)
        .collect::<Result<Vec<_>>>()?;
    if bindings.is_empty() {
        warn!("No bindings configured; only the gate and secret loops will run");
    }

    let store = bindings
        .iter()
        .filter(|b| b.status_subresource)
        .fold(InMemoryStore::new(), |store, b| {
            store
                .with_status_subresource(b.claim.clone())
                .with_status_subresource(b.managed.clone())
        });
    let store = Arc::new(store);
    let traced: Arc<dyn Store> = Arc::new(TracingStore::new(Arc::clone(&store)));
    let client = Client::new(Arc::clone(&traced));

    let driver = Driver::new(traced, DriverConfig::from(config));
    let gate = Arc::new(Gate::new());
    // Built-in kinds need no schema definition.
    gate.set(secret_kind(), true);

    driver.add(Controller::new(
        "crd-gate",
        crd_kind(),
        TimeoutReconciler::with_timeout(
            CustomResourceGateReconciler::new(client.clone(), Arc::clone(&gate)),
            config.reconcile.timeout(),
        ),
    ));
    if config.propagation.enabled {
        driver.add(
            Controller::new(
                "secret-propagation",
                secret_kind(),
                TimeoutReconciler::with_timeout(
                    SecretPropagatingReconciler::new(client.clone())
                        .with_short_wait(config.reconcile.short_wait()),
                    config.reconcile.timeout(),
                ),
            )
            .triggered_by(secret_kind(), consumers_of),
        );
    }
    for kinds in &bindings {
        let controllers = binding_controllers(&client, config, kinds)?;
        register(&gate, driver.starter(), kinds, controllers);
    }

    Ok(System {
        store,
        driver,
        gate,
        bindings,
    })
}
