//! Cross-resource reference and selector resolution.
//!
//! A field that names another object, either directly by [`Reference`] or by
//! label [`Selector`], is resolved into a value extracted from the target.
//! Once resolved the value is kept: the target is not read again unless the
//! reference or selector asks for [`ResolvePolicy::Always`].
//!
//! [`ResolvePolicy::Always`]: tether_resource::ResolvePolicy::Always

use itertools::Itertools;
use tether_resource::{
    Client, GroupVersionKind, ListOptions, Object, ObjectKey, ObjectMeta, Policy, Reference,
    Selector,
};
use tracing::debug;

use crate::error::{Error, Result};

pub const ERR_GET_REFERENCED: &str = "cannot get referenced resource";
pub const ERR_LIST_CANDIDATES: &str = "cannot list resources that match selector";

/// Turns a resolved target into the value written to the referencing field.
pub type Extract<'a, T> = &'a (dyn Fn(&T) -> String + Send + Sync);

/// The external name annotation of the target, or empty.
pub fn extract_external_name<T: Object>(obj: &T) -> String {
    obj.meta().external_name().unwrap_or_default().to_string()
}

pub fn extract_name<T: Object>(obj: &T) -> String {
    obj.meta().name.clone()
}

pub fn extract_uid<T: Object>(obj: &T) -> String {
    obj.meta().uid.clone()
}

/// A single value to resolve.
pub struct ResolutionRequest<'a, T> {
    pub current_value: String,
    pub reference: Option<Reference>,
    pub selector: Option<Selector>,
    pub to: &'a GroupVersionKind,
    pub extract: Extract<'a, T>,
}

impl<T> ResolutionRequest<'_, T> {
    /// Whether resolution can return the current value without reading
    /// anything. A selector with `Always` drops the reference so it is
    /// selected afresh.
    fn is_no_op(&mut self) -> bool {
        let selector_always = self
            .selector
            .as_ref()
            .map(|s| Policy::is_always(s.policy.as_ref()));
        let always = match selector_always {
            Some(true) => {
                self.reference = None;
                true
            }
            Some(false) => false,
            None => self
                .reference
                .as_ref()
                .is_some_and(|r| Policy::is_always(r.policy.as_ref())),
        };
        if !self.current_value.is_empty() && !always {
            return true;
        }
        self.reference.is_none() && self.selector.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionResponse {
    pub resolved_value: String,
    pub resolved_reference: Option<Reference>,
}

/// Several values to resolve, for list-valued fields.
pub struct MultiResolutionRequest<'a, T> {
    pub current_values: Vec<String>,
    pub references: Vec<Reference>,
    pub selector: Option<Selector>,
    pub to: &'a GroupVersionKind,
    pub extract: Extract<'a, T>,
}

impl<T> MultiResolutionRequest<'_, T> {
    fn is_no_op(&mut self) -> bool {
        let always = match &self.selector {
            Some(selector) if Policy::is_always(selector.policy.as_ref()) => {
                self.references.clear();
                true
            }
            Some(_) => false,
            None => self
                .references
                .iter()
                .any(|r| Policy::is_always(r.policy.as_ref())),
        };
        if !self.current_values.is_empty() && !always {
            return true;
        }
        self.references.is_empty() && self.selector.is_none()
    }
}

/// Values are sorted, references follow their values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultiResolutionResponse {
    pub resolved_values: Vec<String>,
    pub resolved_references: Vec<Reference>,
}

/// Resolves references held by one object.
pub struct ApiResolver {
    client: Client,
    from: ObjectMeta,
}

/// Swallow `err` when the policy says the reference is optional.
fn resolution_error<R: Default>(policy: Option<&Policy>, err: Error) -> Result<R> {
    if Policy::is_optional(policy) {
        debug!(error = %err, "Ignoring failed optional reference");
        return Ok(R::default());
    }
    Err(err)
}

impl ApiResolver {
    pub fn new<F: Object>(client: Client, from: &F) -> Self {
        Self {
            client,
            from: from.meta().clone(),
        }
    }

    fn reference_key(&self, reference: &Reference) -> ObjectKey {
        ObjectKey {
            namespace: reference
                .namespace
                .clone()
                .or_else(|| self.from.namespace.clone()),
            name: reference.name.clone(),
        }
    }

    /// Candidates for `selector`, in listing order.
    async fn select<T: Object>(
        &self,
        to: &GroupVersionKind,
        selector: &Selector,
    ) -> Result<Vec<T>> {
        let options = ListOptions {
            namespace: selector.namespace.clone(),
            labels: selector.match_labels.clone(),
        };
        let candidates = self
            .client
            .list::<T>(to, &options)
            .await
            .map_err(|e| Error::step(ERR_LIST_CANDIDATES, e))?;
        Ok(candidates
            .into_iter()
            .filter(|c| !c.meta().was_deleted())
            .filter(|c| !selector.match_controller_ref || self.from.have_same_controller(c.meta()))
            .collect())
    }

    pub async fn resolve<T: Object>(
        &self,
        mut req: ResolutionRequest<'_, T>,
    ) -> Result<ResolutionResponse> {
        if self.from.was_deleted() || req.is_no_op() {
            return Ok(ResolutionResponse {
                resolved_value: req.current_value,
                resolved_reference: req.reference,
            });
        }

        if let Some(reference) = req.reference {
            let policy = reference.policy;
            let target = match self
                .client
                .get::<T>(req.to, &self.reference_key(&reference))
                .await
            {
                Ok(target) => target,
                Err(e) => return resolution_error(policy.as_ref(), Error::step(ERR_GET_REFERENCED, e)),
            };
            let value = (req.extract)(&target);
            if value.is_empty() {
                return resolution_error(policy.as_ref(), Error::EmptyValue);
            }
            return Ok(ResolutionResponse {
                resolved_value: value,
                resolved_reference: Some(reference),
            });
        }

        let Some(selector) = req.selector else {
            return Ok(ResolutionResponse::default());
        };
        let policy = selector.policy;
        let candidates = match self.select::<T>(req.to, &selector).await {
            Ok(candidates) => candidates,
            Err(e) => return resolution_error(policy.as_ref(), e),
        };
        let Some(target) = candidates.first() else {
            return resolution_error(policy.as_ref(), Error::NoMatches);
        };
        let value = (req.extract)(target);
        if value.is_empty() {
            return resolution_error(policy.as_ref(), Error::EmptyValue);
        }
        Ok(ResolutionResponse {
            resolved_value: value,
            resolved_reference: Some(Reference {
                name: target.meta().name.clone(),
                namespace: target.meta().namespace.clone(),
                policy: None,
            }),
        })
    }

    pub async fn resolve_multiple<T: Object>(
        &self,
        mut req: MultiResolutionRequest<'_, T>,
    ) -> Result<MultiResolutionResponse> {
        if self.from.was_deleted() || req.is_no_op() {
            return Ok(MultiResolutionResponse {
                resolved_values: req.current_values,
                resolved_references: req.references,
            });
        }

        let mut resolved: Vec<(String, Reference)> = Vec::new();

        if req.selector.is_none() || !req.references.is_empty() {
            for reference in req.references {
                let policy = reference.policy;
                let target = match self
                    .client
                    .get::<T>(req.to, &self.reference_key(&reference))
                    .await
                {
                    Ok(target) => target,
                    Err(e) => {
                        resolution_error::<()>(policy.as_ref(), Error::step(ERR_GET_REFERENCED, e))?;
                        continue;
                    }
                };
                let value = (req.extract)(&target);
                if value.is_empty() {
                    resolution_error::<()>(policy.as_ref(), Error::EmptyValue)?;
                    continue;
                }
                resolved.push((value, reference));
            }
        } else if let Some(selector) = req.selector {
            let policy = selector.policy;
            let candidates = match self.select::<T>(req.to, &selector).await {
                Ok(candidates) => candidates,
                Err(e) => return resolution_error(policy.as_ref(), e),
            };
            if candidates.is_empty() {
                return resolution_error(policy.as_ref(), Error::NoMatches);
            }
            for target in &candidates {
                let value = (req.extract)(target);
                if value.is_empty() {
                    return resolution_error(policy.as_ref(), Error::EmptyValue);
                }
                resolved.push((
                    value,
                    Reference {
                        name: target.meta().name.clone(),
                        namespace: target.meta().namespace.clone(),
                        policy: None,
                    },
                ));
            }
        }

        let (resolved_values, resolved_references) = resolved
            .into_iter()
            .sorted_by(|a, b| a.0.cmp(&b.0))
            .unzip();
        Ok(MultiResolutionResponse {
            resolved_values,
            resolved_references,
        })
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use proptest::prelude::*;
    use tether_resource::{
        as_controller, InMemoryStore, ManagedResource, ResolutionPolicy, ResolvePolicy,
    };

    use super::*;

    fn network() -> GroupVersionKind {
        GroupVersionKind::new("compute.example.org", "v1", "Network")
    }

    fn subnet() -> GroupVersionKind {
        GroupVersionKind::new("compute.example.org", "v1", "Subnetwork")
    }

    fn optional() -> Policy {
        Policy {
            resolution: ResolutionPolicy::Optional,
            resolve: ResolvePolicy::OnceOnly,
        }
    }

    fn always() -> Policy {
        Policy {
            resolution: ResolutionPolicy::Required,
            resolve: ResolvePolicy::Always,
        }
    }

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    async fn create_network(
        client: &Client,
        name: &str,
        external: Option<&str>,
        network_labels: &[(&str, &str)],
    ) -> ManagedResource {
        let mut net = ManagedResource::of_kind(&network());
        net.metadata.name = name.to_string();
        net.metadata.namespace = Some("infra".to_string());
        net.metadata.labels = labels(network_labels);
        if let Some(external) = external {
            net.metadata.set_external_name(external);
        }
        client.create(&mut net).await.unwrap();
        net
    }

    fn from_object() -> ManagedResource {
        let mut from = ManagedResource::of_kind(&subnet());
        from.metadata.name = "subnet-a".to_string();
        from.metadata.namespace = Some("infra".to_string());
        from
    }

    fn request<'a>(
        current: &str,
        reference: Option<Reference>,
        selector: Option<Selector>,
        to: &'a GroupVersionKind,
    ) -> ResolutionRequest<'a, ManagedResource> {
        ResolutionRequest {
            current_value: current.to_string(),
            reference,
            selector,
            to,
            extract: &extract_external_name::<ManagedResource>,
        }
    }

    fn selector(pairs: &[(&str, &str)]) -> Selector {
        Selector {
            match_labels: labels(pairs),
            ..Selector::default()
        }
    }

    #[tokio::test]
    async fn test_reference_resolves_in_owner_namespace() {
        let client = Client::new(InMemoryStore::new_arc());
        create_network(&client, "net", Some("vpc-123"), &[]).await;
        let resolver = ApiResolver::new(client, &from_object());
        let to = network();

        let rsp = resolver
            .resolve(request("", Some(Reference::new("net")), None, &to))
            .await
            .unwrap();

        assert_eq!(rsp.resolved_value, "vpc-123");
        assert_eq!(rsp.resolved_reference, Some(Reference::new("net")));
    }

    #[tokio::test]
    async fn test_current_value_is_kept_without_reads() {
        let store = InMemoryStore::new_arc();
        let client = Client::new(store.clone());
        create_network(&client, "net", Some("vpc-new"), &[("tier", "a")]).await;
        let resolver = ApiResolver::new(client, &from_object());
        let to = network();
        let reads = store.stats().reads;

        let by_ref = resolver
            .resolve(request("vpc-old", Some(Reference::new("net")), None, &to))
            .await
            .unwrap();
        let by_selector = resolver
            .resolve(request("vpc-old", None, Some(selector(&[("tier", "a")])), &to))
            .await
            .unwrap();

        assert_eq!(by_ref.resolved_value, "vpc-old");
        assert_eq!(by_selector.resolved_value, "vpc-old");
        assert_eq!(store.stats().reads, reads);
    }

    #[tokio::test]
    async fn test_always_policy_re_resolves() {
        let client = Client::new(InMemoryStore::new_arc());
        create_network(&client, "net", Some("vpc-new"), &[]).await;
        let resolver = ApiResolver::new(client, &from_object());
        let to = network();

        let rsp = resolver
            .resolve(request(
                "vpc-old",
                Some(Reference::new("net").with_policy(always())),
                None,
                &to,
            ))
            .await
            .unwrap();

        assert_eq!(rsp.resolved_value, "vpc-new");
    }

    #[tokio::test]
    async fn test_deleted_owner_is_a_no_op() {
        let store = InMemoryStore::new_arc();
        let client = Client::new(store.clone());
        let mut from = from_object();
        from.metadata.deletion_timestamp = Some(chrono::Utc::now());
        let resolver = ApiResolver::new(client, &from);
        let to = network();

        let rsp = resolver
            .resolve(request("", Some(Reference::new("net")), None, &to))
            .await
            .unwrap();

        assert_eq!(rsp.resolved_value, "");
        assert_eq!(store.stats().reads, 0);
    }

    #[tokio::test]
    async fn test_missing_reference_required_vs_optional() {
        let client = Client::new(InMemoryStore::new_arc());
        let resolver = ApiResolver::new(client, &from_object());
        let to = network();

        let err = resolver
            .resolve(request("", Some(Reference::new("missing")), None, &to))
            .await
            .unwrap_err();
        assert_eq!(err.step_message(), Some(ERR_GET_REFERENCED));
        assert!(err.is_not_found());

        let rsp = resolver
            .resolve(request(
                "",
                Some(Reference::new("missing").with_policy(optional())),
                None,
                &to,
            ))
            .await
            .unwrap();
        assert_eq!(rsp, ResolutionResponse::default());
    }

    #[tokio::test]
    async fn test_empty_extracted_value_is_not_ready() {
        let client = Client::new(InMemoryStore::new_arc());
        create_network(&client, "net", None, &[]).await;
        let resolver = ApiResolver::new(client, &from_object());
        let to = network();

        let err = resolver
            .resolve(request("", Some(Reference::new("net")), None, &to))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::EmptyValue));
    }

    #[tokio::test]
    async fn test_selector_skips_deleted_and_foreign_controllers() {
        let store = Arc::new(InMemoryStore::new());
        let client = Client::new(store.clone());
        let owner = create_network(&client, "owner", Some("o"), &[]).await;
        let other = create_network(&client, "other", Some("x"), &[]).await;

        let mut deleted = create_network(&client, "a-deleted", Some("vpc-deleted"), &[("tier", "a")]).await;
        deleted.metadata.owner_references.push(as_controller(&owner));
        deleted.metadata.add_finalizer("test.tether.dev/hold");
        client.update(&mut deleted).await.unwrap();
        client.delete(&deleted).await.unwrap();

        let mut foreign = create_network(&client, "a-foreign", Some("vpc-foreign"), &[("tier", "a")]).await;
        foreign.metadata.owner_references.push(as_controller(&other));
        client.update(&mut foreign).await.unwrap();

        let mut mine = create_network(&client, "b-mine", Some("vpc-mine"), &[("tier", "a")]).await;
        mine.metadata.owner_references.push(as_controller(&owner));
        client.update(&mut mine).await.unwrap();

        let mut from = from_object();
        from.metadata.owner_references.push(as_controller(&owner));
        let resolver = ApiResolver::new(client, &from);
        let to = network();

        let mut sel = selector(&[("tier", "a")]);
        sel.match_controller_ref = true;
        let rsp = resolver.resolve(request("", None, Some(sel), &to)).await.unwrap();

        assert_eq!(rsp.resolved_value, "vpc-mine");
        assert_eq!(
            rsp.resolved_reference.map(|r| r.name),
            Some("b-mine".to_string())
        );
    }

    #[tokio::test]
    async fn test_selector_without_matches() {
        let client = Client::new(InMemoryStore::new_arc());
        let resolver = ApiResolver::new(client, &from_object());
        let to = network();

        let err = resolver
            .resolve(request("", None, Some(selector(&[("tier", "z")])), &to))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoMatches));

        let mut sel = selector(&[("tier", "z")]);
        sel.policy = Some(optional());
        let rsp = resolver.resolve(request("", None, Some(sel), &to)).await.unwrap();
        assert_eq!(rsp.resolved_value, "");
    }

    #[tokio::test]
    async fn test_selector_always_replaces_reference() {
        let client = Client::new(InMemoryStore::new_arc());
        create_network(&client, "old", Some("vpc-old"), &[]).await;
        create_network(&client, "new", Some("vpc-new"), &[("tier", "a")]).await;
        let resolver = ApiResolver::new(client, &from_object());
        let to = network();

        let mut sel = selector(&[("tier", "a")]);
        sel.policy = Some(always());
        let rsp = resolver
            .resolve(request("vpc-old", Some(Reference::new("old")), Some(sel), &to))
            .await
            .unwrap();

        assert_eq!(rsp.resolved_value, "vpc-new");
        assert_eq!(rsp.resolved_reference.map(|r| r.name), Some("new".to_string()));
    }

    #[tokio::test]
    async fn test_multiple_references_skip_optional_failures() {
        let client = Client::new(InMemoryStore::new_arc());
        create_network(&client, "net-b", Some("vpc-b"), &[]).await;
        create_network(&client, "net-a", Some("vpc-a"), &[]).await;
        let resolver = ApiResolver::new(client, &from_object());
        let to = network();

        let rsp = resolver
            .resolve_multiple(MultiResolutionRequest {
                current_values: Vec::new(),
                references: vec![
                    Reference::new("net-b"),
                    Reference::new("gone").with_policy(optional()),
                    Reference::new("net-a"),
                ],
                selector: None,
                to: &to,
                extract: &extract_external_name::<ManagedResource>,
            })
            .await
            .unwrap();

        assert_eq!(rsp.resolved_values, vec!["vpc-a", "vpc-b"]);
        assert_eq!(
            rsp.resolved_references,
            vec![Reference::new("net-a"), Reference::new("net-b")]
        );
    }

    proptest! {
        #[test]
        fn prop_multi_resolution_is_sorted(names in proptest::collection::btree_set("[a-z]{1,8}", 1..6)) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let values = rt.block_on(async {
                let client = Client::new(InMemoryStore::new_arc());
                // Created in reverse so listing order and value order differ.
                for (i, name) in names.iter().rev().enumerate() {
                    let mut net = ManagedResource::of_kind(&network());
                    net.metadata.name = format!("net-{i}");
                    net.metadata.namespace = Some("infra".to_string());
                    net.metadata.labels = labels(&[("tier", "a")]);
                    net.metadata.set_external_name(name.clone());
                    client.create(&mut net).await.unwrap();
                }
                let resolver = ApiResolver::new(client, &from_object());
                let to = network();
                resolver
                    .resolve_multiple(MultiResolutionRequest {
                        current_values: Vec::new(),
                        references: Vec::new(),
                        selector: Some(selector(&[("tier", "a")])),
                        to: &to,
                        extract: &extract_external_name::<ManagedResource>,
                    })
                    .await
                    .unwrap()
                    .resolved_values
            });

            let expected: Vec<String> = names.into_iter().collect();
            prop_assert_eq!(values, expected);
        }

        #[test]
        fn prop_cached_value_never_reads(
            current in "[a-z]{1,8}",
            use_reference in any::<bool>(),
            use_selector in any::<bool>(),
        ) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let reads = rt.block_on(async {
                let store = InMemoryStore::new_arc();
                let client = Client::new(store.clone());
                let resolver = ApiResolver::new(client, &from_object());
                let to = network();
                let rsp = resolver
                    .resolve(request(
                        &current,
                        use_reference.then(|| Reference::new("net")),
                        use_selector.then(|| selector(&[("tier", "a")])),
                        &to,
                    ))
                    .await
                    .unwrap();
                assert_eq!(rsp.resolved_value, current);
                store.stats().reads
            });
            prop_assert_eq!(reads, 0);
        }
    }
}
