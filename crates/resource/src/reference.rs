//! Cross-resource references and selectors.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Whether failing to resolve is fatal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionPolicy {
    #[default]
    Required,
    Optional,
}

/// Whether an already resolved value is resolved again on every reconcile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolvePolicy {
    #[default]
    OnceOnly,
    Always,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default)]
    pub resolution: ResolutionPolicy,
    #[serde(default)]
    pub resolve: ResolvePolicy,
}

impl Policy {
    pub fn is_optional(policy: Option<&Self>) -> bool {
        policy.is_some_and(|p| p.resolution == ResolutionPolicy::Optional)
    }

    pub fn is_always(policy: Option<&Self>) -> bool {
        policy.is_some_and(|p| p.resolve == ResolvePolicy::Always)
    }
}

/// Names a target by identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub name: String,
    /// Defaults to the namespace of the object holding the reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<Policy>,
}

impl Reference {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
            policy: None,
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policy = Some(policy);
        self
    }
}

/// Names targets by label match, optionally requiring a shared controller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selector {
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub match_controller_ref: bool,
    /// Restricts candidates to one namespace; unset lists every namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<Policy>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_defaults() {
        assert!(!Policy::is_optional(None));
        assert!(!Policy::is_always(None));
        let p = Policy {
            resolution: ResolutionPolicy::Optional,
            resolve: ResolvePolicy::Always,
        };
        assert!(Policy::is_optional(Some(&p)));
        assert!(Policy::is_always(Some(&p)));
    }
}
