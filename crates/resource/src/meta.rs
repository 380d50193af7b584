//! Object identity and metadata shared by every kind.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Annotation holding the name of the resource in the external system.
pub const ANNOTATION_EXTERNAL_NAME: &str = "tether.dev/external-name";

/// `apiVersion` + `kind`, as carried inline by every serialized object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeMeta {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
}

/// Fully qualified kind of an object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupVersionKind {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl GroupVersionKind {
    pub fn new(group: impl Into<String>, version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
        }
    }

    /// `group/version`, or bare `version` for the core group.
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    pub fn type_meta(&self) -> TypeMeta {
        TypeMeta {
            api_version: self.api_version(),
            kind: self.kind.clone(),
        }
    }
}

impl From<&TypeMeta> for GroupVersionKind {
    fn from(types: &TypeMeta) -> Self {
        let (group, version) = match types.api_version.split_once('/') {
            Some((group, version)) => (group.to_string(), version.to_string()),
            None => (String::new(), types.api_version.clone()),
        };
        Self {
            group,
            version,
            kind: types.kind.clone(),
        }
    }
}

impl fmt::Display for GroupVersionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.api_version(), self.kind)
    }
}

impl FromStr for GroupVersionKind {
    type Err = Error;

    /// Parses `group/version/Kind`, or `version/Kind` for the core group.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('/').collect();
        match parts.as_slice() {
            [group, version, kind] if !version.is_empty() && !kind.is_empty() => {
                Ok(Self::new(*group, *version, *kind))
            }
            [version, kind] if !version.is_empty() && !kind.is_empty() => {
                Ok(Self::new("", *version, *kind))
            }
            _ => Err(Error::invalid(format!(
                "'{s}' is not a kind; expected group/version/Kind"
            ))),
        }
    }
}

/// Identity used to address a single object of a known kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{ns}/{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Points at another object, optionally pinned to its uid.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

impl ObjectReference {
    pub fn key(&self) -> ObjectKey {
        ObjectKey {
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }

    /// Whether this reference names the object described by `meta`.
    ///
    /// The uid is only compared when both sides carry one.
    pub fn refers_to(&self, meta: &ObjectMeta) -> bool {
        let uid_matches = match self.uid.as_deref() {
            Some(uid) if !uid.is_empty() && !meta.uid.is_empty() => uid == meta.uid,
            _ => true,
        };
        self.name == meta.name && self.namespace == meta.namespace && uid_matches
    }
}

impl fmt::Display for ObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// Marks the object that owns another; at most one owner is the controller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub uid: String,
    #[serde(default)]
    pub controller: bool,
}

/// A secret in the same namespace as the object referring to it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalSecretReference {
    pub name: String,
}

/// A secret in an explicit namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretReference {
    pub namespace: String,
    pub name: String,
}

impl SecretReference {
    pub fn key(&self) -> ObjectKey {
        ObjectKey::namespaced(self.namespace.clone(), self.name.clone())
    }
}

/// Equality-based label selector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
}

impl LabelSelector {
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.match_labels
            .iter()
            .all(|(k, v)| labels.get(k).is_some_and(|actual| actual == v))
    }
}

/// Standard object metadata.
///
/// `uid`, `resource_version`, `creation_timestamp` and `deletion_timestamp`
/// are owned by the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,
    #[serde(default)]
    pub resource_version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
}

impl ObjectMeta {
    pub fn key(&self) -> ObjectKey {
        ObjectKey {
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }

    /// True once the store has accepted the object.
    pub const fn was_created(&self) -> bool {
        self.creation_timestamp.is_some()
    }

    /// True once deletion has been requested.
    pub const fn was_deleted(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    pub fn controller_of(&self) -> Option<&OwnerReference> {
        self.owner_references.iter().find(|o| o.controller)
    }

    /// Whether both objects are controlled by the same (existing) controller.
    pub fn have_same_controller(&self, other: &Self) -> bool {
        match (self.controller_of(), other.controller_of()) {
            (Some(a), Some(b)) => a.uid == b.uid,
            _ => false,
        }
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers.iter().any(|f| f == finalizer)
    }

    /// Returns true if the finalizer was added.
    pub fn add_finalizer(&mut self, finalizer: &str) -> bool {
        if self.has_finalizer(finalizer) {
            return false;
        }
        self.finalizers.push(finalizer.to_string());
        true
    }

    /// Returns true if the finalizer was removed.
    pub fn remove_finalizer(&mut self, finalizer: &str) -> bool {
        let before = self.finalizers.len();
        self.finalizers.retain(|f| f != finalizer);
        before != self.finalizers.len()
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }

    pub fn set_annotation(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.annotations.insert(key.into(), value.into());
    }

    /// The external name annotation, if set and non-empty.
    pub fn external_name(&self) -> Option<&str> {
        self.annotation(ANNOTATION_EXTERNAL_NAME)
            .filter(|name| !name.is_empty())
    }

    pub fn set_external_name(&mut self, name: impl Into<String>) {
        self.set_annotation(ANNOTATION_EXTERNAL_NAME, name);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_gvk_parse_and_display() {
        let gvk: GroupVersionKind = "database.example.org/v1alpha1/MySQLInstance".parse().unwrap();
        assert_eq!(gvk.group, "database.example.org");
        assert_eq!(gvk.api_version(), "database.example.org/v1alpha1");
        assert_eq!(gvk.to_string(), "database.example.org/v1alpha1/MySQLInstance");
    }

    #[test]
    fn test_gvk_core_group() {
        let gvk: GroupVersionKind = "v1/Secret".parse().unwrap();
        assert!(gvk.group.is_empty());
        assert_eq!(gvk.api_version(), "v1");
        assert_eq!(GroupVersionKind::from(&gvk.type_meta()), gvk);
    }

    #[test]
    fn test_gvk_rejects_bare_kind() {
        assert!("Secret".parse::<GroupVersionKind>().is_err());
        assert!("a/b/c/d".parse::<GroupVersionKind>().is_err());
    }

    #[test]
    fn test_finalizers_are_idempotent() {
        let mut meta = ObjectMeta::default();
        assert!(meta.add_finalizer("finalizer.tether.dev"));
        assert!(!meta.add_finalizer("finalizer.tether.dev"));
        assert_eq!(meta.finalizers.len(), 1);
        assert!(meta.remove_finalizer("finalizer.tether.dev"));
        assert!(!meta.remove_finalizer("finalizer.tether.dev"));
    }

    #[test]
    fn test_reference_uid_only_compared_when_present() {
        let meta = ObjectMeta {
            name: "c1".into(),
            namespace: Some("default".into()),
            uid: "uid-1".into(),
            ..ObjectMeta::default()
        };
        let loose = ObjectReference {
            namespace: Some("default".into()),
            name: "c1".into(),
            ..ObjectReference::default()
        };
        let pinned_other = ObjectReference {
            uid: Some("uid-2".into()),
            ..loose.clone()
        };
        assert!(loose.refers_to(&meta));
        assert!(!pinned_other.refers_to(&meta));
    }

    #[test]
    fn test_empty_external_name_is_unset() {
        let mut meta = ObjectMeta::default();
        meta.set_external_name("");
        assert_eq!(meta.external_name(), None);
        meta.set_external_name("ext-1");
        assert_eq!(meta.external_name(), Some("ext-1"));
    }

    #[test]
    fn test_label_selector() {
        let selector = LabelSelector {
            match_labels: [("tier".to_string(), "fast".to_string())].into_iter().collect(),
        };
        let mut labels = BTreeMap::new();
        assert!(!selector.matches(&labels));
        labels.insert("tier".to_string(), "fast".to_string());
        labels.insert("zone".to_string(), "a".to_string());
        assert!(selector.matches(&labels));
    }
}
