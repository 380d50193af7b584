//! Schema definition objects that drive the readiness gate.

use serde::{Deserialize, Serialize};

use crate::condition::ConditionStatus;
use crate::meta::{GroupVersionKind, ObjectMeta, TypeMeta};
use crate::object::Object;

pub fn crd_kind() -> GroupVersionKind {
    GroupVersionKind::new("apiextensions.k8s.io", "v1", "CustomResourceDefinition")
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrdNames {
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub plural: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrdVersion {
    pub name: String,
    #[serde(default)]
    pub served: bool,
    #[serde(default)]
    pub storage: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrdSpec {
    pub group: String,
    pub names: CrdNames,
    #[serde(default)]
    pub versions: Vec<CrdVersion>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrdCondition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: ConditionStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrdStatus {
    #[serde(default)]
    pub conditions: Vec<CrdCondition>,
}

/// Declares a kind and the versions under which it is served.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomResourceDefinition {
    #[serde(flatten)]
    pub types: TypeMeta,
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub spec: CrdSpec,
    #[serde(default)]
    pub status: CrdStatus,
}

impl Object for CustomResourceDefinition {
    fn type_meta(&self) -> &TypeMeta {
        &self.types
    }

    fn type_meta_mut(&mut self) -> &mut TypeMeta {
        &mut self.types
    }

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl CustomResourceDefinition {
    /// Whether the API server has accepted and established the schema.
    pub fn is_established(&self) -> bool {
        self.status
            .conditions
            .iter()
            .any(|c| c.condition_type == "Established" && c.status == ConditionStatus::True)
    }

    /// Every kind this definition declares, paired with whether that version is served.
    pub fn served_kinds(&self) -> Vec<(GroupVersionKind, bool)> {
        self.spec
            .versions
            .iter()
            .map(|v| {
                (
                    GroupVersionKind::new(&self.spec.group, &v.name, &self.spec.names.kind),
                    v.served,
                )
            })
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_established_and_served_kinds() {
        let crd: CustomResourceDefinition = serde_json::from_value(serde_json::json!({
            "apiVersion": "apiextensions.k8s.io/v1",
            "kind": "CustomResourceDefinition",
            "metadata": {"name": "mysqlinstances.database.example.org"},
            "spec": {
                "group": "database.example.org",
                "names": {"kind": "MySQLInstance"},
                "versions": [{"name": "v1alpha1", "served": true}, {"name": "v1beta1"}]
            },
            "status": {"conditions": [{"type": "Established", "status": "True"}]}
        }))
        .unwrap();

        assert!(crd.is_established());
        let kinds = crd.served_kinds();
        assert_eq!(kinds.len(), 2);
        assert_eq!(kinds[0].0.to_string(), "database.example.org/v1alpha1/MySQLInstance");
        assert!(kinds[0].1);
        assert!(!kinds[1].1);
    }
}
