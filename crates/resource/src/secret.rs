//! Connection secrets and the propagation annotation scheme.
//!
//! A *propagated* (target) secret records where it copies from with three
//! fixed annotations. A *propagating* (source) secret lists each consumer
//! under `to.propagate.tether.dev/<consumer uid>` with the value
//! `namespace/name`. Data flows only when both sides agree.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::meta::{GroupVersionKind, ObjectMeta, TypeMeta};
use crate::object::Object;

pub const ANNOTATION_PROPAGATE_FROM_NAMESPACE: &str = "from.propagate.tether.dev/namespace";
pub const ANNOTATION_PROPAGATE_FROM_NAME: &str = "from.propagate.tether.dev/name";
pub const ANNOTATION_PROPAGATE_FROM_UID: &str = "from.propagate.tether.dev/uid";
pub const ANNOTATION_PROPAGATE_TO_PREFIX: &str = "to.propagate.tether.dev";
pub const ANNOTATION_DELIMITER: &str = "/";

/// Connection details, keyed by name.
pub type ConnectionDetails = BTreeMap<String, Vec<u8>>;

pub fn secret_kind() -> GroupVersionKind {
    GroupVersionKind::new("", "v1", "Secret")
}

/// Opaque key to bytes map. Values are base64 encoded when serialized.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
    #[serde(flatten)]
    pub types: TypeMeta,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(
        default,
        serialize_with = "serialize_data",
        deserialize_with = "deserialize_data",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub data: ConnectionDetails,
}

impl Object for Secret {
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

impl Secret {
    /// An empty secret with the given identity.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        let mut secret = Self::of_kind(&secret_kind());
        secret.metadata.namespace = Some(namespace.into());
        secret.metadata.name = name.into();
        secret
    }

    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

fn serialize_data<S: Serializer>(data: &ConnectionDetails, serializer: S) -> Result<S::Ok, S::Error> {
    let encoded: BTreeMap<&String, String> =
        data.iter().map(|(k, v)| (k, STANDARD.encode(v))).collect();
    encoded.serialize(serializer)
}

fn deserialize_data<'de, D: Deserializer<'de>>(deserializer: D) -> Result<ConnectionDetails, D::Error> {
    let encoded = BTreeMap::<String, String>::deserialize(deserializer)?;
    encoded
        .into_iter()
        .map(|(k, v)| {
            STANDARD
                .decode(v.as_bytes())
                .map(|bytes| (k, bytes))
                .map_err(serde::de::Error::custom)
        })
        .collect()
}

/// Annotation key under which a source lists the consumer with `uid`.
pub fn propagate_to_key(uid: &str) -> String {
    format!("{ANNOTATION_PROPAGATE_TO_PREFIX}{ANNOTATION_DELIMITER}{uid}")
}

/// Record mutual consent for `from` to propagate its data to `to`.
///
/// Both secrets must already have been created so that their uids are known.
pub fn allow_propagation(from: &mut Secret, to: &mut Secret) {
    let to_meta = &to.metadata;
    let value = format!(
        "{}{ANNOTATION_DELIMITER}{}",
        to_meta.namespace.as_deref().unwrap_or_default(),
        to_meta.name
    );
    from.metadata
        .set_annotation(propagate_to_key(&to_meta.uid), value);

    let from_meta = &from.metadata;
    let namespace = from_meta.namespace.clone().unwrap_or_default();
    let name = from_meta.name.clone();
    let uid = from_meta.uid.clone();
    to.metadata
        .set_annotation(ANNOTATION_PROPAGATE_FROM_NAMESPACE, namespace);
    to.metadata.set_annotation(ANNOTATION_PROPAGATE_FROM_NAME, name);
    to.metadata.set_annotation(ANNOTATION_PROPAGATE_FROM_UID, uid);
}

/// Consumers listed by a propagating secret, as `(uid, "namespace/name")`.
pub fn propagation_consumers(from: &Secret) -> impl Iterator<Item = (&str, &str)> {
    let prefix = format!("{ANNOTATION_PROPAGATE_TO_PREFIX}{ANNOTATION_DELIMITER}");
    from.metadata.annotations.iter().filter_map(move |(k, v)| {
        k.strip_prefix(prefix.as_str())
            .map(|uid| (uid, v.as_str()))
    })
}
