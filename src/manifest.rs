//! Multi-document YAML manifests: loading objects into a store and printing
//! them back out.

use std::path::Path;

use anyhow::Context;
use serde::Deserialize;
use serde_json::{Map, Value};
use tether_core::{Error, Result};
use tether_resource::{DynamicObject, GroupVersionKind, ListOptions, ObjectMeta, Store, TypeMeta};
use tracing::debug;

/// Read and parse a manifest file.
///
/// # Errors
///
/// Returns error if the file cannot be read or a document is not an object.
pub fn read_manifest(path: &Path) -> Result<Vec<DynamicObject>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| Error::file_read_failed(path, e.to_string()))?;
    parse_manifest(&text)
}

/// Parse every non-empty document of a YAML stream.
///
/// # Errors
///
/// Returns error if a document is malformed, is not a mapping, or lacks
/// `apiVersion`, `kind` or `metadata.name`.
pub fn parse_manifest(text: &str) -> Result<Vec<DynamicObject>> {
    serde_yaml::Deserializer::from_str(text)
        .enumerate()
        .filter_map(|(index, document)| match Value::deserialize(document) {
            Ok(Value::Null) => None,
            Ok(value) => Some(to_dynamic(index + 1, value)),
            Err(e) => Some(Err(Error::yaml_parse_failed(format!(
                "document {}: {e}",
                index + 1
            )))),
        })
        .collect()
}

fn take_string(body: &mut Map<String, Value>, field: &str) -> String {
    match body.remove(field) {
        Some(Value::String(s)) => s,
        _ => String::new(),
    }
}

fn to_dynamic(document: usize, value: Value) -> Result<DynamicObject> {
    let invalid = |reason: &str| Error::yaml_parse_failed(format!("document {document}: {reason}"));

    let Value::Object(mut body) = value else {
        return Err(invalid("expected a mapping"));
    };
    let types = TypeMeta {
        api_version: take_string(&mut body, "apiVersion"),
        kind: take_string(&mut body, "kind"),
    };
    if types.api_version.is_empty() || types.kind.is_empty() {
        return Err(invalid("apiVersion and kind are required"));
    }
    let metadata: ObjectMeta = match body.remove("metadata") {
        Some(meta) => serde_json::from_value(meta).map_err(|e| invalid(&e.to_string()))?,
        None => ObjectMeta::default(),
    };
    if metadata.name.is_empty() {
        return Err(invalid("metadata.name is required"));
    }

    Ok(DynamicObject {
        gvk: GroupVersionKind::from(&types),
        metadata,
        body,
    })
}

/// Create every object in `store`, in manifest order.
///
/// # Errors
///
/// Returns error on the first object the store rejects.
pub async fn apply(store: &dyn Store, objects: Vec<DynamicObject>) -> anyhow::Result<usize> {
    let count = objects.len();
    for obj in objects {
        let what = format!("{} {}", obj.gvk, obj.key());
        store
            .create(obj)
            .await
            .with_context(|| format!("cannot create {what}"))?;
        debug!(object = %what, "Loaded manifest object");
    }
    Ok(count)
}

/// Every object of the given kinds, as one YAML stream.
///
/// # Errors
///
/// Returns error if a kind cannot be listed or an object cannot be
/// serialized.
pub async fn render<'a, I>(store: &dyn Store, kinds: I) -> anyhow::Result<String>
where
    I: IntoIterator<Item = &'a GroupVersionKind>,
{
    let mut out = String::new();
    for gvk in kinds {
        let objects = store
            .list(gvk, &ListOptions::default())
            .await
            .with_context(|| format!("cannot list {gvk}"))?;
        for obj in objects {
            let TypeMeta { api_version, kind } = obj.gvk.type_meta();
            let mut doc = Map::new();
            doc.insert("apiVersion".into(), Value::String(api_version));
            doc.insert("kind".into(), Value::String(kind));
            doc.insert("metadata".into(), serde_json::to_value(&obj.metadata)?);
            doc.extend(obj.body);
            out.push_str("---\n");
            out.push_str(&serde_yaml::to_string(&Value::Object(doc))?);
        }
    }
    Ok(out)
}
