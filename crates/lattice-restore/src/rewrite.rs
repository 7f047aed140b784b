//! Target identities for selected items
//!
//! Namespaced items move to `namespaceMapping[source]` (or stay put). A
//! `Namespace` object is renamed the same way since its name is the namespace.
//! Every other cluster-scoped item keeps its identity.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ObjectReference;
use lattice_common::kube_utils::strip_transient_fields;
use lattice_common::{RESTORE_NAME_LABEL, SOURCE_NAMESPACE_ANNOTATION};
use serde_json::{Map, Value};

use crate::catalog::BackupItem;

/// Source namespace to target namespace
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NamespaceMapping(BTreeMap<String, String>);

impl NamespaceMapping {
    /// Wrap a mapping
    pub fn new(mapping: BTreeMap<String, String>) -> Self {
        Self(mapping)
    }

    /// Target for a source namespace; unmapped namespaces keep their name
    pub fn target<'a>(&'a self, source: &'a str) -> &'a str {
        self.0.get(source).map_or(source, String::as_str)
    }

    /// Whether no namespace is remapped
    pub fn is_identity(&self) -> bool {
        self.0.iter().all(|(k, v)| k == v)
    }
}

/// A selected backup item with its identity in the target cluster
#[derive(Clone, Debug, PartialEq)]
pub struct RestoreItem {
    /// The item as captured
    pub source: BackupItem,
    /// Namespace to create the object in; None for cluster-scoped objects
    pub target_namespace: Option<String>,
    /// Name to create the object with
    pub target_name: String,
}

impl RestoreItem {
    /// Apply the mapping to one item
    pub fn rewrite(item: &BackupItem, mapping: &NamespaceMapping) -> Self {
        let target_name = if item.is_namespace() {
            mapping.target(&item.name).to_string()
        } else {
            item.name.clone()
        };

        Self {
            source: item.clone(),
            target_namespace: item
                .namespace
                .as_deref()
                .map(|ns| mapping.target(ns).to_string()),
            target_name,
        }
    }

    /// Group-qualified plural resource
    pub fn resource(&self) -> &str {
        &self.source.resource
    }

    /// Whether this is a `Namespace` object
    pub fn is_namespace(&self) -> bool {
        self.source.is_namespace()
    }

    /// Whether this is a `PersistentVolumeClaim`
    pub fn is_persistent_volume_claim(&self) -> bool {
        self.source.is_persistent_volume_claim()
    }

    /// Whether the object has no namespace
    pub fn is_cluster_scoped(&self) -> bool {
        self.target_namespace.is_none()
    }

    /// Whether the target identity differs from the source
    pub fn is_remapped(&self) -> bool {
        self.target_namespace != self.source.namespace || self.target_name != self.source.name
    }

    /// Manifest to create in the target cluster
    ///
    /// Server-assigned fields are stripped, the target identity is written,
    /// the object is labelled with the restore name and, when moved, annotated
    /// with its source namespace.
    pub fn manifest(&self, restore_name: &str) -> Value {
        let mut obj = self.source.object.clone();
        strip_transient_fields(&mut obj);

        if !obj.get("metadata").is_some_and(Value::is_object) {
            obj["metadata"] = Value::Object(Map::new());
        }
        let Some(metadata) = obj.get_mut("metadata").and_then(Value::as_object_mut) else {
            return obj;
        };

        metadata.insert("name".to_string(), Value::String(self.target_name.clone()));
        match &self.target_namespace {
            Some(ns) => {
                metadata.insert("namespace".to_string(), Value::String(ns.clone()));
            }
            None => {
                metadata.remove("namespace");
            }
        }

        insert_string(metadata, "labels", RESTORE_NAME_LABEL, restore_name);

        let source_namespace = if self.is_namespace() {
            Some(self.source.name.as_str())
        } else {
            self.source.namespace.as_deref()
        };
        if let Some(source_namespace) = source_namespace.filter(|_| self.is_remapped()) {
            insert_string(
                metadata,
                "annotations",
                SOURCE_NAMESPACE_ANNOTATION,
                source_namespace,
            );
        }

        obj
    }

    /// Reference to the object in the target cluster
    pub fn object_reference(&self) -> ObjectReference {
        ObjectReference {
            api_version: Some(self.source.api_version.clone()),
            kind: Some(self.source.kind.clone()),
            namespace: self.target_namespace.clone(),
            name: Some(self.target_name.clone()),
            ..Default::default()
        }
    }

    /// `resource/namespace/name` in the target cluster
    pub fn display(&self) -> String {
        match &self.target_namespace {
            Some(ns) => format!("{}/{}/{}", self.source.resource, ns, self.target_name),
            None => format!("{}/{}", self.source.resource, self.target_name),
        }
    }
}

fn insert_string(metadata: &mut Map<String, Value>, map: &str, key: &str, value: &str) {
    let entry = metadata
        .entry(map.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !entry.is_object() {
        *entry = Value::Object(Map::new());
    }
    if let Some(entries) = entry.as_object_mut() {
        entries.insert(key.to_string(), Value::String(value.to_string()));
    }
}

/// Rewrite every selected item, preserving order
pub fn rewrite_all(items: &[&BackupItem], mapping: &NamespaceMapping) -> Vec<RestoreItem> {
    items
        .iter()
        .map(|item| RestoreItem::rewrite(item, mapping))
        .collect()
}
