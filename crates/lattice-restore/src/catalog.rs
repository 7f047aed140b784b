//! Backup catalog: the items a backup captured and how to look them up

use std::collections::BTreeMap;

use async_trait::async_trait;
use lattice_common::kube_utils::{parse_api_version, pluralize_kind};
use serde_json::Value;
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

/// Errors reading the backup catalog
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The named backup does not exist
    #[error("backup {0} not found")]
    NotFound(String),

    /// The catalog backend could not be reached
    #[error("backup catalog unavailable: {0}")]
    Unavailable(String),

    /// A stored item could not be decoded
    #[error("malformed backup item: {0}")]
    Malformed(String),
}

impl CatalogError {
    /// Only a backend outage is worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(self, CatalogError::Unavailable(_))
    }
}

/// Source of backups and their contents
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BackupCatalog: Send + Sync {
    /// Most recent successful backup produced by a schedule, if any
    async fn latest_successful_backup(&self, schedule: &str)
        -> Result<Option<String>, CatalogError>;

    /// Items captured by a backup, in catalog order
    async fn load_items(&self, backup: &str) -> Result<Vec<BackupItem>, CatalogError>;
}

/// One object captured in a backup
#[derive(Clone, Debug, PartialEq)]
pub struct BackupItem {
    /// apiVersion, e.g. `apps/v1`
    pub api_version: String,
    /// Kind, e.g. `Deployment`
    pub kind: String,
    /// Group-qualified plural resource, e.g. `deployments.apps` or `configmaps`
    pub resource: String,
    /// Source namespace; None for cluster-scoped objects
    pub namespace: Option<String>,
    /// Object name
    pub name: String,
    /// Object labels
    pub labels: BTreeMap<String, String>,
    /// Full manifest as captured
    pub object: Value,
}

impl BackupItem {
    /// Decode an item from its manifest, inferring the plural from the kind
    pub fn from_manifest(object: Value) -> Result<Self, CatalogError> {
        let kind = required_str(&object, "/kind")?;
        Self::from_manifest_with_plural(&pluralize_kind(&kind), object)
    }

    /// Decode an item from its manifest with a known plural resource name
    pub fn from_manifest_with_plural(plural: &str, object: Value) -> Result<Self, CatalogError> {
        let api_version = required_str(&object, "/apiVersion")?;
        let kind = required_str(&object, "/kind")?;
        let name = required_str(&object, "/metadata/name")?;
        let namespace = object
            .pointer("/metadata/namespace")
            .and_then(Value::as_str)
            .filter(|ns| !ns.is_empty())
            .map(str::to_string);
        let labels = object
            .pointer("/metadata/labels")
            .and_then(Value::as_object)
            .map(|m| {
                m.iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        let (group, _) = parse_api_version(&api_version);
        let resource = if group.is_empty() {
            plural.to_lowercase()
        } else {
            format!("{}.{}", plural.to_lowercase(), group)
        };

        Ok(Self {
            api_version,
            kind,
            resource,
            namespace,
            name,
            labels,
            object,
        })
    }

    /// API group; empty for the core group
    pub fn group(&self) -> String {
        parse_api_version(&self.api_version).0
    }

    /// Plural resource name without the group
    pub fn plural(&self) -> &str {
        self.resource
            .split_once('.')
            .map_or(self.resource.as_str(), |(plural, _)| plural)
    }

    /// Whether the object has no namespace
    pub fn is_cluster_scoped(&self) -> bool {
        self.namespace.is_none()
    }

    /// Whether this is a core `Namespace` object
    pub fn is_namespace(&self) -> bool {
        self.kind == "Namespace" && self.group().is_empty()
    }

    /// Whether this is a core `PersistentVolumeClaim`
    pub fn is_persistent_volume_claim(&self) -> bool {
        self.kind == "PersistentVolumeClaim" && self.group().is_empty()
    }

    /// `resource/namespace/name`, or `resource/name` when cluster-scoped
    pub fn display(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{}/{}/{}", self.resource, ns, self.name),
            None => format!("{}/{}", self.resource, self.name),
        }
    }
}

fn required_str(object: &Value, pointer: &str) -> Result<String, CatalogError> {
    object
        .pointer(pointer)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| CatalogError::Malformed(format!("missing {}", &pointer[1..].replace('/', "."))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_namespaced_item() {
        let item = BackupItem::from_manifest(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {
                "name": "web",
                "namespace": "shop",
                "labels": {"app": "web", "tier": "frontend"}
            }
        }))
        .unwrap();

        assert_eq!(item.resource, "deployments.apps");
        assert_eq!(item.plural(), "deployments");
        assert_eq!(item.group(), "apps");
        assert_eq!(item.namespace.as_deref(), Some("shop"));
        assert_eq!(item.labels.get("tier").map(String::as_str), Some("frontend"));
        assert!(!item.is_cluster_scoped());
        assert_eq!(item.display(), "deployments.apps/shop/web");
    }

    #[test]
    fn decodes_cluster_scoped_namespace_item() {
        let item = BackupItem::from_manifest(json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": {"name": "shop"}
        }))
        .unwrap();

        assert_eq!(item.resource, "namespaces");
        assert!(item.is_cluster_scoped());
        assert!(item.is_namespace());
        assert!(item.labels.is_empty());
        assert_eq!(item.display(), "namespaces/shop");
    }

    #[test]
    fn already_plural_kind_keeps_its_name() {
        let item = BackupItem::from_manifest(json!({
            "apiVersion": "v1",
            "kind": "Endpoints",
            "metadata": {"name": "web", "namespace": "shop"}
        }))
        .unwrap();
        assert_eq!(item.resource, "endpoints");
        assert_eq!(item.plural(), "endpoints");
    }

    #[test]
    fn explicit_plural_wins() {
        let item = BackupItem::from_manifest_with_plural(
            "ingresses",
            json!({
                "apiVersion": "networking.k8s.io/v1",
                "kind": "Ingress",
                "metadata": {"name": "public", "namespace": "shop"}
            }),
        )
        .unwrap();
        assert_eq!(item.resource, "ingresses.networking.k8s.io");
    }

    #[test]
    fn pvc_detection_requires_core_group() {
        let pvc = BackupItem::from_manifest(json!({
            "apiVersion": "v1",
            "kind": "PersistentVolumeClaim",
            "metadata": {"name": "data", "namespace": "db"}
        }))
        .unwrap();
        assert!(pvc.is_persistent_volume_claim());

        let lookalike = BackupItem::from_manifest(json!({
            "apiVersion": "example.com/v1",
            "kind": "PersistentVolumeClaim",
            "metadata": {"name": "data", "namespace": "db"}
        }))
        .unwrap();
        assert!(!lookalike.is_persistent_volume_claim());
    }

    #[test]
    fn missing_fields_are_malformed() {
        let err = BackupItem::from_manifest(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {}
        }))
        .unwrap_err();
        assert_eq!(err.to_string(), "malformed backup item: missing metadata.name");

        let err = BackupItem::from_manifest(json!({"metadata": {"name": "x"}})).unwrap_err();
        assert!(matches!(err, CatalogError::Malformed(_)));
    }

    #[test]
    fn only_unavailable_is_retryable() {
        assert!(CatalogError::Unavailable("conn reset".into()).is_retryable());
        assert!(!CatalogError::NotFound("b".into()).is_retryable());
        assert!(!CatalogError::Malformed("x".into()).is_retryable());
    }
}
