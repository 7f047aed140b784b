//! Shared Kubernetes utilities using kube-rs
//!
//! Helpers for turning backed-up manifests back into API calls: API resource
//! construction, metadata scrubbing, namespace creation and status patches.

use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, Patch, PatchParams};
use kube::discovery::ApiResource;
use kube::Client;
use serde_json::Value;

/// Annotations that never survive a restore
const STRIPPED_ANNOTATIONS: &[&str] = &["kubectl.kubernetes.io/last-applied-configuration"];

/// Split an apiVersion into (group, version)
///
/// ```ignore
/// let (group, version) = parse_api_version("apps/v1");
/// assert_eq!(group, "apps");
///
/// let (group, version) = parse_api_version("v1");
/// assert_eq!(group, "");
/// ```
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Build an ApiResource from an apiVersion, kind and plural resource name.
///
/// Backups record the plural alongside each item, so no discovery call is
/// needed and irregular plurals (e.g. `ingresses`, `networkpolicies`) are exact.
pub fn build_api_resource(api_version: &str, kind: &str, plural: &str) -> ApiResource {
    let (group, version) = parse_api_version(api_version);
    ApiResource {
        group,
        version,
        kind: kind.to_string(),
        api_version: api_version.to_string(),
        plural: plural.to_string(),
    }
}

/// Kinds whose plural the suffix rules get wrong or that are already plural
const KIND_PLURALS: &[(&str, &str)] = &[
    ("endpoints", "endpoints"),
    ("componentstatus", "componentstatuses"),
    ("ingress", "ingresses"),
    ("ingressclass", "ingressclasses"),
    ("storageclass", "storageclasses"),
    ("priorityclass", "priorityclasses"),
    ("runtimeclass", "runtimeclasses"),
    ("volumeattributesclass", "volumeattributesclasses"),
    ("ipaddress", "ipaddresses"),
    ("clusterclass", "clusterclasses"),
];

/// Lowercase plural for a kind, for manifests that did not record one
///
/// Uses a lookup table for known irregular kinds, falling back to simple
/// pluralization rules for everything else.
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();

    if let Some((_, plural)) = KIND_PLURALS.iter().find(|(singular, _)| *singular == lower) {
        return (*plural).to_string();
    }

    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with("sh") || lower.ends_with('x')
    {
        format!("{}es", lower)
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{}s", lower)
    }
}

/// Remove server-assigned fields from a manifest so it can be created anew.
///
/// Drops `status`, the source cluster's identity and bookkeeping
/// (`uid`, `resourceVersion`, `creationTimestamp`, `generation`, `selfLink`,
/// `managedFields`, `deletionTimestamp`), owner references (the owners' UIDs
/// do not exist here) and the kubectl last-applied annotation.
pub fn strip_transient_fields(obj: &mut Value) {
    if let Some(metadata) = obj.get_mut("metadata").and_then(|m| m.as_object_mut()) {
        for field in [
            "uid",
            "resourceVersion",
            "creationTimestamp",
            "deletionTimestamp",
            "deletionGracePeriodSeconds",
            "generation",
            "selfLink",
            "managedFields",
            "ownerReferences",
        ] {
            metadata.remove(field);
        }

        if let Some(annotations) = metadata
            .get_mut("annotations")
            .and_then(|a| a.as_object_mut())
        {
            annotations.retain(|k, _| !STRIPPED_ANNOTATIONS.contains(&k.as_str()));
        }
    }

    if let Some(obj_map) = obj.as_object_mut() {
        obj_map.remove("status");
    }
}

/// Ensure a namespace exists (idempotent).
///
/// Uses server-side apply so it never fails on "already exists" and doesn't
/// race with concurrent creators.
pub async fn ensure_namespace(
    client: &Client,
    name: &str,
    field_manager: &str,
) -> Result<(), kube::Error> {
    let api: Api<Namespace> = Api::all(client.clone());
    let ns = serde_json::json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": { "name": name }
    });
    api.patch(name, &PatchParams::apply(field_manager), &Patch::Apply(&ns))
        .await?;
    Ok(())
}

/// Patch the status sub-resource of a namespaced Kubernetes resource.
///
/// Serializes `status` into `{ "status": <status> }` and applies it via
/// merge-patch. Returns `kube::Error` so callers can map to their own error type.
pub async fn patch_resource_status<T>(
    client: &Client,
    name: &str,
    namespace: &str,
    status: &impl serde::Serialize,
    field_manager: &str,
) -> std::result::Result<(), kube::Error>
where
    T: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>
        + Clone
        + serde::de::DeserializeOwned
        + std::fmt::Debug,
    <T as kube::Resource>::DynamicType: Default,
{
    let api: Api<T> = Api::namespaced(client.clone(), namespace);
    let patch = serde_json::json!({ "status": status });
    api.patch_status(name, &PatchParams::apply(field_manager), &Patch::Merge(&patch))
        .await?;
    Ok(())
}
