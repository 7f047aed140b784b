//! Request validation
//!
//! Every problem with a request is collected, in a stable order, so a single
//! status update tells the user everything that needs fixing.

use lattice_common::crd::{validate_dns_label, LatticeRestoreSpec};

use crate::filter::WILDCARD;
use crate::plan::is_non_restorable;

/// Check a request without consulting the catalog
///
/// Returns an empty list when the request is valid.
pub fn validate_spec(spec: &LatticeRestoreSpec) -> Vec<String> {
    let mut errors = Vec::new();

    if spec.backup_name.is_empty() == spec.schedule_name.is_empty() {
        errors.push(
            "either a backup or a schedule must be specified as the restore source, but not both"
                .to_string(),
        );
    }

    if spec.excluded_namespaces.iter().any(|ns| ns == WILDCARD) {
        errors.push("excludedNamespaces cannot contain '*'".to_string());
    }
    if spec.excluded_resources.iter().any(|r| r == WILDCARD) {
        errors.push("excludedResources cannot contain '*'".to_string());
    }

    let non_restorable: Vec<&str> = spec
        .included_resources
        .iter()
        .map(String::as_str)
        .filter(|r| is_non_restorable(r))
        .collect();
    if !non_restorable.is_empty() {
        errors.push(format!(
            "{} cannot be restored and must not be included",
            non_restorable.join(", ")
        ));
    }

    if let Some(selector) = &spec.label_selector {
        errors.extend(
            selector
                .validate()
                .into_iter()
                .map(|e| format!("invalid labelSelector: {}", e)),
        );
    }

    for (source, target) in &spec.namespace_mapping {
        if source.is_empty() {
            errors.push("namespaceMapping source namespace cannot be empty".to_string());
        }
        if let Err(e) = validate_dns_label(target) {
            errors.push(format!(
                "namespaceMapping target for {:?} is not a valid namespace: {}",
                source, e
            ));
        }
    }

    errors
}
