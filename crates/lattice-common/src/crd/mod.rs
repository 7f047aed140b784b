//! Custom Resource Definitions for Lattice restore
//!
//! This module contains the LatticeRestore CRD and the small value types its
//! spec is built from.

mod restore;
mod selector;

pub use restore::{
    LatticeRestore, LatticeRestoreSpec, LatticeRestoreStatus, RestorePhase, Toggle,
};
pub use selector::{LabelSelector, LabelSelectorOperator, LabelSelectorRequirement};

// =============================================================================

/// Maximum length of a DNS-1123 label (namespace names)
pub const DNS_LABEL_MAX_LEN: usize = 63;

/// Validate a DNS-1123 label such as a namespace name.
///
/// Rules:
/// - Must not be empty or longer than 63 characters
/// - May contain lowercase letters, digits, and hyphens
/// - Must start and end with a lowercase letter or digit
pub fn validate_dns_label(s: &str) -> Result<(), String> {
    if s.is_empty() {
        return Err("name cannot be empty".to_string());
    }

    if s.len() > DNS_LABEL_MAX_LEN {
        return Err(format!(
            "name must be no more than {} characters: {}",
            DNS_LABEL_MAX_LEN, s
        ));
    }

    if !s
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(format!(
            "name must be lowercase alphanumeric with hyphens: {}",
            s
        ));
    }

    if s.starts_with('-') || s.ends_with('-') {
        return Err(format!(
            "name must start and end with an alphanumeric character: {}",
            s
        ));
    }

    Ok(())
}
