//! Item selection
//!
//! An item is selected when its namespace, its resource and its labels all
//! pass. Cluster-scoped items skip the namespace dimension and are gated by
//! `includeClusterResources` instead; a `Namespace` object is additionally
//! checked by its own name so that restoring namespace `a` does not recreate
//! namespace `b`.

use lattice_common::crd::{LabelSelector, LatticeRestoreSpec};

use crate::catalog::BackupItem;

/// Included value meaning "everything"
pub const WILDCARD: &str = "*";

/// Include/exclude rule for one dimension
///
/// Exclusion always wins. An empty (or `*`) include list admits everything
/// not excluded.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IncludesExcludes {
    includes: Vec<String>,
    excludes: Vec<String>,
}

impl IncludesExcludes {
    /// Build from the request's lists
    pub fn new(includes: &[String], excludes: &[String]) -> Self {
        Self {
            includes: includes.to_vec(),
            excludes: excludes.to_vec(),
        }
    }

    /// Whether every value not excluded is admitted
    pub fn includes_all(&self) -> bool {
        self.includes.is_empty() || self.includes.iter().any(|i| i == WILDCARD)
    }

    fn admits(&self, matches: impl Fn(&str) -> bool) -> bool {
        if self.excludes.iter().any(|e| e == WILDCARD || matches(e)) {
            return false;
        }
        self.includes_all() || self.includes.iter().any(|i| matches(i))
    }

    /// Exact, case-sensitive check (namespace names)
    pub fn should_include(&self, value: &str) -> bool {
        self.admits(|candidate| candidate == value)
    }

    /// Case-insensitive check against an item's plural, qualified resource or kind
    pub fn should_include_resource(&self, item: &BackupItem) -> bool {
        self.admits(|candidate| {
            candidate.eq_ignore_ascii_case(&item.resource)
                || candidate.eq_ignore_ascii_case(item.plural())
                || candidate.eq_ignore_ascii_case(&item.kind)
        })
    }
}

/// Selection rules derived from a restore request
#[derive(Clone, Debug, Default)]
pub struct ItemFilter {
    namespaces: IncludesExcludes,
    resources: IncludesExcludes,
    selector: Option<LabelSelector>,
    include_cluster_resources: bool,
}

impl ItemFilter {
    /// Build the filter for a request
    pub fn from_spec(spec: &LatticeRestoreSpec) -> Self {
        Self {
            namespaces: IncludesExcludes::new(&spec.included_namespaces, &spec.excluded_namespaces),
            resources: IncludesExcludes::new(&spec.included_resources, &spec.excluded_resources),
            selector: spec.label_selector.clone(),
            include_cluster_resources: spec.cluster_resources_enabled(),
        }
    }

    /// Whether a single item is selected
    pub fn matches(&self, item: &BackupItem) -> bool {
        let namespace_ok = match &item.namespace {
            Some(ns) => self.namespaces.should_include(ns),
            None => {
                self.include_cluster_resources
                    && (!item.is_namespace() || self.namespaces.should_include(&item.name))
            }
        };

        namespace_ok
            && self.resources.should_include_resource(item)
            && self
                .selector
                .as_ref()
                .is_none_or(|selector| selector.matches(&item.labels))
    }

    /// Selected items, in catalog order
    pub fn select<'a>(&self, items: &'a [BackupItem]) -> Vec<&'a BackupItem> {
        items.iter().filter(|item| self.matches(item)).collect()
    }
}
