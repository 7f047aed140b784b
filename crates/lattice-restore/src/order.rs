//! Restore ordering
//!
//! Items are split into a cluster-scoped partition, restored first, and one
//! group per target namespace. Each group leads with its `Namespace` object
//! (when the backup has one) so that nothing is created in a namespace that
//! does not exist yet. Groups appear in the order their namespace is first
//! seen in the catalog, and every partition keeps catalog order unless
//! resource priorities say otherwise.

use std::collections::HashMap;

use tracing::debug;

use crate::rewrite::RestoreItem;

/// Resources restored ahead of all others, in rank order
///
/// Entries match a plural (`persistentvolumeclaims`) or group-qualified
/// resource (`deployments.apps`). Unlisted resources rank after listed ones.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResourcePriorities(Vec<String>);

impl ResourcePriorities {
    /// Priorities from a list of resources
    pub fn new<I, S>(resources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(
            resources
                .into_iter()
                .map(|r| r.into().trim().to_lowercase())
                .filter(|r| !r.is_empty())
                .collect(),
        )
    }

    /// Whether catalog order is kept as is
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn rank(&self, item: &RestoreItem) -> usize {
        self.0
            .iter()
            .position(|r| r == item.resource() || r == item.source.plural())
            .unwrap_or(self.0.len())
    }

    fn sort(&self, items: &mut [RestoreItem]) {
        if !self.is_empty() {
            items.sort_by_key(|item| self.rank(item));
        }
    }
}

/// Everything restored into one target namespace
#[derive(Clone, Debug, PartialEq)]
pub struct NamespaceGroup {
    /// Target namespace
    pub target: String,
    /// The `Namespace` object, when the plan restores one
    pub namespace_item: Option<RestoreItem>,
    /// Namespaced items, in restore order
    pub items: Vec<RestoreItem>,
}

impl NamespaceGroup {
    fn new(target: String) -> Self {
        Self {
            target,
            namespace_item: None,
            items: Vec::new(),
        }
    }

    /// Number of objects including the namespace itself
    pub fn len(&self) -> usize {
        self.items.len() + usize::from(self.namespace_item.is_some())
    }

    /// Whether the group restores nothing
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Ordered restore plan
///
/// Cluster-scoped items come first, then one group per target namespace.
/// `Namespace` objects are the exception: although cluster-scoped, each one
/// heads its own group instead of joining the cluster partition, so a
/// namespace is created right before its contents and may follow items of
/// an earlier group.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RestoreSequence {
    /// Cluster-scoped objects, restored before any namespace group
    pub cluster: Vec<RestoreItem>,
    /// Namespace groups in first-appearance order
    pub namespaces: Vec<NamespaceGroup>,
}

impl RestoreSequence {
    /// Order rewritten items
    ///
    /// With `include_cluster_resources` false every cluster-scoped item,
    /// `Namespace` objects included, is dropped.
    pub fn from_items(
        items: Vec<RestoreItem>,
        include_cluster_resources: bool,
        priorities: &ResourcePriorities,
    ) -> Self {
        let mut cluster = Vec::new();
        let mut namespaces: Vec<NamespaceGroup> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut dropped = 0usize;

        let mut group_for = |target: &str, namespaces: &mut Vec<NamespaceGroup>| -> usize {
            *index.entry(target.to_string()).or_insert_with(|| {
                namespaces.push(NamespaceGroup::new(target.to_string()));
                namespaces.len() - 1
            })
        };

        for item in items {
            match item.target_namespace.clone() {
                Some(ns) => {
                    let g = group_for(&ns, &mut namespaces);
                    namespaces[g].items.push(item);
                }
                None if !include_cluster_resources => dropped += 1,
                None if item.is_namespace() => {
                    let g = group_for(&item.target_name, &mut namespaces);
                    let group = &mut namespaces[g];
                    if group.namespace_item.is_none() {
                        group.namespace_item = Some(item);
                    } else {
                        // Two source namespaces mapped onto one target
                        group.items.push(item);
                    }
                }
                None => cluster.push(item),
            }
        }

        priorities.sort(&mut cluster);
        for group in &mut namespaces {
            priorities.sort(&mut group.items);
        }

        debug!(
            cluster = cluster.len(),
            namespaces = namespaces.len(),
            dropped,
            "Computed restore sequence"
        );

        Self {
            cluster,
            namespaces,
        }
    }

    /// Total number of objects
    pub fn len(&self) -> usize {
        self.cluster.len() + self.namespaces.iter().map(NamespaceGroup::len).sum::<usize>()
    }

    /// Whether nothing will be restored
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flattened total order: cluster partition, then each group's namespace
    /// followed by its items
    pub fn ordered_items(&self) -> Vec<&RestoreItem> {
        let mut ordered: Vec<&RestoreItem> = self.cluster.iter().collect();
        for group in &self.namespaces {
            ordered.extend(group.namespace_item.iter());
            ordered.extend(group.items.iter());
        }
        ordered
    }
}
