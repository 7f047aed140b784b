//! Restore planning: filter, drop non-restorable resources, rewrite, order

use lattice_common::crd::LatticeRestoreSpec;
use tracing::{debug, info};

use crate::catalog::BackupItem;
use crate::filter::ItemFilter;
use crate::order::{ResourcePriorities, RestoreSequence};
use crate::rewrite::{rewrite_all, NamespaceMapping};

/// Resources that are never recreated by a restore
///
/// Nodes and events belong to the source cluster, and restoring backup or
/// restore records would re-trigger the backup system itself.
pub const NON_RESTORABLE_RESOURCES: &[&str] = &[
    "nodes",
    "events",
    "events.events.k8s.io",
    "backups.velero.io",
    "restores.velero.io",
    "resticrepositories.velero.io",
    "latticerestores.lattice.dev",
];

/// Whether a (plural or group-qualified) resource is never restored
pub fn is_non_restorable(resource: &str) -> bool {
    NON_RESTORABLE_RESOURCES
        .iter()
        .any(|r| r.eq_ignore_ascii_case(resource))
}

/// The ordered set of objects a restore will create
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RestorePlan {
    /// Objects to create, in order
    pub sequence: RestoreSequence,
    /// Items that passed the filters
    pub selected: usize,
    /// Selected items dropped as non-restorable
    pub skipped: usize,
}

impl RestorePlan {
    /// Build the plan for a request over a catalog
    ///
    /// Pure and deterministic: identical inputs always produce the same order.
    pub fn build(
        spec: &LatticeRestoreSpec,
        catalog: &[BackupItem],
        priorities: &ResourcePriorities,
    ) -> Self {
        let selected = ItemFilter::from_spec(spec).select(catalog);
        let selected_count = selected.len();

        let restorable: Vec<&BackupItem> = selected
            .into_iter()
            .filter(|item| {
                let skip = is_non_restorable(&item.resource);
                if skip {
                    debug!(item = %item.display(), "Skipping non-restorable resource");
                }
                !skip
            })
            .collect();
        let skipped = selected_count - restorable.len();

        let mapping = NamespaceMapping::new(spec.namespace_mapping.clone());
        let rewritten = rewrite_all(&restorable, &mapping);
        let sequence =
            RestoreSequence::from_items(rewritten, spec.cluster_resources_enabled(), priorities);

        info!(
            catalog = catalog.len(),
            selected = selected_count,
            skipped,
            planned = sequence.len(),
            "Built restore plan"
        );

        Self {
            sequence,
            selected: selected_count,
            skipped,
        }
    }
}
