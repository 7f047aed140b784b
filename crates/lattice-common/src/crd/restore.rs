//! LatticeRestore Custom Resource Definition
//!
//! The LatticeRestore CRD requests that objects captured in a backup be
//! recreated in this cluster. The spec selects what to restore (namespace and
//! resource filters, label selector), where to put it (namespace mapping), and
//! whether volumes and cluster-scoped resources take part. The status is the
//! restore's lifecycle record and is written only by the restore engine.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ObjectReference;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::selector::LabelSelector;

/// Phase of a LatticeRestore
///
/// Transitions are one-way:
/// `New -> FailedValidation` or `New -> InProgress -> Completed | PartiallyFailed | Failed`.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum RestorePhase {
    /// Restore has been created but not yet processed
    #[default]
    New,
    /// Restore request failed validation and will not run
    FailedValidation,
    /// Restore is currently executing
    InProgress,
    /// Restore ran to completion without errors
    Completed,
    /// Restore ran to completion but one or more items failed
    PartiallyFailed,
    /// Restore was unable to execute; see `failureReason`
    Failed,
}

impl RestorePhase {
    /// Every phase, in lifecycle order
    pub const ALL: [RestorePhase; 6] = [
        RestorePhase::New,
        RestorePhase::FailedValidation,
        RestorePhase::InProgress,
        RestorePhase::Completed,
        RestorePhase::PartiallyFailed,
        RestorePhase::Failed,
    ];

    /// Whether no further transition is possible from this phase
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::FailedValidation | Self::Completed | Self::PartiallyFailed | Self::Failed
        )
    }

    /// Whether `next` is a legal transition from this phase
    pub fn can_transition_to(&self, next: RestorePhase) -> bool {
        matches!(
            (self, next),
            (Self::New, Self::FailedValidation)
                | (Self::New, Self::InProgress)
                | (Self::InProgress, Self::Completed)
                | (Self::InProgress, Self::PartiallyFailed)
                | (Self::InProgress, Self::Failed)
        )
    }

    /// Wire representation of the phase
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "New",
            Self::FailedValidation => "FailedValidation",
            Self::InProgress => "InProgress",
            Self::Completed => "Completed",
            Self::PartiallyFailed => "PartiallyFailed",
            Self::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for RestorePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Three-valued optional flag
///
/// Serialized as an optional boolean (`null`/absent, `true`, `false`). The
/// default applied to `Unset` is chosen by the caller through [`Toggle::resolve`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<bool>", into = "Option<bool>")]
pub enum Toggle {
    /// Not specified; the caller's default applies
    #[default]
    Unset,
    /// Explicitly enabled
    Enabled,
    /// Explicitly disabled
    Disabled,
}

impl Toggle {
    /// Resolve to a concrete value, using `default` when unset
    pub fn resolve(self, default: bool) -> bool {
        match self {
            Self::Unset => default,
            Self::Enabled => true,
            Self::Disabled => false,
        }
    }

    /// Whether the flag was left unspecified
    pub fn is_unset(&self) -> bool {
        matches!(self, Self::Unset)
    }
}

impl From<Option<bool>> for Toggle {
    fn from(value: Option<bool>) -> Self {
        match value {
            None => Self::Unset,
            Some(true) => Self::Enabled,
            Some(false) => Self::Disabled,
        }
    }
}

impl From<Toggle> for Option<bool> {
    fn from(value: Toggle) -> Self {
        match value {
            Toggle::Unset => None,
            Toggle::Enabled => Some(true),
            Toggle::Disabled => Some(false),
        }
    }
}

impl From<bool> for Toggle {
    fn from(value: bool) -> Self {
        Some(value).into()
    }
}

/// Status of a LatticeRestore
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LatticeRestoreStatus {
    /// Current phase
    #[serde(default)]
    pub phase: RestorePhase,

    /// Validation failures (only set in `FailedValidation`)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validation_errors: Vec<String>,

    /// Count of warnings generated during execution; messages are recorded externally
    #[serde(default)]
    pub warnings: u32,

    /// Count of errors generated during execution; messages are recorded externally
    #[serde(default)]
    pub errors: u32,

    /// Error that caused the entire restore to fail (only set in `Failed`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    /// Claims whose volume restore failed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pod_volume_restore_errors: Vec<ObjectReference>,

    /// Claims whose restored volume failed verification
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pod_volume_restore_verify_errors: Vec<ObjectReference>,
}

/// Specification for a LatticeRestore
///
/// Exactly one of `backupName` and `scheduleName` must be set. A schedule is
/// resolved to its most recent successful backup.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "lattice.dev",
    version = "v1alpha1",
    kind = "LatticeRestore",
    plural = "latticerestores",
    shortname = "lrs",
    namespaced,
    status = "LatticeRestoreStatus",
    printcolumn = r#"{"name":"Backup","type":"string","jsonPath":".spec.backupName"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Errors","type":"integer","jsonPath":".status.errors"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct LatticeRestoreSpec {
    /// Name of the backup to restore from
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub backup_name: String,

    /// Name of the schedule whose latest successful backup is restored
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub schedule_name: String,

    /// Namespaces to restore from; empty means all
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub included_namespaces: Vec<String>,

    /// Namespaces never restored, even if included
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded_namespaces: Vec<String>,

    /// Resources to restore (e.g. `deployments.apps`, `configmaps`); empty means all
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub included_resources: Vec<String>,

    /// Resources never restored, even if included
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded_resources: Vec<String>,

    /// Source namespace to target namespace; unmapped namespaces keep their name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub namespace_mapping: BTreeMap<String, String>,

    /// Only objects whose labels match are restored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_selector: Option<LabelSelector>,

    /// Whether to restore persistent volume data (unset means true)
    #[serde(rename = "restorePVs", default, skip_serializing_if = "Toggle::is_unset")]
    #[schemars(with = "Option<bool>")]
    pub restore_pvs: Toggle,

    /// Whether cluster-scoped resources are restored (unset means true)
    #[serde(default, skip_serializing_if = "Toggle::is_unset")]
    #[schemars(with = "Option<bool>")]
    pub include_cluster_resources: Toggle,
}

impl LatticeRestoreSpec {
    /// Spec restoring everything from the named backup
    pub fn from_backup(backup_name: impl Into<String>) -> Self {
        Self {
            backup_name: backup_name.into(),
            ..Default::default()
        }
    }

    /// Spec restoring everything from the schedule's latest successful backup
    pub fn from_schedule(schedule_name: impl Into<String>) -> Self {
        Self {
            schedule_name: schedule_name.into(),
            ..Default::default()
        }
    }

    /// Whether volume data is restored, applying the default for unset
    pub fn restore_pvs_enabled(&self) -> bool {
        self.restore_pvs.resolve(true)
    }

    /// Whether cluster-scoped objects are considered, applying the default for unset
    pub fn cluster_resources_enabled(&self) -> bool {
        self.include_cluster_resources.resolve(true)
    }
}
