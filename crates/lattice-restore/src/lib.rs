//! Restore resolution and execution for Lattice backups
//!
//! A LatticeRestore names a backup (or a schedule), filters and rewrites its
//! contents, and recreates them in dependency order in the target cluster.
//!
//! - [`filter`] selects catalog items by namespace, resource and label
//! - [`rewrite`] maps source namespaces onto target namespaces
//! - [`order`] sequences cluster-scoped items, namespaces and their contents
//! - [`plan`] composes the three into a deterministic [`RestorePlan`]
//! - [`executor`] applies a plan and collects warnings and errors
//! - [`lifecycle`] owns the phase and terminal counts of one restore
//! - [`engine`] runs a restore end to end; [`controller`] drives it from the CRD

#![deny(missing_docs)]

pub mod apply;
pub mod catalog;
pub mod controller;
pub mod engine;
pub mod error;
pub mod executor;
pub mod filter;
pub mod lifecycle;
pub mod order;
pub mod plan;
pub mod reference;
pub mod rewrite;
pub mod sink;
pub mod validation;
pub mod volume;

pub use apply::{ApplyError, ApplyOutcome, KubeObjectApplier, ObjectApplier};
pub use catalog::{BackupCatalog, BackupItem, CatalogError};
pub use controller::{Context, KubeRestoreClient, RestoreKubeClient};
pub use engine::{EngineConfig, ResolvedRestore, RestoreEngine};
pub use error::RestoreError;
pub use executor::{ExecutionAborted, ExecutionReport, RestoreExecutor};
pub use lifecycle::RestoreLifecycle;
pub use order::{ResourcePriorities, RestoreSequence};
pub use plan::RestorePlan;
pub use reference::RestoreRef;
pub use rewrite::{NamespaceMapping, RestoreItem};
pub use sink::{EventMessageSink, MessageSink, Severity, TracingMessageSink};
pub use volume::{VolumeRestoreError, VolumeRestorer};
