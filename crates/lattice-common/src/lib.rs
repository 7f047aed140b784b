//! Common types for Lattice restore: CRDs, errors, and observability

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod events;
pub mod kube_utils;
pub mod metrics;
pub mod retry;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Namespace for Lattice system resources (operator, restore requests)
pub const LATTICE_SYSTEM_NAMESPACE: &str = "lattice-system";

/// API group for Lattice custom resources
pub const LATTICE_API_GROUP: &str = "lattice.dev";

/// Label stamped on every object recreated by a restore
pub const RESTORE_NAME_LABEL: &str = "lattice.dev/restore-name";

/// Annotation recording the source namespace of an object restored into a
/// different (mapped) namespace
pub const SOURCE_NAMESPACE_ANNOTATION: &str = "lattice.dev/source-namespace";
