//! Error types for restore resolution and execution

use lattice_common::crd::RestorePhase;
use thiserror::Error;

use crate::catalog::CatalogError;

/// Errors from the restore engine
#[derive(Debug, Error)]
pub enum RestoreError {
    /// Backup contents could not be read from the catalog
    #[error("failed to load backup {backup}: {source}")]
    Catalog {
        /// Backup that was being loaded
        backup: String,
        /// Catalog failure after retries
        source: CatalogError,
    },

    /// A failure that prevents the restore from continuing
    #[error("{0}")]
    Structural(String),

    /// Restore was cancelled while running
    #[error("restore was cancelled")]
    Cancelled,

    /// Lifecycle transition not allowed from the current phase
    #[error("invalid phase transition from {from} to {to}")]
    InvalidTransition {
        /// Phase the restore was in
        from: RestorePhase,
        /// Phase that was requested
        to: RestorePhase,
    },

    /// Another worker already moved the restore out of `New`
    #[error("restore already started (phase {0})")]
    AlreadyStarted(RestorePhase),

    /// A transition was requested without the detail it must record
    #[error("transition to {phase} requires {missing}")]
    IncompleteTransition {
        /// Phase that was requested
        phase: RestorePhase,
        /// What the caller left out
        missing: &'static str,
    },
}

impl From<RestoreError> for lattice_common::Error {
    fn from(err: RestoreError) -> Self {
        lattice_common::Error::internal_with_context("restore", err.to_string())
    }
}
