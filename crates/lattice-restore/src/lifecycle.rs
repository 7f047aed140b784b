//! Restore lifecycle state machine
//!
//! The only writer of a restore's phase, failure reason and terminal counts.
//! Phases move one way:
//!
//! ```text
//! New -> FailedValidation
//! New -> InProgress -> Completed | PartiallyFailed | Failed
//! ```
//!
//! `New -> InProgress` is a compare-and-swap on the phase. Whoever wins it is
//! the single worker for that restore; every other caller gets
//! [`RestoreError::AlreadyStarted`].
//!
//! Every transition publishes a status snapshot on a watch channel so a
//! caller can persist it without polling.

use std::sync::atomic::{AtomicU8, Ordering};

use lattice_common::crd::{LatticeRestoreStatus, RestorePhase};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::info;

use crate::error::RestoreError;
use crate::executor::ExecutionReport;

/// Reason recorded when a running restore is found without its worker
pub const INTERRUPTED_REASON: &str = "restore was interrupted before completion";

fn encode(phase: RestorePhase) -> u8 {
    match phase {
        RestorePhase::New => 0,
        RestorePhase::FailedValidation => 1,
        RestorePhase::InProgress => 2,
        RestorePhase::Completed => 3,
        RestorePhase::PartiallyFailed => 4,
        RestorePhase::Failed => 5,
    }
}

fn decode(value: u8) -> RestorePhase {
    match value {
        1 => RestorePhase::FailedValidation,
        2 => RestorePhase::InProgress,
        3 => RestorePhase::Completed,
        4 => RestorePhase::PartiallyFailed,
        5 => RestorePhase::Failed,
        _ => RestorePhase::New,
    }
}

/// Lifecycle of one restore
pub struct RestoreLifecycle {
    phase: AtomicU8,
    status: Mutex<LatticeRestoreStatus>,
    updates: watch::Sender<LatticeRestoreStatus>,
}

impl Default for RestoreLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl RestoreLifecycle {
    /// Lifecycle for a restore that has not been processed
    pub fn new() -> Self {
        Self::from_status(LatticeRestoreStatus::default())
    }

    /// Resume from a persisted status
    pub fn from_status(status: LatticeRestoreStatus) -> Self {
        let (updates, _) = watch::channel(status.clone());
        Self {
            phase: AtomicU8::new(encode(status.phase)),
            status: Mutex::new(status),
            updates,
        }
    }

    /// Current phase
    pub fn phase(&self) -> RestorePhase {
        decode(self.phase.load(Ordering::SeqCst))
    }

    /// Consistent snapshot of the status
    pub fn status(&self) -> LatticeRestoreStatus {
        self.status.lock().clone()
    }

    /// Receive a snapshot after every transition
    pub fn watch(&self) -> watch::Receiver<LatticeRestoreStatus> {
        self.updates.subscribe()
    }

    /// Swap `from -> to` and apply `update` to the status under one lock
    fn transition(
        &self,
        from: RestorePhase,
        to: RestorePhase,
        update: impl FnOnce(&mut LatticeRestoreStatus),
    ) -> Result<(), RestoreError> {
        if !from.can_transition_to(to) {
            return Err(RestoreError::InvalidTransition { from, to });
        }

        let mut status = self.status.lock();
        self.phase
            .compare_exchange(encode(from), encode(to), Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|current| {
                let current = decode(current);
                if to == RestorePhase::InProgress {
                    RestoreError::AlreadyStarted(current)
                } else {
                    RestoreError::InvalidTransition { from: current, to }
                }
            })?;

        status.phase = to;
        update(&mut status);
        self.updates.send_replace(status.clone());
        info!(from = %from, to = %to, "Restore phase changed");
        Ok(())
    }

    /// `New -> FailedValidation`; `errors` must not be empty
    pub fn fail_validation(&self, errors: Vec<String>) -> Result<(), RestoreError> {
        if errors.is_empty() {
            return Err(RestoreError::IncompleteTransition {
                phase: RestorePhase::FailedValidation,
                missing: "at least one validation error",
            });
        }
        self.transition(RestorePhase::New, RestorePhase::FailedValidation, |status| {
            status.validation_errors = errors;
        })
    }

    /// `New -> InProgress`; fails with [`RestoreError::AlreadyStarted`] for
    /// every caller but the first
    pub fn begin(&self) -> Result<(), RestoreError> {
        self.transition(RestorePhase::New, RestorePhase::InProgress, |_| {})
    }

    /// Record the execution result and finish
    ///
    /// Moves to `Completed` when no errors were recorded, otherwise to
    /// `PartiallyFailed`. Returns the phase entered.
    pub fn complete(&self, report: &ExecutionReport) -> Result<RestorePhase, RestoreError> {
        let to = if report.errors == 0 {
            RestorePhase::Completed
        } else {
            RestorePhase::PartiallyFailed
        };
        self.transition(RestorePhase::InProgress, to, |status| {
            record_counts(status, report)
        })?;
        Ok(to)
    }

    /// `InProgress -> Failed` with a reason, flushing any partial counts
    pub fn fail(
        &self,
        reason: impl Into<String>,
        partial: Option<&ExecutionReport>,
    ) -> Result<(), RestoreError> {
        let reason = reason.into();
        if reason.trim().is_empty() {
            return Err(RestoreError::IncompleteTransition {
                phase: RestorePhase::Failed,
                missing: "a failure reason",
            });
        }
        self.transition(RestorePhase::InProgress, RestorePhase::Failed, |status| {
            if let Some(report) = partial {
                record_counts(status, report);
            }
            status.failure_reason = Some(reason);
        })
    }
}

fn record_counts(status: &mut LatticeRestoreStatus, report: &ExecutionReport) {
    status.warnings = report.warnings;
    status.errors = report.errors;
    status.pod_volume_restore_errors = report.pod_volume_restore_errors.clone();
    status.pod_volume_restore_verify_errors = report.pod_volume_restore_verify_errors.clone();
}
