//! Metrics registry for restore observability
//!
//! OpenTelemetry instruments for restore outcomes, restore duration, per-item
//! results and volume failures. Instruments are created lazily from the
//! global meter, so recording before telemetry is initialized is a no-op.

use once_cell::sync::Lazy;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::KeyValue;

use crate::crd::RestorePhase;

/// Global meter for Lattice metrics
static METER: Lazy<Meter> = Lazy::new(|| global::meter("lattice"));

// ============================================================================
// Restore Lifecycle Metrics
// ============================================================================

/// Counter of restores reaching a terminal phase
///
/// Labels:
/// - `phase`: failed_validation, completed, partially_failed, failed
pub static RESTORES_FINISHED: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("lattice_restores_finished_total")
        .with_description("Total number of restores by terminal phase")
        .with_unit("{restores}")
        .build()
});

/// Histogram of restore execution duration
///
/// Labels:
/// - `phase`: terminal phase
pub static RESTORE_DURATION: Lazy<Histogram<f64>> = Lazy::new(|| {
    METER
        .f64_histogram("lattice_restore_duration_seconds")
        .with_description("Duration of restore execution in seconds")
        .with_unit("s")
        .build()
});

// ============================================================================
// Item Metrics
// ============================================================================

/// Counter of restored items by outcome
///
/// Labels:
/// - `resource`: plural resource name (deployments.apps, configmaps)
/// - `result`: applied, warning, error
pub static RESTORE_ITEMS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("lattice_restore_items_total")
        .with_description("Total number of items processed by restores")
        .with_unit("{items}")
        .build()
});

/// Counter of volume restore failures
///
/// Labels:
/// - `stage`: restore, verify
pub static VOLUME_RESTORE_FAILURES: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("lattice_volume_restore_failures_total")
        .with_description("Total number of failed volume restores")
        .with_unit("{volumes}")
        .build()
});

// ============================================================================
// Helper Types
// ============================================================================

/// Label for a single item outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemResult {
    /// Object created or already present with matching content
    Applied,
    /// Object skipped or differed, restore continues
    Warning,
    /// Object could not be created
    Error,
}

impl ItemResult {
    /// Convert to label value
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

/// Label for a failed volume stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeStage {
    /// Data could not be restored
    Restore,
    /// Restored data failed verification
    Verify,
}

impl VolumeStage {
    /// Convert to label value
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Restore => "restore",
            Self::Verify => "verify",
        }
    }
}

/// Snake-case label value for a phase
pub fn phase_label(phase: RestorePhase) -> &'static str {
    match phase {
        RestorePhase::New => "new",
        RestorePhase::FailedValidation => "failed_validation",
        RestorePhase::InProgress => "in_progress",
        RestorePhase::Completed => "completed",
        RestorePhase::PartiallyFailed => "partially_failed",
        RestorePhase::Failed => "failed",
    }
}

// ============================================================================
// Metric Recording Helpers
// ============================================================================

/// Times a restore from `InProgress` to its terminal phase
pub struct RestoreTimer {
    start: std::time::Instant,
}

impl RestoreTimer {
    /// Start timing
    pub fn start() -> Self {
        Self {
            start: std::time::Instant::now(),
        }
    }

    /// Record the terminal phase and elapsed time
    pub fn finish(self, phase: RestorePhase) {
        let duration = self.start.elapsed().as_secs_f64();
        RESTORE_DURATION.record(duration, &[KeyValue::new("phase", phase_label(phase))]);
        record_restore_finished(phase);
    }
}

/// Count a restore reaching a terminal phase
pub fn record_restore_finished(phase: RestorePhase) {
    RESTORES_FINISHED.add(1, &[KeyValue::new("phase", phase_label(phase))]);
}

/// Count one processed item
pub fn record_item(resource: &str, result: ItemResult) {
    RESTORE_ITEMS.add(
        1,
        &[
            KeyValue::new("resource", resource.to_string()),
            KeyValue::new("result", result.as_str()),
        ],
    );
}

/// Count one failed volume
pub fn record_volume_failure(stage: VolumeStage) {
    VOLUME_RESTORE_FAILURES.add(1, &[KeyValue::new("stage", stage.as_str())]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_labels_are_snake_case() {
        assert_eq!(phase_label(RestorePhase::PartiallyFailed), "partially_failed");
        assert_eq!(phase_label(RestorePhase::FailedValidation), "failed_validation");
        assert_eq!(phase_label(RestorePhase::Completed), "completed");
    }

    #[test]
    fn label_values() {
        assert_eq!(ItemResult::Warning.as_str(), "warning");
        assert_eq!(VolumeStage::Verify.as_str(), "verify");
    }

    #[test]
    fn recording_without_provider_does_not_panic() {
        let timer = RestoreTimer::start();
        record_item("configmaps", ItemResult::Applied);
        record_volume_failure(VolumeStage::Restore);
        timer.finish(RestorePhase::Completed);
    }
}
