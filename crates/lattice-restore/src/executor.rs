//! Restore execution
//!
//! Walks a [`RestoreSequence`] and creates each object through the
//! [`ObjectApplier`]. A failing item is counted and the walk continues; only a
//! structural failure (or cancellation) stops it. Claims get their volume
//! data restored in the background once the claim object exists, and every
//! volume restore is settled before `execute` returns.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use k8s_openapi::api::core::v1::ObjectReference;
use lattice_common::metrics::{self, ItemResult, VolumeStage};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::apply::{ApplyError, ApplyOutcome, ObjectApplier};
use crate::error::RestoreError;
use crate::order::{NamespaceGroup, RestoreSequence};
use crate::reference::RestoreRef;
use crate::rewrite::RestoreItem;
use crate::sink::{MessageSink, Severity};
use crate::volume::{VolumeRestoreError, VolumeRestorer};

/// Counts and failed claims from one execution
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExecutionReport {
    /// Objects created
    pub applied: u32,
    /// Warnings recorded
    pub warnings: u32,
    /// Errors recorded, volume failures included
    pub errors: u32,
    /// Claims whose volume restore failed
    pub pod_volume_restore_errors: Vec<ObjectReference>,
    /// Claims whose restored volume failed verification
    pub pod_volume_restore_verify_errors: Vec<ObjectReference>,
}

/// Execution stopped before the sequence was finished
#[derive(Debug, Error)]
#[error("{error}")]
pub struct ExecutionAborted {
    /// Why execution stopped
    pub error: RestoreError,
    /// What had been done up to that point
    pub partial: ExecutionReport,
}

#[derive(Default)]
struct OutcomeTracker {
    applied: AtomicU32,
    warnings: AtomicU32,
    errors: AtomicU32,
    volume_errors: Mutex<Vec<ObjectReference>>,
    verify_errors: Mutex<Vec<ObjectReference>>,
    pending_volumes: Mutex<Vec<ObjectReference>>,
    structural: Mutex<Option<String>>,
}

impl OutcomeTracker {
    fn volume_failed(&self, claim: ObjectReference, stage: VolumeStage) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        metrics::record_volume_failure(stage);
        match stage {
            VolumeStage::Restore => self.volume_errors.lock().push(claim),
            VolumeStage::Verify => self.verify_errors.lock().push(claim),
        }
    }

    /// Remove a claim from the pending list; false if it was already settled
    fn settle(&self, claim: &ObjectReference) -> bool {
        let mut pending = self.pending_volumes.lock();
        match pending.iter().position(|c| c == claim) {
            Some(idx) => {
                pending.remove(idx);
                true
            }
            None => false,
        }
    }

    fn report(&self) -> ExecutionReport {
        ExecutionReport {
            applied: self.applied.load(Ordering::SeqCst),
            warnings: self.warnings.load(Ordering::SeqCst),
            errors: self.errors.load(Ordering::SeqCst),
            pod_volume_restore_errors: self.volume_errors.lock().clone(),
            pod_volume_restore_verify_errors: self.verify_errors.lock().clone(),
        }
    }
}

/// Applies a restore sequence against the target cluster
#[derive(Clone)]
pub struct RestoreExecutor {
    applier: Arc<dyn ObjectApplier>,
    volumes: Arc<dyn VolumeRestorer>,
    sink: Arc<dyn MessageSink>,
    max_parallel_namespaces: usize,
}

impl RestoreExecutor {
    /// Executor processing one namespace group at a time
    pub fn new(
        applier: Arc<dyn ObjectApplier>,
        volumes: Arc<dyn VolumeRestorer>,
        sink: Arc<dyn MessageSink>,
    ) -> Self {
        Self {
            applier,
            volumes,
            sink,
            max_parallel_namespaces: 1,
        }
    }

    /// Process up to `n` namespace groups concurrently (minimum 1)
    pub fn with_max_parallel_namespaces(mut self, n: usize) -> Self {
        self.max_parallel_namespaces = n.max(1);
        self
    }

    /// Restore every object in `sequence`
    ///
    /// Returns the report when the whole sequence was processed, however
    /// many items failed. Returns [`ExecutionAborted`] with the partial
    /// report on a structural failure or when `cancel` fires.
    #[instrument(skip_all, fields(restore = %restore, items = sequence.len()))]
    pub async fn execute(
        &self,
        restore: &RestoreRef,
        sequence: &RestoreSequence,
        restore_pvs: bool,
        cancel: &CancellationToken,
    ) -> Result<ExecutionReport, ExecutionAborted> {
        let run = Run {
            executor: self,
            restore,
            restore_pvs,
            halt: cancel.child_token(),
            tracker: Arc::new(OutcomeTracker::default()),
            volume_tasks: Mutex::new(Vec::new()),
        };

        for item in &sequence.cluster {
            run.apply(item).await;
        }

        let run_ref = &run;
        stream::iter(sequence.namespaces.iter())
            .for_each_concurrent(self.max_parallel_namespaces, move |group| {
                run_ref.group(group)
            })
            .await;

        run.settle_volumes().await;

        let partial = run.tracker.report();
        let structural = run.tracker.structural.lock().take();
        if let Some(message) = structural {
            return Err(ExecutionAborted {
                error: RestoreError::Structural(message),
                partial,
            });
        }
        if cancel.is_cancelled() {
            warn!(restore = %restore, "Restore cancelled");
            return Err(ExecutionAborted {
                error: RestoreError::Cancelled,
                partial,
            });
        }

        info!(
            restore = %restore,
            applied = partial.applied,
            warnings = partial.warnings,
            errors = partial.errors,
            "Restore sequence processed"
        );
        Ok(partial)
    }
}

struct Run<'a> {
    executor: &'a RestoreExecutor,
    restore: &'a RestoreRef,
    restore_pvs: bool,
    halt: CancellationToken,
    tracker: Arc<OutcomeTracker>,
    volume_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Run<'_> {
    fn stopped(&self) -> bool {
        self.halt.is_cancelled()
    }

    async fn warning(&self, message: String) {
        self.tracker.warnings.fetch_add(1, Ordering::SeqCst);
        self.executor
            .sink
            .record(self.restore, Severity::Warning, message)
            .await;
    }

    async fn error(&self, message: String) {
        self.tracker.errors.fetch_add(1, Ordering::SeqCst);
        warn!(restore = %self.restore, error = %message, "Item failed");
        self.executor
            .sink
            .record(self.restore, Severity::Error, message)
            .await;
    }

    fn fail(&self, message: String) {
        error!(restore = %self.restore, error = %message, "Restore halted");
        self.tracker.structural.lock().get_or_insert(message);
        self.halt.cancel();
    }

    async fn apply(&self, item: &RestoreItem) {
        if self.stopped() {
            return;
        }

        match self
            .executor
            .applier
            .apply_object(self.restore, item)
            .await
        {
            Ok(ApplyOutcome::Applied) => {
                debug!(item = %item.display(), "Restored item");
                self.tracker.applied.fetch_add(1, Ordering::SeqCst);
                metrics::record_item(item.resource(), ItemResult::Applied);
                self.restore_volume(item);
            }
            Ok(ApplyOutcome::Warning(message)) => {
                metrics::record_item(item.resource(), ItemResult::Warning);
                self.warning(message).await;
                self.restore_volume(item);
            }
            Err(ApplyError::Item(message)) => {
                metrics::record_item(item.resource(), ItemResult::Error);
                self.error(message).await;
            }
            Err(ApplyError::Structural(message)) => self.fail(message),
        }
    }

    async fn group(&self, group: &NamespaceGroup) {
        if self.stopped() {
            return;
        }

        match &group.namespace_item {
            Some(namespace) => self.apply(namespace).await,
            None => match self.executor.applier.ensure_namespace(&group.target).await {
                Ok(()) => {}
                Err(ApplyError::Item(message)) => {
                    self.error(format!(
                        "namespace {} could not be created, skipped {} items: {}",
                        group.target,
                        group.items.len(),
                        message
                    ))
                    .await;
                    return;
                }
                Err(ApplyError::Structural(message)) => {
                    self.fail(message);
                    return;
                }
            },
        }

        for item in &group.items {
            if self.stopped() {
                break;
            }
            self.apply(item).await;
        }
    }

    /// Start restoring a claim's data if this item is a claim and volumes are enabled
    fn restore_volume(&self, item: &RestoreItem) {
        if !self.restore_pvs || !item.is_persistent_volume_claim() || self.stopped() {
            return;
        }

        let claim = item.object_reference();
        self.tracker.pending_volumes.lock().push(claim.clone());

        let volumes = self.executor.volumes.clone();
        let sink = self.executor.sink.clone();
        let tracker = self.tracker.clone();
        let restore = self.restore.clone();
        let halt = self.halt.clone();
        let shown = item.display();

        let handle = tokio::spawn(async move {
            let result = tokio::select! {
                _ = halt.cancelled() => return,
                result = volumes.restore_volume(&claim) => result,
            };
            if !tracker.settle(&claim) {
                return;
            }
            let (stage, message) = match result {
                Ok(()) => {
                    debug!(claim = %shown, "Restored volume");
                    return;
                }
                Err(VolumeRestoreError::Restore(e)) => (VolumeStage::Restore, e),
                Err(VolumeRestoreError::Verify(e)) => (VolumeStage::Verify, e),
            };
            warn!(claim = %shown, stage = stage.as_str(), error = %message, "Volume restore failed");
            tracker.volume_failed(claim, stage);
            sink.record(
                &restore,
                Severity::Error,
                format!("volume {} for {}: {}", stage.as_str(), shown, message),
            )
            .await;
        });
        self.volume_tasks.lock().push(handle);
    }

    /// Wait for all volume restores; anything still pending is failed
    async fn settle_volumes(&self) {
        let handles = std::mem::take(&mut *self.volume_tasks.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Volume restore task did not finish");
            }
        }

        let abandoned = std::mem::take(&mut *self.tracker.pending_volumes.lock());
        for claim in abandoned {
            let name = claim.name.clone().unwrap_or_default();
            self.tracker.volume_failed(claim, VolumeStage::Restore);
            self.executor
                .sink
                .record(
                    self.restore,
                    Severity::Error,
                    format!("volume restore for claim {} did not complete", name),
                )
                .await;
        }
    }
}
