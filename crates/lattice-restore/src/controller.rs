//! LatticeRestore controller
//!
//! Watches LatticeRestore resources and runs each new one through the
//! [`RestoreEngine`] on a background worker. The worker's lifecycle publishes
//! status snapshots that are patched onto the resource as they happen. The
//! controller itself only writes status to fail a restore whose worker was
//! lost (operator restart) or to retry a finished worker's terminal status
//! that could not be patched.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::StreamExt;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Client, ResourceExt};
use lattice_common::crd::{LatticeRestore, LatticeRestoreSpec, LatticeRestoreStatus, RestorePhase};
use lattice_common::events::{actions, reasons, EventPublisher};
use lattice_common::retry::{retry_with_backoff, RetryConfig};
use lattice_common::{kube_utils, metrics, Error};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::apply::FIELD_MANAGER;
use crate::engine::RestoreEngine;
use crate::lifecycle::{RestoreLifecycle, INTERRUPTED_REASON};
use crate::reference::RestoreRef;

#[cfg(test)]
use mockall::automock;

/// Finalizer that lets a deleted restore cancel its running worker
pub const RESTORE_FINALIZER: &str = "lattice.dev/restore-cancel";

/// Requeue interval while a worker is running
pub const REQUEUE_IN_PROGRESS_SECS: u64 = 30;

/// Requeue interval after a reconcile error
pub const REQUEUE_ERROR_SECS: u64 = 5;

/// Watcher timeout (seconds), below the client read timeout
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Kubernetes operations the controller needs
///
/// This trait allows mocking the Kubernetes client in tests while using
/// the real client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RestoreKubeClient: Send + Sync {
    /// Patch the status sub-resource of a LatticeRestore
    async fn patch_status(
        &self,
        restore: &RestoreRef,
        status: &LatticeRestoreStatus,
    ) -> Result<(), Error>;

    /// Add a finalizer to a LatticeRestore
    async fn add_finalizer(&self, restore: &RestoreRef, finalizer: &str) -> Result<(), Error>;

    /// Remove a finalizer from a LatticeRestore
    async fn remove_finalizer(&self, restore: &RestoreRef, finalizer: &str) -> Result<(), Error>;
}

/// [`RestoreKubeClient`] backed by a kube client
pub struct KubeRestoreClient {
    client: Client,
}

impl KubeRestoreClient {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, restore: &RestoreRef) -> Api<LatticeRestore> {
        Api::namespaced(self.client.clone(), &restore.namespace)
    }

    async fn set_finalizers(&self, restore: &RestoreRef, finalizers: Vec<String>) -> Result<(), Error> {
        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers
            }
        });

        self.api(restore)
            .patch(
                &restore.name,
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&patch),
            )
            .await?;

        Ok(())
    }
}

#[async_trait]
impl RestoreKubeClient for KubeRestoreClient {
    async fn patch_status(
        &self,
        restore: &RestoreRef,
        status: &LatticeRestoreStatus,
    ) -> Result<(), Error> {
        kube_utils::patch_resource_status::<LatticeRestore>(
            &self.client,
            &restore.name,
            &restore.namespace,
            status,
            FIELD_MANAGER,
        )
        .await?;
        Ok(())
    }

    async fn add_finalizer(&self, restore: &RestoreRef, finalizer: &str) -> Result<(), Error> {
        let current = self.api(restore).get(&restore.name).await?;
        let mut finalizers = current.metadata.finalizers.unwrap_or_default();

        if finalizers.iter().any(|f| f == finalizer) {
            return Ok(());
        }
        finalizers.push(finalizer.to_string());

        self.set_finalizers(restore, finalizers).await
    }

    async fn remove_finalizer(&self, restore: &RestoreRef, finalizer: &str) -> Result<(), Error> {
        let current = self.api(restore).get(&restore.name).await?;
        let finalizers: Vec<String> = current
            .metadata
            .finalizers
            .unwrap_or_default()
            .into_iter()
            .filter(|f| f != finalizer)
            .collect();

        self.set_finalizers(restore, finalizers).await
    }
}

/// What the controller knows about a restore's worker
#[derive(Clone, Debug)]
enum WorkerState {
    Running(CancellationToken),
    /// Worker is done; its terminal status may not be in the cache yet
    Finished {
        status: LatticeRestoreStatus,
        persisted: bool,
    },
}

/// Shared controller state
pub struct Context {
    engine: Arc<RestoreEngine>,
    kube: Arc<dyn RestoreKubeClient>,
    events: Arc<dyn EventPublisher>,
    status_retry: RetryConfig,
    workers: DashMap<String, WorkerState>,
}

impl Context {
    /// Context over an engine and its Kubernetes collaborators
    pub fn new(
        engine: Arc<RestoreEngine>,
        kube: Arc<dyn RestoreKubeClient>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            engine,
            kube,
            events,
            status_retry: RetryConfig::with_max_attempts(5),
            workers: DashMap::new(),
        }
    }

    /// Retry settings for status patches
    pub fn with_status_retry(mut self, retry: RetryConfig) -> Self {
        self.status_retry = retry;
        self
    }

    /// Number of restores with a running worker
    pub fn running_workers(&self) -> usize {
        self.workers
            .iter()
            .filter(|w| matches!(w.value(), WorkerState::Running(_)))
            .count()
    }

    /// Terminal status of a finished worker that never reached the API server
    fn unpersisted_status(&self, key: &str) -> Option<LatticeRestoreStatus> {
        match self.workers.get(key)?.value() {
            WorkerState::Finished {
                status,
                persisted: false,
            } => Some(status.clone()),
            _ => None,
        }
    }

    async fn persist(&self, restore: &RestoreRef, status: &LatticeRestoreStatus) -> Result<(), Error> {
        retry_with_backoff(&self.status_retry, "patch_restore_status", || {
            let kube = self.kube.clone();
            let restore = restore.clone();
            let status = status.clone();
            async move { kube.patch_status(&restore, &status).await }
        })
        .await
        .map_err(|e| {
            error!(restore = %restore, phase = %status.phase, error = %e, "Failed to persist restore status");
            e
        })?;
        debug!(restore = %restore, phase = %status.phase, "Persisted restore status");

        if let Some((type_, reason, note)) = phase_event(status) {
            self.events
                .publish(
                    &restore.object_reference(),
                    type_,
                    reason,
                    actions::RECONCILE,
                    Some(note),
                )
                .await;
        }
        Ok(())
    }
}

fn worker_key(restore: &RestoreRef) -> String {
    restore
        .uid
        .clone()
        .unwrap_or_else(|| restore.to_string())
}

fn has_finalizer(restore: &LatticeRestore) -> bool {
    restore.finalizers().iter().any(|f| f == RESTORE_FINALIZER)
}

/// Event announcing a phase, if the phase warrants one
fn phase_event(status: &LatticeRestoreStatus) -> Option<(EventType, &'static str, String)> {
    match status.phase {
        RestorePhase::New => None,
        RestorePhase::InProgress => Some((
            EventType::Normal,
            reasons::RESTORE_STARTED,
            "Restore started".to_string(),
        )),
        RestorePhase::Completed => Some((
            EventType::Normal,
            reasons::RESTORE_COMPLETED,
            format!("Restore completed with {} warnings", status.warnings),
        )),
        RestorePhase::PartiallyFailed => Some((
            EventType::Warning,
            reasons::RESTORE_PARTIALLY_FAILED,
            format!(
                "Restore finished with {} errors and {} warnings",
                status.errors, status.warnings
            ),
        )),
        RestorePhase::Failed => Some((
            EventType::Warning,
            reasons::RESTORE_FAILED,
            status
                .failure_reason
                .clone()
                .unwrap_or_else(|| "Restore failed".to_string()),
        )),
        RestorePhase::FailedValidation => Some((
            EventType::Warning,
            reasons::VALIDATION_FAILED,
            status.validation_errors.join("; "),
        )),
    }
}

/// Reconcile a LatticeRestore
#[instrument(skip(restore, ctx), fields(restore = %restore.name_any()))]
pub async fn reconcile(restore: Arc<LatticeRestore>, ctx: Arc<Context>) -> Result<Action, Error> {
    let reference = RestoreRef::from_resource(&restore);
    let key = worker_key(&reference);

    if restore.metadata.deletion_timestamp.is_some() {
        if let Some((_, WorkerState::Running(cancel))) = ctx.workers.remove(&key) {
            info!(restore = %reference, "Restore deleted, cancelling worker");
            cancel.cancel();
        }
        if has_finalizer(&restore) {
            ctx.kube.remove_finalizer(&reference, RESTORE_FINALIZER).await?;
        }
        return Ok(Action::await_change());
    }

    let status = restore.status.clone().unwrap_or_default();
    debug!(restore = %reference, phase = %status.phase, "Reconciling LatticeRestore");

    if !status.phase.is_terminal() {
        if let Some(terminal) = ctx.unpersisted_status(&key) {
            warn!(restore = %reference, phase = %terminal.phase, "Retrying terminal status of finished worker");
            ctx.persist(&reference, &terminal).await?;
            if let Some(mut state) = ctx.workers.get_mut(&key) {
                *state = WorkerState::Finished {
                    status: terminal,
                    persisted: true,
                };
            }
            return Ok(Action::await_change());
        }
    }

    match status.phase {
        RestorePhase::New => {
            let cancel = CancellationToken::new();
            let claimed = match ctx.workers.entry(key.clone()) {
                Entry::Occupied(_) => false,
                Entry::Vacant(slot) => {
                    slot.insert(WorkerState::Running(cancel.clone()));
                    true
                }
            };
            if !claimed {
                debug!(restore = %reference, "Worker already registered");
                return Ok(Action::requeue(Duration::from_secs(
                    REQUEUE_IN_PROGRESS_SECS,
                )));
            }

            if !has_finalizer(&restore) {
                if let Err(e) = ctx.kube.add_finalizer(&reference, RESTORE_FINALIZER).await {
                    ctx.workers.remove(&key);
                    return Err(e);
                }
            }

            info!(restore = %reference, "Starting restore worker");
            spawn_worker(
                ctx.clone(),
                reference,
                key,
                restore.spec.clone(),
                status,
                cancel,
            );
            Ok(Action::requeue(Duration::from_secs(
                REQUEUE_IN_PROGRESS_SECS,
            )))
        }
        RestorePhase::InProgress => {
            if ctx.workers.contains_key(&key) {
                return Ok(Action::requeue(Duration::from_secs(
                    REQUEUE_IN_PROGRESS_SECS,
                )));
            }

            warn!(restore = %reference, "Restore in progress without a worker");
            let lifecycle = RestoreLifecycle::from_status(status);
            lifecycle.fail(INTERRUPTED_REASON, None)?;
            ctx.persist(&reference, &lifecycle.status()).await?;
            metrics::record_restore_finished(RestorePhase::Failed);
            Ok(Action::await_change())
        }
        RestorePhase::FailedValidation
        | RestorePhase::Completed
        | RestorePhase::PartiallyFailed
        | RestorePhase::Failed => {
            ctx.workers.remove(&key);
            if has_finalizer(&restore) {
                ctx.kube.remove_finalizer(&reference, RESTORE_FINALIZER).await?;
            }
            Ok(Action::await_change())
        }
    }
}

/// Run a restore in the background, persisting every status change
fn spawn_worker(
    ctx: Arc<Context>,
    restore: RestoreRef,
    key: String,
    spec: LatticeRestoreSpec,
    status: LatticeRestoreStatus,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let lifecycle = RestoreLifecycle::from_status(status);
        let mut updates = lifecycle.watch();

        let persister = {
            let ctx = ctx.clone();
            let restore = restore.clone();
            tokio::spawn(async move {
                // Only the latest snapshot matters once the worker is done
                let mut persisted = true;
                while updates.changed().await.is_ok() {
                    let snapshot = updates.borrow_and_update().clone();
                    persisted = ctx.persist(&restore, &snapshot).await.is_ok();
                }
                persisted
            })
        };

        let result = ctx.engine.run(&restore, &spec, &lifecycle, &cancel).await;
        let status = lifecycle.status();
        drop(lifecycle);

        let persisted = match persister.await {
            Ok(persisted) => persisted,
            Err(e) => {
                error!(restore = %restore, error = %e, "Status persister did not finish");
                false
            }
        };

        match result {
            Ok(phase) => info!(restore = %restore, phase = %phase, "Restore worker finished"),
            Err(e) => error!(restore = %restore, error = %e, "Restore worker failed"),
        }

        if let Some(mut state) = ctx.workers.get_mut(&key) {
            *state = WorkerState::Finished { status, persisted };
        }
    });
}

/// Log the failure and retry after a fixed delay
pub fn error_policy(restore: Arc<LatticeRestore>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        restore = %restore.name_any(),
        "reconciliation failed"
    );
    Action::requeue(Duration::from_secs(REQUEUE_ERROR_SECS))
}

/// Controller future watching every LatticeRestore in the cluster
pub fn build_controller(client: Client, ctx: Arc<Context>) -> impl Future<Output = ()> + Send {
    let restores: Api<LatticeRestore> = Api::all(client);

    Controller::new(
        restores,
        WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
    )
    .shutdown_on_signal()
    .run(reconcile, error_policy, ctx)
    .for_each(|result| {
        match result {
            Ok(action) => debug!(?action, "Restore reconciliation completed"),
            Err(e) => error!(error = ?e, "Restore reconciliation error"),
        }
        std::future::ready(())
    })
}
