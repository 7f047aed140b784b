//! Restore engine
//!
//! Runs one restore from request to terminal phase: validate and resolve the
//! backup, enter `InProgress`, load the catalog, build the plan, execute it
//! and record the outcome in the [`RestoreLifecycle`].

use std::sync::Arc;

use kube::Client;
use lattice_common::crd::{LatticeRestoreSpec, RestorePhase};
use lattice_common::metrics::{self, RestoreTimer};
use lattice_common::retry::{retry_with_backoff_if, RetryConfig};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::apply::{KubeObjectApplier, ObjectApplier};
use crate::catalog::{BackupCatalog, BackupItem, CatalogError};
use crate::error::RestoreError;
use crate::executor::RestoreExecutor;
use crate::lifecycle::RestoreLifecycle;
use crate::order::ResourcePriorities;
use crate::plan::RestorePlan;
use crate::reference::RestoreRef;
use crate::sink::MessageSink;
use crate::validation::validate_spec;
use crate::volume::VolumeRestorer;

/// Environment variable for [`EngineConfig::max_parallel_namespaces`]
pub const PARALLELISM_ENV: &str = "LATTICE_RESTORE_PARALLELISM";

/// Environment variable for [`EngineConfig::resource_priorities`]
pub const RESOURCE_PRIORITIES_ENV: &str = "LATTICE_RESTORE_RESOURCE_PRIORITIES";

/// Engine tuning
#[derive(Clone, Debug, PartialEq)]
pub struct EngineConfig {
    /// Namespace groups processed concurrently
    pub max_parallel_namespaces: usize,
    /// Resources restored first within each partition
    pub resource_priorities: ResourcePriorities,
    /// Retries for object creation against the target cluster
    pub apply_retry: RetryConfig,
    /// Retries for unavailable backup storage
    pub catalog_retry: RetryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_parallel_namespaces: 1,
            resource_priorities: ResourcePriorities::default(),
            apply_retry: RetryConfig::with_max_attempts(5),
            catalog_retry: RetryConfig::with_max_attempts(3),
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `LATTICE_RESTORE_PARALLELISM` and
    /// `LATTICE_RESTORE_RESOURCE_PRIORITIES`
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(value) = lookup(PARALLELISM_ENV) {
            match value.trim().parse::<usize>() {
                Ok(n) if n > 0 => config.max_parallel_namespaces = n,
                _ => warn!(value = %value, "Ignoring invalid {}", PARALLELISM_ENV),
            }
        }
        if let Some(value) = lookup(RESOURCE_PRIORITIES_ENV) {
            config.resource_priorities = ResourcePriorities::new(value.split(','));
        }

        config
    }

    /// Set the namespace parallelism (minimum 1)
    pub fn with_max_parallel_namespaces(mut self, n: usize) -> Self {
        self.max_parallel_namespaces = n.max(1);
        self
    }

    /// Set the resource priority list
    pub fn with_resource_priorities(mut self, priorities: ResourcePriorities) -> Self {
        self.resource_priorities = priorities;
        self
    }

    /// Set the object creation retry policy
    pub fn with_apply_retry(mut self, retry: RetryConfig) -> Self {
        self.apply_retry = retry;
        self
    }

    /// Set the catalog retry policy
    pub fn with_catalog_retry(mut self, retry: RetryConfig) -> Self {
        self.catalog_retry = retry;
        self
    }
}

/// A validated request with its backup resolved
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedRestore {
    /// The request
    pub spec: LatticeRestoreSpec,
    /// Backup to restore from
    pub backup_name: String,
}

/// Runs restores against one target cluster
pub struct RestoreEngine {
    catalog: Arc<dyn BackupCatalog>,
    executor: RestoreExecutor,
    config: EngineConfig,
}

impl RestoreEngine {
    /// Engine over the given collaborators
    pub fn new(
        catalog: Arc<dyn BackupCatalog>,
        applier: Arc<dyn ObjectApplier>,
        volumes: Arc<dyn VolumeRestorer>,
        sink: Arc<dyn MessageSink>,
        config: EngineConfig,
    ) -> Self {
        let executor = RestoreExecutor::new(applier, volumes, sink)
            .with_max_parallel_namespaces(config.max_parallel_namespaces);
        Self {
            catalog,
            executor,
            config,
        }
    }

    /// Engine creating objects through the Kubernetes API of `client`
    pub fn for_cluster(
        client: Client,
        catalog: Arc<dyn BackupCatalog>,
        volumes: Arc<dyn VolumeRestorer>,
        sink: Arc<dyn MessageSink>,
        config: EngineConfig,
    ) -> Self {
        let applier = Arc::new(KubeObjectApplier::new(client, config.apply_retry.clone()));
        Self::new(catalog, applier, volumes, sink, config)
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The ordered plan for a request over already-loaded backup contents
    pub fn plan(&self, spec: &LatticeRestoreSpec, items: &[BackupItem]) -> RestorePlan {
        RestorePlan::build(spec, items, &self.config.resource_priorities)
    }

    /// Validate the request and resolve the backup it restores from
    ///
    /// Returns `None` after moving the lifecycle to `FailedValidation`.
    pub async fn prepare(
        &self,
        restore: &RestoreRef,
        spec: &LatticeRestoreSpec,
        lifecycle: &RestoreLifecycle,
    ) -> Result<Option<ResolvedRestore>, RestoreError> {
        let mut errors = validate_spec(spec);

        let backup_name = if errors.is_empty() {
            match self.resolve_backup(spec).await {
                Ok(name) => Some(name),
                Err(message) => {
                    errors.push(message);
                    None
                }
            }
        } else {
            None
        };

        match backup_name {
            Some(backup_name) if errors.is_empty() => Ok(Some(ResolvedRestore {
                spec: spec.clone(),
                backup_name,
            })),
            _ => {
                warn!(restore = %restore, errors = ?errors, "Restore request failed validation");
                lifecycle.fail_validation(errors)?;
                metrics::record_restore_finished(RestorePhase::FailedValidation);
                Ok(None)
            }
        }
    }

    async fn resolve_backup(&self, spec: &LatticeRestoreSpec) -> Result<String, String> {
        if !spec.backup_name.is_empty() {
            return Ok(spec.backup_name.clone());
        }

        let schedule = spec.schedule_name.clone();
        let latest = retry_with_backoff_if(
            &self.config.catalog_retry,
            "latest_successful_backup",
            || {
                let catalog = self.catalog.clone();
                let schedule = schedule.clone();
                async move { catalog.latest_successful_backup(&schedule).await }
            },
            CatalogError::is_retryable,
        )
        .await;

        match latest {
            Ok(Some(backup)) => {
                info!(schedule = %schedule, backup = %backup, "Resolved schedule to backup");
                Ok(backup)
            }
            Ok(None) => Err(format!(
                "no successful backup found for schedule {}",
                schedule
            )),
            Err(e) => Err(format!("could not resolve schedule {}: {}", schedule, e)),
        }
    }

    /// Run a resolved restore to its terminal phase
    ///
    /// Fails with [`RestoreError::AlreadyStarted`] if the lifecycle has left
    /// `New`; otherwise every outcome, including a catalog failure or
    /// cancellation, is recorded in the lifecycle and its phase returned.
    #[instrument(skip_all, fields(restore = %restore, backup = %resolved.backup_name, execution_id = %Uuid::new_v4()))]
    pub async fn execute(
        &self,
        restore: &RestoreRef,
        resolved: &ResolvedRestore,
        lifecycle: &RestoreLifecycle,
        cancel: &CancellationToken,
    ) -> Result<RestorePhase, RestoreError> {
        lifecycle.begin()?;
        let timer = RestoreTimer::start();
        info!(restore = %restore, backup = %resolved.backup_name, "Restore started");

        let items = match self.load_items(&resolved.backup_name).await {
            Ok(items) => items,
            Err(e) => {
                warn!(restore = %restore, error = %e, "Could not load backup contents");
                lifecycle.fail(e.to_string(), None)?;
                timer.finish(RestorePhase::Failed);
                return Ok(RestorePhase::Failed);
            }
        };

        let plan = self.plan(&resolved.spec, &items);
        let phase = match self
            .executor
            .execute(
                restore,
                &plan.sequence,
                resolved.spec.restore_pvs_enabled(),
                cancel,
            )
            .await
        {
            Ok(report) => lifecycle.complete(&report)?,
            Err(aborted) => {
                lifecycle.fail(aborted.error.to_string(), Some(&aborted.partial))?;
                RestorePhase::Failed
            }
        };

        let status = lifecycle.status();
        info!(
            restore = %restore,
            phase = %phase,
            warnings = status.warnings,
            errors = status.errors,
            "Restore finished"
        );
        timer.finish(phase);
        Ok(phase)
    }

    async fn load_items(&self, backup: &str) -> Result<Vec<BackupItem>, RestoreError> {
        retry_with_backoff_if(
            &self.config.catalog_retry,
            "load_items",
            || {
                let catalog = self.catalog.clone();
                let backup = backup.to_string();
                async move { catalog.load_items(&backup).await }
            },
            CatalogError::is_retryable,
        )
        .await
        .map_err(|source| RestoreError::Catalog {
            backup: backup.to_string(),
            source,
        })
    }

    /// Validate, resolve and execute
    pub async fn run(
        &self,
        restore: &RestoreRef,
        spec: &LatticeRestoreSpec,
        lifecycle: &RestoreLifecycle,
        cancel: &CancellationToken,
    ) -> Result<RestorePhase, RestoreError> {
        match self.prepare(restore, spec, lifecycle).await? {
            Some(resolved) => self.execute(restore, &resolved, lifecycle, cancel).await,
            None => Ok(lifecycle.phase()),
        }
    }
}
