//! Creating restored objects in the target cluster

use async_trait::async_trait;
use kube::api::{Api, DynamicObject, PostParams};
use kube::Client;
use lattice_common::kube_utils::{self, build_api_resource};
use lattice_common::retry::{retry_with_backoff_if, RetryConfig};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::reference::RestoreRef;
use crate::rewrite::RestoreItem;

#[cfg(test)]
use mockall::automock;

/// Field manager used for namespaces created on behalf of a restore
pub const FIELD_MANAGER: &str = "lattice-restore-controller";

/// Result of applying one object
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Object was created
    Applied,
    /// Object was not created but the restore can continue (e.g. already exists)
    Warning(String),
}

/// Failure applying one object
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplyError {
    /// This object failed; the restore continues
    #[error("{0}")]
    Item(String),

    /// The target cluster cannot be written to; the restore stops
    #[error("{0}")]
    Structural(String),
}

/// Writes objects into the target cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ObjectApplier: Send + Sync {
    /// Create one rewritten item
    async fn apply_object(
        &self,
        restore: &RestoreRef,
        item: &RestoreItem,
    ) -> Result<ApplyOutcome, ApplyError>;

    /// Make sure a target namespace exists
    async fn ensure_namespace(&self, name: &str) -> Result<(), ApplyError>;
}

/// [`ObjectApplier`] backed by the dynamic Kubernetes API
pub struct KubeObjectApplier {
    client: Client,
    retry: RetryConfig,
}

impl KubeObjectApplier {
    /// Applier retrying transient API failures per `retry`
    pub fn new(client: Client, retry: RetryConfig) -> Self {
        Self { client, retry }
    }

    fn api_for(&self, item: &RestoreItem) -> Api<DynamicObject> {
        let ar = build_api_resource(
            &item.source.api_version,
            &item.source.kind,
            item.source.plural(),
        );
        match &item.target_namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
            None => Api::all_with(self.client.clone(), &ar),
        }
    }

    /// Describe how an existing object relates to the backed-up one
    async fn existing_warning(
        &self,
        api: &Api<DynamicObject>,
        item: &RestoreItem,
        desired: &DynamicObject,
    ) -> ApplyOutcome {
        let shown = item.display();
        match api.get(&item.target_name).await {
            Ok(existing) => {
                if content_matches(&desired.data, &existing.data) {
                    ApplyOutcome::Warning(format!("{} already exists", shown))
                } else {
                    ApplyOutcome::Warning(format!(
                        "{} already exists and differs from the backed-up version",
                        shown
                    ))
                }
            }
            Err(e) => {
                debug!(item = %shown, error = %e, "Could not read existing object");
                ApplyOutcome::Warning(format!("{} already exists", shown))
            }
        }
    }
}

#[async_trait]
impl ObjectApplier for KubeObjectApplier {
    async fn apply_object(
        &self,
        restore: &RestoreRef,
        item: &RestoreItem,
    ) -> Result<ApplyOutcome, ApplyError> {
        let obj: DynamicObject = serde_json::from_value(item.manifest(&restore.name)).map_err(|e| {
            ApplyError::Item(format!("{}: invalid manifest: {}", item.display(), e))
        })?;
        let api = self.api_for(item);

        let created = retry_with_backoff_if(
            &self.retry,
            "create_object",
            || {
                let api = api.clone();
                let obj = obj.clone();
                async move { api.create(&PostParams::default(), &obj).await }
            },
            is_transient,
        )
        .await;

        match created {
            Ok(_) => {
                debug!(restore = %restore, item = %item.display(), "Created object");
                Ok(ApplyOutcome::Applied)
            }
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                Ok(self.existing_warning(&api, item, &obj).await)
            }
            Err(e) => Err(classify(&item.display(), e)),
        }
    }

    async fn ensure_namespace(&self, name: &str) -> Result<(), ApplyError> {
        retry_with_backoff_if(
            &self.retry,
            "ensure_namespace",
            || {
                let client = self.client.clone();
                let name = name.to_string();
                async move { kube_utils::ensure_namespace(&client, &name, FIELD_MANAGER).await }
            },
            is_transient,
        )
        .await
        .map_err(|e| classify(&format!("namespaces/{}", name), e))
    }
}

/// Server errors and throttling are retried; so are transport failures
fn is_transient(err: &kube::Error) -> bool {
    match err {
        kube::Error::Api(ae) => ae.code >= 500 || ae.code == 429,
        kube::Error::SerdeError(_) | kube::Error::BuildRequest(_) => false,
        _ => true,
    }
}

/// Map a final API failure onto the item/structural split
fn classify(display: &str, err: kube::Error) -> ApplyError {
    match err {
        kube::Error::Api(ae) if ae.code == 401 || ae.code == 403 => ApplyError::Structural(
            format!("not permitted to create {}: {}", display, ae.message),
        ),
        kube::Error::Api(ae) => ApplyError::Item(format!("{}: {}", display, ae.message)),
        kube::Error::SerdeError(e) => ApplyError::Item(format!("{}: {}", display, e)),
        other => ApplyError::Structural(format!(
            "target cluster unreachable while creating {}: {}",
            display, other
        )),
    }
}

/// Whether every top-level content field of `desired` other than status
/// equals the same field of `existing`
fn content_matches(desired: &Value, existing: &Value) -> bool {
    let Some(desired) = desired.as_object() else {
        return false;
    };
    desired
        .iter()
        .filter(|(k, _)| !matches!(k.as_str(), "metadata" | "status" | "apiVersion" | "kind"))
        .all(|(k, v)| existing.get(k) == Some(v))
}
