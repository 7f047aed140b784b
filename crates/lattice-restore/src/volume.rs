//! Persistent volume data restore

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

/// Why a claim's volume was not restored
#[derive(Debug, Error, Clone, PartialEq)]
pub enum VolumeRestoreError {
    /// Data could not be written back
    #[error("volume restore failed: {0}")]
    Restore(String),

    /// Data was written but did not verify
    #[error("volume verification failed: {0}")]
    Verify(String),
}

/// Restores the data behind a PersistentVolumeClaim
#[cfg_attr(test, automock)]
#[async_trait]
pub trait VolumeRestorer: Send + Sync {
    /// Restore and verify the volume bound to `claim`
    async fn restore_volume(&self, claim: &ObjectReference) -> Result<(), VolumeRestoreError>;
}
