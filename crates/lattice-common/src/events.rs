//! Kubernetes Event recording for restore controllers.
//!
//! Restore warnings and errors are counted in the LatticeRestore status, while
//! the messages themselves are published as Kubernetes Events on the restore
//! object so they show up in `kubectl describe latticerestore`.
//!
//! Publishing is fire-and-forget: a failed event is logged and dropped and
//! never fails the restore.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Kubernetes caps event notes at 1KiB
pub const MAX_NOTE_LEN: usize = 1024;

/// Publishes Kubernetes Events.
///
/// Implementations never return an error from `publish()`.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a Kubernetes Event on the given resource.
    ///
    /// * `resource_ref` - The object this event is about
    /// * `type_` - Normal or Warning
    /// * `reason` - Machine-readable reason (see [`reasons`])
    /// * `action` - What was being done (see [`actions`])
    /// * `note` - Optional human-readable message
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Publisher backed by `kube::runtime::events::Recorder`.
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Create a publisher reporting as `controller_name`
    /// (e.g. "lattice-restore-controller").
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = kube::runtime::events::Event {
            type_,
            reason: reason.to_string(),
            note: note.map(truncate_note),
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(
                reason,
                action,
                error = %e,
                "Failed to publish Kubernetes event"
            );
        }
    }
}

/// Publisher that drops everything.
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// Cut a note down to [`MAX_NOTE_LEN`] bytes on a char boundary
pub fn truncate_note(mut note: String) -> String {
    if note.len() <= MAX_NOTE_LEN {
        return note;
    }
    let mut end = MAX_NOTE_LEN;
    while !note.is_char_boundary(end) {
        end -= 1;
    }
    note.truncate(end);
    note
}

/// Well-known event reason strings.
///
/// These appear in `kubectl get events` under the REASON column.
pub mod reasons {
    /// Restore request failed validation
    pub const VALIDATION_FAILED: &str = "ValidationFailed";
    /// Restore execution started
    pub const RESTORE_STARTED: &str = "RestoreStarted";
    /// Restore finished without errors
    pub const RESTORE_COMPLETED: &str = "RestoreCompleted";
    /// Restore finished with item or volume errors
    pub const RESTORE_PARTIALLY_FAILED: &str = "RestorePartiallyFailed";
    /// Restore could not execute
    pub const RESTORE_FAILED: &str = "RestoreFailed";
    /// A single item produced a warning
    pub const ITEM_WARNING: &str = "ItemWarning";
    /// A single item or volume failed
    pub const ITEM_FAILED: &str = "ItemFailed";
}

/// Well-known event action strings.
///
/// These appear in `kubectl get events` under the ACTION column.
pub mod actions {
    /// Standard reconciliation loop
    pub const RECONCILE: &str = "Reconcile";
    /// Validating the restore request
    pub const VALIDATE: &str = "Validate";
    /// Recreating backed-up objects
    pub const RESTORE: &str = "Restore";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_publisher_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<NoopEventPublisher>();
    }

    #[test]
    fn reason_constants_are_pascal_case() {
        assert_eq!(reasons::RESTORE_COMPLETED, "RestoreCompleted");
        assert_eq!(reasons::ITEM_WARNING, "ItemWarning");
        assert_eq!(actions::RESTORE, "Restore");
    }

    #[test]
    fn short_notes_are_untouched() {
        assert_eq!(truncate_note("configmap already exists".into()), "configmap already exists");
    }

    #[test]
    fn long_notes_are_truncated_on_char_boundary() {
        let note = "é".repeat(MAX_NOTE_LEN);
        let truncated = truncate_note(note);
        assert!(truncated.len() <= MAX_NOTE_LEN);
        assert!(truncated.chars().all(|c| c == 'é'));
    }

    #[tokio::test]
    async fn noop_publisher_does_not_panic() {
        let publisher = NoopEventPublisher;
        publisher
            .publish(
                &ObjectReference::default(),
                EventType::Warning,
                reasons::ITEM_FAILED,
                actions::RESTORE,
                Some("test".to_string()),
            )
            .await;
    }
}
