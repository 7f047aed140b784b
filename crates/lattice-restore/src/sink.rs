//! Where per-item warning and error messages go
//!
//! The restore status only counts warnings and errors; the messages are
//! handed to a [`MessageSink`]. Recording never fails the restore.

use std::sync::Arc;

use async_trait::async_trait;
use kube::runtime::events::EventType;
use lattice_common::events::{actions, reasons, EventPublisher};
use tracing::{error, warn};

use crate::reference::RestoreRef;

#[cfg(test)]
use mockall::automock;

/// Message severity
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    /// Counted in `status.warnings`
    Warning,
    /// Counted in `status.errors`
    Error,
}

/// Fire-and-forget message recorder
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Record one message against a restore
    async fn record(&self, restore: &RestoreRef, severity: Severity, text: String);
}

/// Publishes messages as Kubernetes Events on the LatticeRestore
pub struct EventMessageSink {
    publisher: Arc<dyn EventPublisher>,
}

impl EventMessageSink {
    /// Sink over an event publisher
    pub fn new(publisher: Arc<dyn EventPublisher>) -> Self {
        Self { publisher }
    }
}

#[async_trait]
impl MessageSink for EventMessageSink {
    async fn record(&self, restore: &RestoreRef, severity: Severity, text: String) {
        let reason = match severity {
            Severity::Warning => reasons::ITEM_WARNING,
            Severity::Error => reasons::ITEM_FAILED,
        };
        self.publisher
            .publish(
                &restore.object_reference(),
                EventType::Warning,
                reason,
                actions::RESTORE,
                Some(text),
            )
            .await;
    }
}

/// Writes messages to the log
pub struct TracingMessageSink;

#[async_trait]
impl MessageSink for TracingMessageSink {
    async fn record(&self, restore: &RestoreRef, severity: Severity, text: String) {
        match severity {
            Severity::Warning => warn!(restore = %restore, message = %text, "Restore warning"),
            Severity::Error => error!(restore = %restore, message = %text, "Restore error"),
        }
    }
}
