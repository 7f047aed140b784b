//! Error types for Lattice restore controllers
//!
//! Errors carry the context they came from (controller, status, restore) so
//! that reconcile failures are actionable from logs alone.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for Lattice restore operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "controller", "status", "restore")
        context: String,
    },
}

impl Error {
    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kube_errors_convert() {
        let err: Error = kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "boom".to_string(),
            reason: "Test".to_string(),
            code: 503,
        })
        .into();
        assert!(matches!(err, Error::Kube { .. }));
        assert!(err.to_string().starts_with("kubernetes error: "));
    }

    #[test]
    fn internal_error_context() {
        let err = Error::internal_with_context("status", "patch failed");
        assert_eq!(err.to_string(), "internal error [status]: patch failed");

        let err = Error::internal("boom");
        assert_eq!(err.to_string(), "internal error [unknown]: boom");
    }
}
