//! Error types for reconciliation and the resource store.

use cstor_engine::EngineError;
use thiserror::Error;

/// Failures talking to the control plane.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Why a reconcile did not complete.
#[derive(Error, Debug)]
pub enum ReconcileError {
    /// The resource failed its structural validator. Never retried.
    #[error("Invalid spec: {0}")]
    InvalidSpec(String),

    /// An external tool exited non-zero or could not start.
    #[error("Tool failure: {0}")]
    ToolFailure(String),

    /// Socket or filesystem trouble.
    #[error("Transient I/O failure: {0}")]
    TransientIo(String),

    /// No pool became active within the polling budget.
    #[error("No pool available after {attempts} attempts")]
    PoolUnavailable { attempts: u32 },

    /// The resource is gone from the canonical store.
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The reconciler panicked; the worker caught it.
    #[error("Reconcile panicked: {0}")]
    Panicked(String),
}

impl ReconcileError {
    /// Whether the work queue should re-add the item with back-off.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ReconcileError::InvalidSpec(_) | ReconcileError::NotFound(_))
    }
}

impl From<EngineError> for ReconcileError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::InvalidSpec(msg) => ReconcileError::InvalidSpec(msg),
            e @ (EngineError::ToolFailure { .. } | EngineError::Spawn { .. }) => {
                ReconcileError::ToolFailure(e.to_string())
            }
            e => ReconcileError::TransientIo(e.to_string()),
        }
    }
}
