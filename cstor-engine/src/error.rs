//! Error types for the storage engine layer.

use thiserror::Error;

/// Errors that can occur while driving the node's storage tools and
/// the iSCSI target daemon.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The declarative input failed structural validation.
    #[error("Invalid spec: {0}")]
    InvalidSpec(String),

    /// An external tool exited non-zero.
    #[error("`{command}` failed (exit code {code:?}): {output}")]
    ToolFailure {
        command: String,
        code: Option<i32>,
        output: String,
    },

    /// An external tool could not be started at all.
    #[error("Failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Filesystem operation failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Control socket exchange failed or the daemon answered with an error.
    #[error("Control socket error: {0}")]
    Socket(String),

    /// A bounded wait ran out.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Whether the failure may clear up on its own and is worth a retry.
    ///
    /// Everything except a structurally invalid spec is retryable.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, EngineError::InvalidSpec(_))
    }

    /// Whether the failure came from a tool exiting non-zero or failing to start.
    pub fn is_tool_failure(&self) -> bool {
        matches!(self, EngineError::ToolFailure { .. } | EngineError::Spawn { .. })
    }

    pub(crate) fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        EngineError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
