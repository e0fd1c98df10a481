//! Error types for container operations.

use cellbox_error::CommonError;
use cellbox_portpool::PortPoolError;
use thiserror::Error;

/// Result type alias for container operations.
pub type Result<T> = std::result::Result<T, ContainerError>;

/// Errors that can occur during container operations.
#[derive(Debug, Error)]
pub enum ContainerError {
    /// Common errors (I/O, configuration, timeout).
    #[error(transparent)]
    Common(#[from] CommonError),

    /// Get or remove of a property that is not set.
    #[error("property does not exist: {0}")]
    UndefinedProperty(String),

    /// Port pool error (exhausted group, taken port, invalid group).
    #[error(transparent)]
    PortPool(#[from] PortPoolError),

    /// A privileged helper script failed to run or exited non-zero.
    #[error("{script} failed: {message}")]
    Script {
        /// Script or helper name.
        script: String,
        /// Exit status and captured output.
        message: String,
    },

    /// Snapshot encoding or decoding failed.
    #[error("snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An injected collaborator reported a failure.
    #[error("{operation} failed: {message}")]
    Collaborator {
        /// Operation that was being performed.
        operation: &'static str,
        /// Message reported by the collaborator.
        message: String,
    },
}

impl From<std::io::Error> for ContainerError {
    fn from(err: std::io::Error) -> Self {
        Self::Common(CommonError::from(err))
    }
}

impl ContainerError {
    /// Creates a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Common(CommonError::config(msg))
    }

    /// Creates a script failure.
    #[must_use]
    pub fn script(script: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Script {
            script: script.into(),
            message: message.into(),
        }
    }

    /// Wraps a collaborator failure with the operation that triggered it.
    #[must_use]
    pub fn collaborator(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Collaborator {
            operation,
            message: message.into(),
        }
    }

    /// Returns true if this is an undefined property error.
    #[must_use]
    pub const fn is_undefined_property(&self) -> bool {
        matches!(self, Self::UndefinedProperty(_))
    }

    /// Returns true if this is a script failure.
    #[must_use]
    pub const fn is_script(&self) -> bool {
        matches!(self, Self::Script { .. })
    }

    /// Returns true if the port pool had no free port for the request.
    #[must_use]
    pub const fn is_pool_exhausted(&self) -> bool {
        matches!(self, Self::PortPool(e) if e.is_exhausted())
    }
}
