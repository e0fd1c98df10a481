//! Error types for port pool operations.

use cellbox_error::CommonError;
use thiserror::Error;

/// Result type alias for port pool operations.
pub type Result<T> = std::result::Result<T, PortPoolError>;

/// Errors that can occur during port pool operations.
#[derive(Debug, Error)]
pub enum PortPoolError {
    /// Common errors (I/O, invalid configuration).
    #[error(transparent)]
    Common(#[from] CommonError),

    /// No free port is left in the requested group.
    #[error("port pool is exhausted (group {group})")]
    Exhausted {
        /// Group that ran dry.
        group: usize,
    },

    /// The port is not currently free in any group.
    #[error("port already acquired: {0}")]
    PortTaken(u32),

    /// The requested group does not exist.
    #[error("invalid port group {index}: pool has {groups} groups")]
    InvalidGroup {
        /// Requested group index.
        index: usize,
        /// Number of groups in the pool.
        groups: usize,
    },

    /// The persisted state file could not be encoded or decoded.
    #[error("state file error: {0}")]
    StateFile(#[from] serde_json::Error),
}

impl From<std::io::Error> for PortPoolError {
    fn from(err: std::io::Error) -> Self {
        Self::Common(CommonError::from(err))
    }
}

impl PortPoolError {
    /// Creates a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Common(CommonError::config(msg))
    }

    /// Returns true if the pool (or one of its groups) is exhausted.
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }

    /// Returns true if the port was not free.
    #[must_use]
    pub const fn is_port_taken(&self) -> bool {
        matches!(self, Self::PortTaken(_))
    }

    /// Returns true if the error came from a missing state file.
    #[must_use]
    pub fn is_state_missing(&self) -> bool {
        matches!(self, Self::Common(e) if e.is_io_not_found())
    }
}
