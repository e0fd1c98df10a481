//! Container lifecycle state.

use serde::{Deserialize, Serialize};

/// Container state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    /// Container object exists but has not been started.
    #[default]
    Born,
    /// Networking is in place and the namespace host process is running.
    Active,
    /// Container has been stopped.
    Stopped,
}

impl ContainerState {
    /// Returns the string representation of the state.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Born => "born",
            Self::Active => "active",
            Self::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for ContainerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
