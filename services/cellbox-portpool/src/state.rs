//! Persisted rotation state of a port pool.
//!
//! The state file is a JSON array with one record per group:
//!
//! ```json
//! [{"offset": 17}, {"offset": 0}]
//! ```
//!
//! The pool never writes this file itself. Callers capture the state with
//! [`PortPool::refresh_state`](crate::PortPool::refresh_state) and save it on
//! their own cadence.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;

/// Allocation cursor of a single group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupState {
    /// Distance of the group's next free port from the group's first port.
    pub offset: u32,
}

/// Allocation cursors of every group, in group order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PoolState {
    groups: Vec<GroupState>,
}

impl PoolState {
    /// Returns the saved cursor for `group`, if one was recorded.
    #[must_use]
    pub fn group(&self, group: usize) -> Option<GroupState> {
        self.groups.get(group).copied()
    }

    /// Returns the number of recorded groups.
    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Returns true if no group was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

impl FromIterator<GroupState> for PoolState {
    fn from_iter<I: IntoIterator<Item = GroupState>>(iter: I) -> Self {
        Self {
            groups: iter.into_iter().collect(),
        }
    }
}

/// Loads the pool state from `path`.
///
/// # Errors
///
/// Returns an I/O error if the file cannot be read (use
/// [`PortPoolError::is_state_missing`](crate::PortPoolError::is_state_missing)
/// to tell a missing file apart) and a state file error if it is not valid JSON.
pub fn load_state(path: impl AsRef<Path>) -> Result<PoolState> {
    let path = path.as_ref();
    let json = std::fs::read_to_string(path)?;
    let state: PoolState = serde_json::from_str(&json)?;
    debug!(path = %path.display(), groups = state.len(), "port pool state loaded");
    Ok(state)
}

/// Writes the pool state to `path`, replacing any previous file.
///
/// # Errors
///
/// Returns an error if the state cannot be encoded or the file cannot be written.
pub fn save_state(path: impl AsRef<Path>, state: &PoolState) -> Result<()> {
    let path = path.as_ref();
    let json = serde_json::to_string(state)?;
    std::fs::write(path, json)?;
    debug!(path = %path.display(), groups = state.len(), "port pool state saved");
    Ok(())
}
