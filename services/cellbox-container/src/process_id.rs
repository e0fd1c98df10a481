//! Process identifier allocation.

use std::sync::{Mutex, PoisonError};

use cellbox_error::CommonError;

use crate::error::Result;

/// Monotonic source of process identifiers within one container.
///
/// Identifiers are never recycled. After a restart the floor is raised past
/// every identifier that is still tracked, so new processes never collide
/// with restored ones.
#[derive(Debug, Default)]
pub struct ProcessIdPool {
    current: Mutex<u32>,
}

impl ProcessIdPool {
    /// Creates a pool whose first identifier is 1.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next identifier.
    ///
    /// Fails once `u32::MAX` has been issued or restored; the counter is left
    /// at its maximum.
    pub fn next(&self) -> Result<u32> {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        *current = current
            .checked_add(1)
            .ok_or_else(|| CommonError::internal("process identifiers exhausted"))?;
        Ok(*current)
    }

    /// Raises the floor to `id` if it is above the current value.
    pub fn restore(&self, id: u32) {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if id > *current {
            *current = id;
        }
    }

    /// Returns the most recently issued (or restored) identifier.
    #[must_use]
    pub fn current(&self) -> u32 {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
