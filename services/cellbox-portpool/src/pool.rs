//! Segmented port pool.

use std::collections::VecDeque;
use std::ops::Range;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::error::{PortPoolError, Result};
use crate::state::{GroupState, PoolState};

/// Highest port number the pool may manage.
pub const MAX_PORT: u32 = 65535;

/// Port pool split into equally sized groups.
///
/// Each group owns the sub-range `[start + i * group_size, start + (i + 1) * group_size)`
/// and keeps its free ports in allocation order. Group boundaries are fixed at
/// construction, so the group a port belongs to depends only on its position
/// in the range, never on allocation history.
#[derive(Debug)]
pub struct PortPool {
    start: u32,
    size: u32,
    group_size: u32,
    /// Free ports per group, head is handed out next.
    groups: Mutex<Vec<VecDeque<u32>>>,
}

impl PortPool {
    /// Creates a pool over `[start, start + size)` split into `groups` groups.
    ///
    /// Each group's free sequence starts at `group_start + offset` taken from
    /// the matching entry in `state` and wraps around at the group boundary.
    /// Groups without a saved entry, or with an offset outside the group,
    /// start from their lowest port.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the range runs past [`MAX_PORT`],
    /// if `size` or `groups` is zero, or if `size` is not a multiple of `groups`.
    pub fn new(start: u32, size: u32, groups: u32, state: &PoolState) -> Result<Self> {
        if start.checked_add(size).map_or(true, |end| end > MAX_PORT) {
            return Err(PortPoolError::config(format!(
                "invalid port range: start {start}, size {size}"
            )));
        }
        if size == 0 || groups == 0 {
            return Err(PortPoolError::config(format!(
                "invalid port pool shape: size {size}, groups {groups}"
            )));
        }
        if size % groups != 0 {
            return Err(PortPoolError::config(format!(
                "port range size {size} is not divisible into {groups} groups"
            )));
        }

        let group_size = size / groups;
        let queues = (0..groups)
            .map(|i| {
                let saved = state.group(i as usize).unwrap_or_default();
                fill(start + i * group_size, group_size, saved)
            })
            .collect();

        debug!(start, size, groups, "port pool created");

        Ok(Self {
            start,
            size,
            group_size,
            groups: Mutex::new(queues),
        })
    }

    /// Returns the first port of the managed range.
    #[must_use]
    pub const fn start(&self) -> u32 {
        self.start
    }

    /// Returns the number of ports in the managed range.
    #[must_use]
    pub const fn size(&self) -> u32 {
        self.size
    }

    /// Returns the number of groups.
    #[must_use]
    pub const fn group_count(&self) -> usize {
        (self.size / self.group_size) as usize
    }

    /// Returns the port range owned by `group`, or `None` if it does not exist.
    #[must_use]
    pub fn group_range(&self, group: usize) -> Option<Range<u32>> {
        if group >= self.group_count() {
            return None;
        }
        let lo = self.start + group as u32 * self.group_size;
        Some(lo..lo + self.group_size)
    }

    /// Returns how many ports `group` still has free.
    #[must_use]
    pub fn available(&self, group: usize) -> usize {
        self.lock().get(group).map_or(0, VecDeque::len)
    }

    /// Takes the next free port from `group`.
    ///
    /// # Errors
    ///
    /// Returns [`PortPoolError::InvalidGroup`] for an unknown group and
    /// [`PortPoolError::Exhausted`] if the group has no free port left.
    pub fn acquire(&self, group: usize) -> Result<u32> {
        let mut groups = self.lock();
        let count = groups.len();
        let queue = groups.get_mut(group).ok_or(PortPoolError::InvalidGroup {
            index: group,
            groups: count,
        })?;

        let port = queue
            .pop_front()
            .ok_or(PortPoolError::Exhausted { group })?;
        debug!(port, group, "port acquired");
        Ok(port)
    }

    /// Marks a specific port as unavailable.
    ///
    /// Used when a port is known to be in use outside the pool's own
    /// bookkeeping, for example by a container restored after a restart.
    ///
    /// # Errors
    ///
    /// Returns [`PortPoolError::PortTaken`] if the port is not free in any group.
    pub fn remove(&self, port: u32) -> Result<()> {
        let mut groups = self.lock();
        for queue in groups.iter_mut() {
            if let Some(idx) = queue.iter().position(|&p| p == port) {
                queue.remove(idx);
                debug!(port, "port removed from pool");
                return Ok(());
            }
        }
        Err(PortPoolError::PortTaken(port))
    }

    /// Returns a port to the tail of the group that owns it.
    ///
    /// Ports outside the managed range and ports that are already free are
    /// ignored, so releasing twice is harmless.
    pub fn release(&self, port: u32) {
        let Some(group) = self.owner(port) else {
            return;
        };

        let mut groups = self.lock();
        if groups.iter().any(|queue| queue.contains(&port)) {
            return;
        }
        groups[group].push_back(port);
        debug!(port, group, "port released");
    }

    /// Captures the allocation cursor of every group.
    ///
    /// The offset of a group is the distance of its next free port from the
    /// group's first port. A group with no free ports records offset 0.
    #[must_use]
    pub fn refresh_state(&self) -> PoolState {
        let groups = self.lock();
        groups
            .iter()
            .enumerate()
            .map(|(i, queue)| {
                let group_start = self.start + i as u32 * self.group_size;
                let offset = queue
                    .front()
                    .map(|&head| head - group_start)
                    .filter(|&offset| offset < self.group_size)
                    .unwrap_or(0);
                GroupState { offset }
            })
            .collect()
    }

    /// Returns the group that owns `port`, or `None` if it lies outside the range.
    fn owner(&self, port: u32) -> Option<usize> {
        if port < self.start || port >= self.start + self.size {
            return None;
        }
        Some(((port - self.start) / self.group_size) as usize)
    }

    fn lock(&self) -> MutexGuard<'_, Vec<VecDeque<u32>>> {
        // Every mutation is a single push/pop/remove, so a poisoned guard
        // still holds a consistent set of queues.
        self.groups.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Builds the free sequence of one group, rotated to start at the saved offset.
fn fill(group_start: u32, group_size: u32, saved: GroupState) -> VecDeque<u32> {
    let offset = if saved.offset >= group_size {
        0
    } else {
        saved.offset
    };

    let group_end = group_start + group_size;
    (group_start + offset..group_end)
        .chain(group_start..group_start + offset)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh(start: u32, size: u32, groups: u32) -> PortPool {
        PortPool::new(start, size, groups, &PoolState::default()).unwrap()
    }

    #[test]
    fn test_group_ranges() {
        let pool = fresh(1000, 100, 2);
        assert_eq!(pool.group_count(), 2);
        assert_eq!(pool.group_range(0), Some(1000..1050));
        assert_eq!(pool.group_range(1), Some(1050..1100));
        assert_eq!(pool.group_range(2), None);
    }

    #[test]
    fn test_first_acquire_returns_group_start() {
        let pool = fresh(1000, 100, 2);
        assert_eq!(pool.acquire(0).unwrap(), 1000);
        assert_eq!(pool.acquire(1).unwrap(), 1050);
    }

    #[test]
    fn test_released_port_goes_to_tail() {
        let pool = fresh(1000, 100, 2);
        assert_eq!(pool.acquire(0).unwrap(), 1000);
        pool.release(1000);

        for expected in 1001..1050 {
            assert_eq!(pool.acquire(0).unwrap(), expected);
        }
        // Only after the group cycles does the released port come back.
        assert_eq!(pool.acquire(0).unwrap(), 1000);
    }

    #[test]
    fn test_group_exhaustion() {
        let pool = fresh(2000, 10, 2);
        let ports: Vec<u32> = (0..5).map(|_| pool.acquire(1).unwrap()).collect();
        assert_eq!(ports, vec![2005, 2006, 2007, 2008, 2009]);

        let err = pool.acquire(1).unwrap_err();
        assert!(matches!(err, PortPoolError::Exhausted { group: 1 }));

        // The other group is unaffected.
        assert_eq!(pool.acquire(0).unwrap(), 2000);
    }

    #[test]
    fn test_invalid_group_is_an_error() {
        let pool = fresh(1000, 100, 2);
        let err = pool.acquire(2).unwrap_err();
        assert!(matches!(
            err,
            PortPoolError::InvalidGroup {
                index: 2,
                groups: 2
            }
        ));
        assert_eq!(pool.available(0), 50);
    }

    #[test]
    fn test_double_release_is_idempotent() {
        let pool = fresh(1000, 10, 1);
        let port = pool.acquire(0).unwrap();
        pool.release(port);
        pool.release(port);
        assert_eq!(pool.available(0), 10);

        let drained: Vec<u32> = (0..10).map(|_| pool.acquire(0).unwrap()).collect();
        assert_eq!(drained.iter().filter(|&&p| p == port).count(), 1);
    }

    #[test]
    fn test_release_of_free_port_is_noop() {
        let pool = fresh(1000, 10, 1);
        pool.release(1005);
        assert_eq!(pool.available(0), 10);
    }

    #[test]
    fn test_release_outside_range_is_ignored() {
        let pool = fresh(1000, 10, 2);
        pool.release(999);
        pool.release(1010);
        assert_eq!(pool.available(0), 5);
        assert_eq!(pool.available(1), 5);
    }

    #[test]
    fn test_release_returns_port_to_owning_group() {
        let pool = fresh(1000, 100, 2);
        let port = pool.acquire(1).unwrap();
        assert_eq!(pool.available(1), 49);
        pool.release(port);
        assert_eq!(pool.available(0), 50);
        assert_eq!(pool.available(1), 50);
    }

    #[test]
    fn test_remove_free_port() {
        let pool = fresh(1000, 100, 2);
        pool.remove(1060).unwrap();
        assert_eq!(pool.available(1), 49);

        let drained: Vec<u32> = (0..49).map(|_| pool.acquire(1).unwrap()).collect();
        assert!(!drained.contains(&1060));
    }

    #[test]
    fn test_remove_taken_port_fails() {
        let pool = fresh(1000, 100, 2);
        let port = pool.acquire(0).unwrap();
        let err = pool.remove(port).unwrap_err();
        assert!(matches!(err, PortPoolError::PortTaken(p) if p == port));

        let err = pool.remove(5000).unwrap_err();
        assert!(err.is_port_taken());
    }

    #[test]
    fn test_saved_offset_rotates_group() {
        let state: PoolState = vec![GroupState { offset: 3 }, GroupState { offset: 0 }]
            .into_iter()
            .collect();
        let pool = PortPool::new(1000, 10, 2, &state).unwrap();

        let ports: Vec<u32> = (0..5).map(|_| pool.acquire(0).unwrap()).collect();
        assert_eq!(ports, vec![1003, 1004, 1000, 1001, 1002]);
    }

    #[test]
    fn test_out_of_range_offset_resets() {
        let state: PoolState = std::iter::once(GroupState { offset: 50 }).collect();
        let pool = PortPool::new(1000, 10, 1, &state).unwrap();
        assert_eq!(pool.acquire(0).unwrap(), 1000);
    }

    #[test]
    fn test_refresh_state_tracks_heads() {
        let pool = fresh(1000, 100, 2);
        for _ in 0..3 {
            pool.acquire(0).unwrap();
        }
        pool.acquire(1).unwrap();

        let state = pool.refresh_state();
        assert_eq!(state.len(), 2);
        assert_eq!(state.group(0), Some(GroupState { offset: 3 }));
        assert_eq!(state.group(1), Some(GroupState { offset: 1 }));
    }

    #[test]
    fn test_refresh_state_empty_group_resets() {
        let pool = fresh(1000, 4, 2);
        pool.acquire(0).unwrap();
        pool.acquire(0).unwrap();

        let state = pool.refresh_state();
        assert_eq!(state.group(0), Some(GroupState { offset: 0 }));
    }

    #[test]
    fn test_rejects_bad_configuration() {
        let empty = PoolState::default();
        assert!(PortPool::new(65000, 1000, 1, &empty).is_err());
        assert!(PortPool::new(1000, 100, 3, &empty).is_err());
        assert!(PortPool::new(1000, 100, 0, &empty).is_err());
        assert!(PortPool::new(1000, 0, 1, &empty).is_err());
        assert!(PortPool::new(u32::MAX, 2, 1, &empty).is_err());
    }
}
