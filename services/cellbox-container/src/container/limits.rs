//! Resource limits.

use std::str::FromStr;
use std::sync::Arc;

use tracing::{debug, error, instrument};

use super::{LinuxContainer, OOM_EVENT, read, write};
use crate::error::{ContainerError, Result};
use crate::spec::{BandwidthLimits, CpuLimits, DiskLimits, MemoryLimits};

const MEMORY_LIMIT: &str = "memory.limit_in_bytes";
const MEMSW_LIMIT: &str = "memory.memsw.limit_in_bytes";
const CPU_SHARES: &str = "cpu.shares";

impl LinuxContainer {
    /// Caps the container's memory and starts watching for OOM kills.
    ///
    /// The swap limit must never drop below the memory limit, and the memory
    /// limit must be raised before the swap limit can be. Writing the memory
    /// limit on both sides of the swap write satisfies both rules whether the
    /// limit goes up or down. Hosts without swap accounting reject the swap
    /// write; that is ignored.
    #[instrument(name = "limit-memory", skip(self), fields(handle = %self.handle))]
    pub fn limit_memory(&self, limits: MemoryLimits) -> Result<()> {
        let events = Arc::clone(&self.events);
        self.deps
            .oom_watcher
            .watch(Box::new(move || {
                write(&events).push(OOM_EVENT.to_string());
            }))
            .map_err(|e| {
                error!(error = %e, "oom-watch-failed");
                ContainerError::collaborator("watch for out of memory", e)
            })?;

        let limit = limits.limit_in_bytes.to_string();
        let cgroups = &self.deps.cgroups;
        if let Err(e) = cgroups.set("memory", MEMORY_LIMIT, &limit) {
            debug!(error = %e, "first memory limit write rejected");
        }
        if let Err(e) = cgroups.set("memory", MEMSW_LIMIT, &limit) {
            debug!(error = %e, "swap limit not applied");
        }
        cgroups.set("memory", MEMORY_LIMIT, &limit).map_err(|e| {
            error!(error = %e, "set-memory-limit-failed");
            ContainerError::collaborator("set memory limit", e)
        })?;

        *write(&self.memory) = Some(limits);
        Ok(())
    }

    /// Reads the memory limit in force.
    pub fn current_memory_limits(&self) -> Result<MemoryLimits> {
        let limit_in_bytes = self.read_cgroup("memory", MEMORY_LIMIT)?;
        Ok(MemoryLimits { limit_in_bytes })
    }

    /// Sets the container's CPU weight.
    #[instrument(name = "limit-cpu", skip(self), fields(handle = %self.handle))]
    pub fn limit_cpu(&self, limits: CpuLimits) -> Result<()> {
        self.deps
            .cgroups
            .set("cpu", CPU_SHARES, &limits.limit_in_shares.to_string())
            .map_err(|e| ContainerError::collaborator("set cpu shares", e))?;

        *write(&self.cpu) = Some(limits);
        Ok(())
    }

    /// Reads the CPU weight in force.
    pub fn current_cpu_limits(&self) -> Result<CpuLimits> {
        let limit_in_shares = self.read_cgroup("cpu", CPU_SHARES)?;
        Ok(CpuLimits { limit_in_shares })
    }

    /// Shapes the container's network traffic.
    #[instrument(name = "limit-bandwidth", skip(self), fields(handle = %self.handle))]
    pub async fn limit_bandwidth(&self, limits: BandwidthLimits) -> Result<()> {
        self.deps
            .bandwidth
            .set_limits(&limits)
            .await
            .map_err(|e| ContainerError::collaborator("set bandwidth limits", e))?;

        *write(&self.bandwidth) = Some(limits);
        Ok(())
    }

    /// Returns the last bandwidth limits applied.
    pub fn current_bandwidth_limits(&self) -> Option<BandwidthLimits> {
        *read(&self.bandwidth)
    }

    /// Sets disk quotas on the container's root filesystem.
    #[instrument(name = "limit-disk", skip(self), fields(handle = %self.handle))]
    pub async fn limit_disk(&self, limits: DiskLimits) -> Result<()> {
        self.deps
            .quota
            .set_limits(&self.rootfs_path, &limits)
            .await
            .map_err(|e| ContainerError::collaborator("set disk limits", e))?;

        *write(&self.disk) = Some(limits);
        Ok(())
    }

    /// Reads the disk quotas in force.
    pub async fn current_disk_limits(&self) -> Result<DiskLimits> {
        self.deps
            .quota
            .get_limits(&self.rootfs_path)
            .await
            .map_err(|e| ContainerError::collaborator("get disk limits", e))
    }

    fn read_cgroup<T: FromStr>(&self, subsystem: &str, name: &str) -> Result<T> {
        let raw = self
            .deps
            .cgroups
            .get(subsystem, name)
            .map_err(|e| ContainerError::collaborator("read cgroup", e))?;
        raw.trim().parse().map_err(|_| {
            ContainerError::collaborator("read cgroup", format!("{name}: unexpected value {raw:?}"))
        })
    }
}
