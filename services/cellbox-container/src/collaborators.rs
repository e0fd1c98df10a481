//! Host collaborators a container drives.
//!
//! Each trait covers one host subsystem the container delegates to. The
//! implementations live with the host process; the container only sees these
//! call boundaries. Failures are reported as plain messages and wrapped by the
//! container with the operation that triggered them.

use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use cellbox_portpool::PortPool;
use ipnetwork::Ipv4Network;

use crate::policy::SpacePolicy;
use crate::runner::CommandRunner;
use crate::signaller::Signaller;
use crate::spec::{BandwidthLimits, DiskLimits, NetOutRule};

/// Host NAT and bridge rules for a container.
#[async_trait]
pub trait IptablesManager: Send + Sync {
    /// Installs the forwarding and NAT chains for a container.
    ///
    /// Must be safe to call again for a container whose chains already exist.
    async fn container_setup(
        &self,
        id: &str,
        bridge: &str,
        ip: Ipv4Addr,
        subnet: Ipv4Network,
    ) -> std::result::Result<(), String>;
}

/// Egress rule installation.
#[async_trait]
pub trait PacketFilter: Send + Sync {
    /// Allows traffic matching `rule` out of the container.
    async fn net_out(&self, rule: &NetOutRule) -> std::result::Result<(), String>;
}

/// Disk quotas keyed by root filesystem path.
#[async_trait]
pub trait QuotaManager: Send + Sync {
    async fn set_limits(&self, rootfs: &Path, limits: &DiskLimits)
        -> std::result::Result<(), String>;

    async fn get_limits(&self, rootfs: &Path) -> std::result::Result<DiskLimits, String>;
}

/// Traffic shaping on the container's host-side interface.
#[async_trait]
pub trait BandwidthManager: Send + Sync {
    async fn set_limits(&self, limits: &BandwidthLimits) -> std::result::Result<(), String>;
}

/// Access to the container's cgroup files.
pub trait CgroupsManager: Send + Sync {
    /// Writes `value` to the file `name` of `subsystem`.
    fn set(&self, subsystem: &str, name: &str, value: &str) -> std::result::Result<(), String>;

    /// Reads the file `name` of `subsystem`.
    fn get(&self, subsystem: &str, name: &str) -> std::result::Result<String, String>;
}

/// Tracks the processes running inside a container.
pub trait ProcessTracker: Send + Sync {
    /// Returns the IDs of processes that are still running.
    fn active_processes(&self) -> Vec<u32>;

    /// Re-attaches to a process that survived a restart.
    fn restore(&self, id: u32, signaller: Signaller);
}

/// Callback fired when the container hits its memory limit.
pub type OomHandler = Box<dyn Fn() + Send + Sync>;

/// Out-of-memory notifications for a container's memory cgroup.
pub trait OomWatcher: Send + Sync {
    /// Starts watching. Calling it again replaces the handler.
    fn watch(&self, handler: OomHandler) -> std::result::Result<(), String>;

    /// Stops watching. A no-op if nothing is being watched.
    fn unwatch(&self);
}

/// Host port allocation.
pub trait PortAllocator: Send + Sync {
    /// Takes the next free port from `group`.
    fn acquire(&self, group: usize) -> cellbox_portpool::Result<u32>;

    /// Marks `port` as in use.
    fn remove(&self, port: u32) -> cellbox_portpool::Result<()>;

    /// Returns `port` to the pool.
    fn release(&self, port: u32);
}

impl PortAllocator for PortPool {
    fn acquire(&self, group: usize) -> cellbox_portpool::Result<u32> {
        Self::acquire(self, group)
    }

    fn remove(&self, port: u32) -> cellbox_portpool::Result<()> {
        Self::remove(self, port)
    }

    fn release(&self, port: u32) {
        Self::release(self, port);
    }
}

/// Everything a container calls out to.
///
/// The port pool and policy client are shared by every container on the
/// host; the rest are usually per container.
#[derive(Clone)]
pub struct Collaborators {
    pub port_pool: Arc<dyn PortAllocator>,
    pub runner: Arc<dyn CommandRunner>,
    pub cgroups: Arc<dyn CgroupsManager>,
    pub quota: Arc<dyn QuotaManager>,
    pub bandwidth: Arc<dyn BandwidthManager>,
    pub process_tracker: Arc<dyn ProcessTracker>,
    pub filter: Arc<dyn PacketFilter>,
    pub iptables: Arc<dyn IptablesManager>,
    pub oom_watcher: Arc<dyn OomWatcher>,
    pub policy: Arc<dyn SpacePolicy>,
}
