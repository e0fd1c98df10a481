//! Container specification.
//!
//! [`ContainerSpec`] is what the orchestrator hands to
//! [`LinuxContainer::new`](crate::LinuxContainer::new). Identity and paths are
//! fixed for the container's lifetime; everything else is copied into the
//! container's lock-guarded facets at construction.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};

use crate::state::ContainerState;

/// Opaque string metadata attached to a container.
pub type Properties = HashMap<String, String>;

/// Full specification of a container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Host-unique container ID.
    pub id: String,
    /// Caller-facing handle.
    pub handle: String,
    /// Path of the container's root filesystem.
    pub rootfs_path: PathBuf,
    /// Directory holding the container's helper scripts and runtime files.
    pub container_path: PathBuf,
    /// Time the container may sit idle before the orchestrator reaps it.
    pub grace_time: Duration,
    /// Container format version. `None` marks containers created before
    /// versioning existed.
    #[serde(default)]
    pub version: Option<String>,
    /// Resource limits.
    #[serde(default)]
    pub limits: Limits,
    /// Allocated host resources.
    pub resources: Resources,
    /// Environment, as `KEY=value` strings.
    #[serde(default)]
    pub env: Vec<String>,
    /// Container properties.
    #[serde(default)]
    pub properties: Properties,
    /// Inbound port mappings, in the order they were created.
    #[serde(default)]
    pub net_ins: Vec<NetInSpec>,
    /// Outbound rules, in the order they were created.
    #[serde(default)]
    pub net_outs: Vec<NetOutRule>,
    /// Event log.
    #[serde(default)]
    pub events: Vec<String>,
    /// Lifecycle state.
    #[serde(default)]
    pub state: ContainerState,
}

impl ContainerSpec {
    /// Creates a spec with empty mutable facets.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        handle: impl Into<String>,
        container_path: impl Into<PathBuf>,
        resources: Resources,
    ) -> Self {
        Self {
            id: id.into(),
            handle: handle.into(),
            rootfs_path: PathBuf::new(),
            container_path: container_path.into(),
            grace_time: Duration::ZERO,
            version: None,
            limits: Limits::default(),
            resources,
            env: Vec::new(),
            properties: Properties::new(),
            net_ins: Vec::new(),
            net_outs: Vec::new(),
            events: Vec::new(),
            state: ContainerState::Born,
        }
    }
}

/// Resource limits. Every limit is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    pub bandwidth: Option<BandwidthLimits>,
    pub cpu: Option<CpuLimits>,
    pub disk: Option<DiskLimits>,
    pub memory: Option<MemoryLimits>,
}

/// Network bandwidth limits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandwidthLimits {
    pub rate_in_bytes_per_second: u64,
    pub burst_rate_in_bytes_per_second: u64,
}

/// CPU limits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuLimits {
    /// Relative CPU weight (`cpu.shares`).
    pub limit_in_shares: u64,
}

/// Whether disk limits count shared image layers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskLimitScope {
    /// Count everything visible in the root filesystem.
    #[default]
    Total,
    /// Count only what the container wrote itself.
    Exclusive,
}

/// Disk quota limits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskLimits {
    pub inode_soft: u64,
    pub inode_hard: u64,
    pub byte_soft: u64,
    pub byte_hard: u64,
    #[serde(default)]
    pub scope: DiskLimitScope,
}

/// Memory limits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryLimits {
    pub limit_in_bytes: u64,
}

/// Container network assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    /// Address of the container inside its subnet.
    pub ip: Ipv4Addr,
    /// Subnet the container lives in.
    pub subnet: Ipv4Network,
}

impl Network {
    /// Returns the host side of the container's subnet (its gateway).
    ///
    /// The gateway is the first address after the subnet's network address.
    #[must_use]
    pub fn gateway(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.subnet.network()).wrapping_add(1))
    }
}

/// Host resources allocated to a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    /// Host UID mapped to root inside the container.
    pub root_uid: u32,
    pub network: Network,
    /// Host bridge the container's veth is attached to.
    pub bridge: String,
    /// Host address external clients reach the container through.
    pub external_ip: Ipv4Addr,
    /// Host ports drawn from the port pool on this container's behalf.
    #[serde(default)]
    pub ports: Vec<u32>,
}

impl Resources {
    /// Creates resources with no reserved ports.
    #[must_use]
    pub fn new(
        root_uid: u32,
        network: Network,
        bridge: impl Into<String>,
        external_ip: Ipv4Addr,
    ) -> Self {
        Self {
            root_uid,
            network,
            bridge: bridge.into(),
            external_ip,
            ports: Vec::new(),
        }
    }

    /// Records a port reserved for this container.
    pub fn add_port(&mut self, port: u32) {
        self.ports.push(port);
    }
}

/// Inbound port mapping from a host port to a container port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetInSpec {
    pub host_port: u32,
    pub container_port: u32,
}

/// Protocol matched by an outbound rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    All,
    Tcp,
    Udp,
    Icmp,
}

/// Inclusive range of IPv4 addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpRange {
    pub start: Ipv4Addr,
    pub end: Ipv4Addr,
}

impl IpRange {
    /// Range covering a single address.
    #[must_use]
    pub const fn single(ip: Ipv4Addr) -> Self {
        Self { start: ip, end: ip }
    }
}

/// Inclusive range of ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    /// Range covering a single port.
    #[must_use]
    pub const fn single(port: u16) -> Self {
        Self {
            start: port,
            end: port,
        }
    }
}

/// ICMP type/code selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IcmpControl {
    #[serde(rename = "type")]
    pub icmp_type: u8,
    pub code: Option<u8>,
}

/// Outbound (egress) allow rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetOutRule {
    #[serde(default)]
    pub protocol: Protocol,
    /// Destination networks. Empty means any destination.
    #[serde(default)]
    pub networks: Vec<IpRange>,
    /// Destination ports. Only meaningful for TCP and UDP.
    #[serde(default)]
    pub ports: Vec<PortRange>,
    /// ICMP selector. Only meaningful for ICMP.
    #[serde(default)]
    pub icmps: Option<IcmpControl>,
    /// Log new connections matching this rule.
    #[serde(default)]
    pub log: bool,
}
