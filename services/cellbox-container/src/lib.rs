//! # cellbox-container
//!
//! In-process runtime object for one live Linux container.
//!
//! A [`LinuxContainer`] owns the container's identity, lifecycle state,
//! resource limits, properties and network rules, and drives the privileged
//! helper scripts and host collaborators (iptables, cgroups, quotas, packet
//! filter, process tracker) that make those settings real.
//!
//! The container keeps running when the controlling process restarts. Its
//! state is captured with [`LinuxContainer::snapshot`] and rebuilt with
//! [`LinuxContainer::restore`], which replays every network rule so the host
//! ends up exactly as it was.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                   LinuxContainer                     │
//! │  ┌───────┐ ┌────────┐ ┌──────────┐ ┌──────────────┐  │
//! │  │ state │ │ events │ │properties│ │ net-in / out │  │  one lock
//! │  └───────┘ └────────┘ └──────────┘ └──────────────┘  │  per facet
//! │  ┌────────────────────────────────┐ ┌────────────┐   │
//! │  │  limits: bandwidth/cpu/disk/mem│ │ grace time │   │
//! │  └────────────────────────────────┘ └────────────┘   │
//! └───────┬──────────────┬───────────────┬───────────────┘
//!         ▼              ▼               ▼
//!    port pool     helper scripts   collaborators
//!  (own lock)     start/stop/net.sh  iptables, cgroups, ...
//! ```

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::missing_const_for_fn)]

pub mod collaborators;
pub mod config;
pub mod container;
pub mod error;
pub mod policy;
pub mod process_id;
pub mod runner;
pub mod signaller;
pub mod snapshot;
pub mod spec;
pub mod state;

pub use collaborators::{
    BandwidthManager, CgroupsManager, Collaborators, IptablesManager, OomHandler, OomWatcher,
    PacketFilter, PortAllocator, ProcessTracker, QuotaManager,
};
pub use config::{LoggingConfig, PolicyConfig, PortPoolConfig, RuntimeConfig, ScriptsConfig};
pub use container::{ContainerInfo, LinuxContainer, StreamInSpec, StreamOutSpec};
pub use error::{ContainerError, Result};
pub use policy::{
    EndpointNotifier, FallbackReason, GroupResolution, HttpSpacePolicy, NoopSpacePolicy,
    SpacePolicy,
};
pub use process_id::ProcessIdPool;
pub use runner::{CommandRunner, ProcessRunner, ScriptCommand, ScriptOutput};
pub use signaller::{NamespacedSignaller, Signal, Signaller};
pub use snapshot::{ActiveProcess, ContainerSnapshot};
pub use spec::{
    BandwidthLimits, ContainerSpec, CpuLimits, DiskLimitScope, DiskLimits, IcmpControl, IpRange,
    Limits, MemoryLimits, NetInSpec, NetOutRule, Network, PortRange, Properties, Protocol,
    Resources,
};
pub use state::ContainerState;
