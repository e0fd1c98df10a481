//! The container runtime object.
//!
//! Every mutable facet of a [`LinuxContainer`] sits behind its own lock, so a
//! property write never waits on a net-in and a state read never waits on a
//! snapshot of limits. Operations that need a consistent view of several
//! facets go through [`LinuxContainer::lock_all`], which acquires the locks in
//! one fixed order:
//!
//! grace time, state, events, properties, env, resources, bandwidth, cpu,
//! disk, memory, net-ins, net-outs.
//!
//! No facet lock is held while a helper script or collaborator call is in
//! flight.

mod limits;
mod network;
mod persist;
mod stream;

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, instrument};

use crate::collaborators::Collaborators;
use crate::error::{ContainerError, Result};
use crate::policy::EndpointNotifier;
use crate::process_id::ProcessIdPool;
use crate::runner::{ScriptCommand, ScriptOutput};
use crate::signaller::{DEFAULT_LEGACY_SIGNAL_TIMEOUT, Signaller};
use crate::spec::{
    BandwidthLimits, ContainerSpec, CpuLimits, DiskLimits, Limits, MemoryLimits, NetInSpec,
    NetOutRule, Properties, Resources,
};
use crate::state::ContainerState;

pub use network::{RESERVED_CONTAINER_PORT, SPACE_PROPERTY};
pub use stream::{StreamInSpec, StreamOutSpec};

/// Event recorded when the container hits its memory limit.
pub const OOM_EVENT: &str = "out of memory";

/// Summary of a container for API responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerInfo {
    pub state: ContainerState,
    pub events: Vec<String>,
    pub properties: Properties,
    pub container_path: PathBuf,
    /// IDs of processes still running, as reported by the process tracker.
    pub process_ids: Vec<String>,
    pub mapped_ports: Vec<NetInSpec>,
    pub container_ip: Ipv4Addr,
    /// Host side of the container's subnet.
    pub host_ip: Ipv4Addr,
    pub external_ip: Ipv4Addr,
}

/// One live container.
pub struct LinuxContainer {
    id: String,
    handle: String,
    rootfs_path: PathBuf,
    container_path: PathBuf,
    version: Option<String>,

    grace_time: RwLock<Duration>,
    state: RwLock<ContainerState>,
    /// Shared with the OOM handler.
    events: Arc<RwLock<Vec<String>>>,
    properties: RwLock<Arc<Properties>>,
    env: RwLock<Vec<String>>,
    resources: RwLock<Resources>,
    bandwidth: RwLock<Option<BandwidthLimits>>,
    cpu: RwLock<Option<CpuLimits>>,
    disk: RwLock<Option<DiskLimits>>,
    memory: RwLock<Option<MemoryLimits>>,
    net_ins: RwLock<Vec<NetInSpec>>,
    net_outs: RwLock<Vec<NetOutRule>>,

    signaller: Signaller,
    process_ids: ProcessIdPool,
    deps: Collaborators,
    notifier: EndpointNotifier,
}

/// Read guards over every facet, taken in the fixed order.
struct FacetView<'a> {
    grace_time: RwLockReadGuard<'a, Duration>,
    state: RwLockReadGuard<'a, ContainerState>,
    events: RwLockReadGuard<'a, Vec<String>>,
    properties: RwLockReadGuard<'a, Arc<Properties>>,
    env: RwLockReadGuard<'a, Vec<String>>,
    resources: RwLockReadGuard<'a, Resources>,
    bandwidth: RwLockReadGuard<'a, Option<BandwidthLimits>>,
    cpu: RwLockReadGuard<'a, Option<CpuLimits>>,
    disk: RwLockReadGuard<'a, Option<DiskLimits>>,
    memory: RwLockReadGuard<'a, Option<MemoryLimits>>,
    net_ins: RwLockReadGuard<'a, Vec<NetInSpec>>,
    net_outs: RwLockReadGuard<'a, Vec<NetOutRule>>,
}

impl FacetView<'_> {
    fn limits(&self) -> Limits {
        Limits {
            bandwidth: *self.bandwidth,
            cpu: *self.cpu,
            disk: *self.disk,
            memory: *self.memory,
        }
    }
}

// Facet writes are single assignments or pushes, so a guard poisoned by a
// panicking holder still protects a whole value.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

impl LinuxContainer {
    /// Creates the runtime object for the container described by `spec`.
    ///
    /// Nothing runs on the host until [`start`](Self::start) or
    /// [`restore`](Self::restore) is called.
    #[must_use]
    pub fn new(spec: ContainerSpec, deps: Collaborators) -> Self {
        let signaller = Signaller::for_version(
            spec.version.as_deref(),
            &spec.container_path,
            DEFAULT_LEGACY_SIGNAL_TIMEOUT,
        );
        let notifier = EndpointNotifier::new(Arc::clone(&deps.policy));

        Self {
            id: spec.id,
            handle: spec.handle,
            rootfs_path: spec.rootfs_path,
            version: spec.version,
            grace_time: RwLock::new(spec.grace_time),
            state: RwLock::new(spec.state),
            events: Arc::new(RwLock::new(spec.events)),
            properties: RwLock::new(Arc::new(spec.properties)),
            env: RwLock::new(spec.env),
            resources: RwLock::new(spec.resources),
            bandwidth: RwLock::new(spec.limits.bandwidth),
            cpu: RwLock::new(spec.limits.cpu),
            disk: RwLock::new(spec.limits.disk),
            memory: RwLock::new(spec.limits.memory),
            net_ins: RwLock::new(spec.net_ins),
            net_outs: RwLock::new(spec.net_outs),
            container_path: spec.container_path,
            signaller,
            process_ids: ProcessIdPool::new(),
            deps,
            notifier,
        }
    }

    /// Sets the bound on legacy signal delivery.
    ///
    /// Only affects containers without a format version.
    #[must_use]
    pub fn with_legacy_signal_timeout(mut self, timeout: Duration) -> Self {
        self.signaller =
            Signaller::for_version(self.version.as_deref(), &self.container_path, timeout);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn handle(&self) -> &str {
        &self.handle
    }

    pub fn rootfs_path(&self) -> &Path {
        &self.rootfs_path
    }

    pub fn container_path(&self) -> &Path {
        &self.container_path
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Returns the signal delivery strategy handed to the process tracker.
    pub fn signaller(&self) -> &Signaller {
        &self.signaller
    }

    /// Returns the pool new process IDs are drawn from.
    pub fn process_id_pool(&self) -> &ProcessIdPool {
        &self.process_ids
    }

    pub fn grace_time(&self) -> Duration {
        *read(&self.grace_time)
    }

    pub fn set_grace_time(&self, grace_time: Duration) {
        *write(&self.grace_time) = grace_time;
    }

    pub fn state(&self) -> ContainerState {
        *read(&self.state)
    }

    fn set_state(&self, state: ContainerState) {
        *write(&self.state) = state;
    }

    /// Returns a copy of the event log.
    pub fn events(&self) -> Vec<String> {
        read(&self.events).clone()
    }

    /// Appends `event` to the event log.
    pub fn register_event(&self, event: impl Into<String>) {
        write(&self.events).push(event.into());
    }

    /// Returns the current property map.
    ///
    /// The map is an immutable snapshot; later writes do not show through it.
    pub fn properties(&self) -> Arc<Properties> {
        Arc::clone(&read(&self.properties))
    }

    /// Returns the value of property `key`.
    pub fn property(&self, key: &str) -> Result<String> {
        read(&self.properties)
            .get(key)
            .cloned()
            .ok_or_else(|| ContainerError::UndefinedProperty(key.to_string()))
    }

    /// Sets property `key` to `value`.
    pub fn set_property(&self, key: impl Into<String>, value: impl Into<String>) {
        let mut properties = write(&self.properties);
        // Copy on write: readers holding the previous map keep seeing it whole.
        Arc::make_mut(&mut properties).insert(key.into(), value.into());
    }

    /// Removes property `key`.
    pub fn remove_property(&self, key: &str) -> Result<()> {
        let mut properties = write(&self.properties);
        if !properties.contains_key(key) {
            return Err(ContainerError::UndefinedProperty(key.to_string()));
        }
        Arc::make_mut(&mut properties).remove(key);
        Ok(())
    }

    /// Returns true if every entry of `wanted` is set to the same value.
    pub fn has_properties(&self, wanted: &Properties) -> bool {
        let properties = read(&self.properties);
        wanted
            .iter()
            .all(|(k, v)| properties.get(k).is_some_and(|value| value == v))
    }

    /// Returns a copy of the container's environment.
    pub fn env(&self) -> Vec<String> {
        read(&self.env).clone()
    }

    /// Returns a copy of the allocated host resources.
    pub fn resources(&self) -> Resources {
        read(&self.resources).clone()
    }

    /// Returns a copy of the inbound port mappings.
    pub fn net_ins(&self) -> Vec<NetInSpec> {
        read(&self.net_ins).clone()
    }

    /// Returns a copy of the outbound rules.
    pub fn net_outs(&self) -> Vec<NetOutRule> {
        read(&self.net_outs).clone()
    }

    /// Summarizes the container.
    pub fn info(&self) -> ContainerInfo {
        debug!(handle = %self.handle, "info-starting");

        let mapped_ports = self.net_ins();
        let process_ids = self
            .deps
            .process_tracker
            .active_processes()
            .iter()
            .map(ToString::to_string)
            .collect();
        let (network, external_ip) = {
            let resources = read(&self.resources);
            (resources.network, resources.external_ip)
        };

        let info = ContainerInfo {
            state: self.state(),
            events: self.events(),
            properties: (*self.properties()).clone(),
            container_path: self.container_path.clone(),
            process_ids,
            mapped_ports,
            container_ip: network.ip,
            host_ip: network.gateway(),
            external_ip,
        };

        debug!(handle = %self.handle, "info-ended");
        info
    }

    /// Returns the full current spec of the container.
    pub fn resource_spec(&self) -> ContainerSpec {
        let view = self.lock_all();
        ContainerSpec {
            id: self.id.clone(),
            handle: self.handle.clone(),
            rootfs_path: self.rootfs_path.clone(),
            container_path: self.container_path.clone(),
            grace_time: *view.grace_time,
            version: self.version.clone(),
            limits: view.limits(),
            resources: view.resources.clone(),
            env: view.env.clone(),
            properties: (**view.properties).clone(),
            net_ins: view.net_ins.clone(),
            net_outs: view.net_outs.clone(),
            events: view.events.clone(),
            state: *view.state,
        }
    }

    /// Installs the container's network rules and starts its daemon.
    ///
    /// Networking is set up first so the daemon never runs without it. On
    /// failure the state is left unchanged; rules installed before a failing
    /// start script are not removed.
    #[instrument(name = "start", skip(self), fields(handle = %self.handle))]
    pub async fn start(&self) -> Result<()> {
        debug!("starting");

        debug!("iptables-setup-starting");
        let (bridge, network) = {
            let resources = read(&self.resources);
            (resources.bridge.clone(), resources.network)
        };
        self.deps
            .iptables
            .container_setup(&self.id, &bridge, network.ip, network.subnet)
            .await
            .map_err(|e| {
                error!(error = %e, "iptables-setup-failed");
                ContainerError::collaborator("iptables setup", e)
            })?;
        debug!("iptables-setup-ended");

        debug!("wshd-start-starting");
        let command = ScriptCommand::new(self.container_path.join("start.sh"))
            .env("id", &self.id)
            .inherit_path();
        self.run_script(&command).await.map_err(|e| {
            error!(error = %e, "wshd-start-failed");
            e
        })?;
        debug!("wshd-start-ended");

        self.set_state(ContainerState::Active);
        info!("started");
        Ok(())
    }

    /// Stops the container's processes.
    ///
    /// With `kill` the stop script is told not to wait for a graceful exit.
    #[instrument(name = "stop", skip(self), fields(handle = %self.handle))]
    pub async fn stop(&self, kill: bool) -> Result<()> {
        let mut command = ScriptCommand::new(self.container_path.join("stop.sh"));
        if kill {
            command = command.args(["-w", "0"]);
        }

        self.run_script(&command).await.map_err(|e| {
            error!(error = %e, "stop-failed");
            e
        })?;

        self.cleanup();
        self.set_state(ContainerState::Stopped);
        info!("stopped");
        Ok(())
    }

    /// Releases host watchers held for the container.
    pub fn cleanup(&self) {
        debug!(handle = %self.handle, "stopping-oom-notifier");
        self.deps.oom_watcher.unwatch();
        info!(handle = %self.handle, "cleanup done");
    }

    /// Runs a helper to completion, turning a non-zero exit into an error.
    async fn run_script(&self, command: &ScriptCommand) -> Result<ScriptOutput> {
        let output = self
            .deps
            .runner
            .run(command)
            .await
            .map_err(|e| ContainerError::script(command.name(), e.to_string()))?;

        if output.is_success() {
            Ok(output)
        } else {
            Err(ContainerError::script(
                command.name(),
                output.describe_failure(),
            ))
        }
    }

    /// Takes every facet's read lock in the fixed order.
    fn lock_all(&self) -> FacetView<'_> {
        FacetView {
            grace_time: read(&self.grace_time),
            state: read(&self.state),
            events: read(&self.events),
            properties: read(&self.properties),
            env: read(&self.env),
            resources: read(&self.resources),
            bandwidth: read(&self.bandwidth),
            cpu: read(&self.cpu),
            disk: read(&self.disk),
            memory: read(&self.memory),
            net_ins: read(&self.net_ins),
            net_outs: read(&self.net_outs),
        }
    }
}
