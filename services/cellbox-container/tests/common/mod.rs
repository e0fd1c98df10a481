//! Recording fakes for every collaborator a container drives.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cellbox_container::{
    BandwidthLimits, BandwidthManager, CgroupsManager, Collaborators, CommandRunner,
    ContainerSpec, DiskLimits, FallbackReason, GroupResolution, IptablesManager, LinuxContainer,
    NetOutRule, Network, OomHandler, OomWatcher, PacketFilter, ProcessTracker, QuotaManager,
    Resources, ScriptCommand, ScriptOutput, Signaller, SpacePolicy,
};
use cellbox_portpool::{PoolState, PortPool};
use ipnetwork::Ipv4Network;

// ============================================================================
// Script runner
// ============================================================================

#[derive(Default)]
pub struct RecordingRunner {
    pub commands: Mutex<Vec<ScriptCommand>>,
    /// Canned results keyed by program file name. Unlisted programs succeed.
    pub outputs: Mutex<HashMap<String, ScriptOutput>>,
}

impl RecordingRunner {
    pub fn fail(&self, program: &str, code: i32, stderr: &'static str) {
        self.outputs
            .lock()
            .unwrap()
            .insert(program.to_string(), ScriptOutput::failure(code, stderr));
    }

    pub fn respond(&self, program: &str, stdout: &'static [u8]) {
        self.outputs
            .lock()
            .unwrap()
            .insert(program.to_string(), ScriptOutput::success(stdout));
    }

    pub fn commands(&self) -> Vec<ScriptCommand> {
        self.commands.lock().unwrap().clone()
    }

    pub fn programs(&self) -> Vec<String> {
        self.commands().iter().map(ScriptCommand::name).collect()
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, command: &ScriptCommand) -> std::io::Result<ScriptOutput> {
        self.commands.lock().unwrap().push(command.clone());
        Ok(self
            .outputs
            .lock()
            .unwrap()
            .get(&command.name())
            .cloned()
            .unwrap_or_else(|| ScriptOutput::success("")))
    }
}

// ============================================================================
// Network collaborators
// ============================================================================

#[derive(Default)]
pub struct FakeIptables {
    pub setups: Mutex<Vec<(String, String, Ipv4Addr, Ipv4Network)>>,
    pub error: Mutex<Option<String>>,
}

#[async_trait]
impl IptablesManager for FakeIptables {
    async fn container_setup(
        &self,
        id: &str,
        bridge: &str,
        ip: Ipv4Addr,
        subnet: Ipv4Network,
    ) -> Result<(), String> {
        if let Some(error) = self.error.lock().unwrap().clone() {
            return Err(error);
        }
        self.setups
            .lock()
            .unwrap()
            .push((id.to_string(), bridge.to_string(), ip, subnet));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeFilter {
    pub rules: Mutex<Vec<NetOutRule>>,
    pub error: Mutex<Option<String>>,
}

#[async_trait]
impl PacketFilter for FakeFilter {
    async fn net_out(&self, rule: &NetOutRule) -> Result<(), String> {
        if let Some(error) = self.error.lock().unwrap().clone() {
            return Err(error);
        }
        self.rules.lock().unwrap().push(rule.clone());
        Ok(())
    }
}

/// Policy service with a fixed space-to-group table.
#[derive(Default)]
pub struct FakePolicy {
    pub groups: HashMap<String, usize>,
    pub lookups: Mutex<Vec<String>>,
    pub registrations: Mutex<Vec<(String, String)>>,
    /// Registration fails with this message.
    pub registration_error: Option<String>,
    /// Registration never completes.
    pub registration_hangs: bool,
}

impl FakePolicy {
    pub fn with_group(space: &str, group: usize) -> Self {
        Self {
            groups: HashMap::from([(space.to_string(), group)]),
            ..Self::default()
        }
    }
}

#[async_trait]
impl SpacePolicy for FakePolicy {
    async fn resolve_group(&self, space: &str) -> GroupResolution {
        self.lookups.lock().unwrap().push(space.to_string());
        match self.groups.get(space) {
            Some(&group) => GroupResolution::Resolved(group),
            None => GroupResolution::Fallback(FallbackReason::Unavailable("unknown space".into())),
        }
    }

    async fn register_endpoint(&self, space: &str, endpoint: &str) -> Result<(), String> {
        if self.registration_hangs {
            std::future::pending::<()>().await;
        }
        self.registrations
            .lock()
            .unwrap()
            .push((space.to_string(), endpoint.to_string()));
        match &self.registration_error {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

// ============================================================================
// Limits
// ============================================================================

#[derive(Default)]
pub struct FakeCgroups {
    pub values: Mutex<HashMap<(String, String), String>>,
    pub writes: Mutex<Vec<(String, String)>>,
    /// Files that reject writes.
    pub rejected: Mutex<HashSet<String>>,
}

impl CgroupsManager for FakeCgroups {
    fn set(&self, subsystem: &str, name: &str, value: &str) -> Result<(), String> {
        if self.rejected.lock().unwrap().contains(name) {
            return Err(format!("{name}: invalid argument"));
        }
        self.writes
            .lock()
            .unwrap()
            .push((name.to_string(), value.to_string()));
        self.values
            .lock()
            .unwrap()
            .insert((subsystem.to_string(), name.to_string()), value.to_string());
        Ok(())
    }

    fn get(&self, subsystem: &str, name: &str) -> Result<String, String> {
        self.values
            .lock()
            .unwrap()
            .get(&(subsystem.to_string(), name.to_string()))
            .map(|v| format!("{v}\n"))
            .ok_or_else(|| format!("{name}: no such file"))
    }
}

#[derive(Default)]
pub struct FakeQuota {
    pub limits: Mutex<HashMap<PathBuf, DiskLimits>>,
}

#[async_trait]
impl QuotaManager for FakeQuota {
    async fn set_limits(&self, rootfs: &Path, limits: &DiskLimits) -> Result<(), String> {
        self.limits
            .lock()
            .unwrap()
            .insert(rootfs.to_path_buf(), *limits);
        Ok(())
    }

    async fn get_limits(&self, rootfs: &Path) -> Result<DiskLimits, String> {
        Ok(self
            .limits
            .lock()
            .unwrap()
            .get(rootfs)
            .copied()
            .unwrap_or_default())
    }
}

#[derive(Default)]
pub struct FakeBandwidth {
    pub limits: Mutex<Option<BandwidthLimits>>,
}

#[async_trait]
impl BandwidthManager for FakeBandwidth {
    async fn set_limits(&self, limits: &BandwidthLimits) -> Result<(), String> {
        *self.limits.lock().unwrap() = Some(*limits);
        Ok(())
    }
}

// ============================================================================
// Processes
// ============================================================================

#[derive(Default)]
pub struct FakeTracker {
    pub active: Mutex<Vec<u32>>,
    pub restored: Mutex<Vec<(u32, Signaller)>>,
}

impl ProcessTracker for FakeTracker {
    fn active_processes(&self) -> Vec<u32> {
        self.active.lock().unwrap().clone()
    }

    fn restore(&self, id: u32, signaller: Signaller) {
        self.restored.lock().unwrap().push((id, signaller));
    }
}

#[derive(Default)]
pub struct FakeOomWatcher {
    pub handler: Mutex<Option<OomHandler>>,
    pub unwatched: Mutex<usize>,
}

impl FakeOomWatcher {
    /// Simulates the kernel reporting an OOM kill.
    pub fn fire(&self) {
        if let Some(handler) = self.handler.lock().unwrap().as_ref() {
            handler();
        }
    }
}

impl OomWatcher for FakeOomWatcher {
    fn watch(&self, handler: OomHandler) -> Result<(), String> {
        *self.handler.lock().unwrap() = Some(handler);
        Ok(())
    }

    fn unwatch(&self) {
        *self.unwatched.lock().unwrap() += 1;
        self.handler.lock().unwrap().take();
    }
}

// ============================================================================
// Fixture
// ============================================================================

pub struct Fixture {
    pub dir: tempfile::TempDir,
    pub pool: Arc<PortPool>,
    pub runner: Arc<RecordingRunner>,
    pub iptables: Arc<FakeIptables>,
    pub filter: Arc<FakeFilter>,
    pub policy: Arc<FakePolicy>,
    pub cgroups: Arc<FakeCgroups>,
    pub quota: Arc<FakeQuota>,
    pub bandwidth: Arc<FakeBandwidth>,
    pub tracker: Arc<FakeTracker>,
    pub oom: Arc<FakeOomWatcher>,
}

impl Fixture {
    /// Pool of 100 ports at 1000 split into two groups.
    pub fn new() -> Self {
        Self::with_policy(FakePolicy::default())
    }

    pub fn with_policy(policy: FakePolicy) -> Self {
        Self::with_pool_and_policy(
            PortPool::new(1000, 100, 2, &PoolState::default()).unwrap(),
            policy,
        )
    }

    pub fn with_pool_and_policy(pool: PortPool, policy: FakePolicy) -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
            pool: Arc::new(pool),
            runner: Arc::default(),
            iptables: Arc::default(),
            filter: Arc::default(),
            policy: Arc::new(policy),
            cgroups: Arc::default(),
            quota: Arc::default(),
            bandwidth: Arc::default(),
            tracker: Arc::default(),
            oom: Arc::default(),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            port_pool: self.pool.clone(),
            runner: self.runner.clone(),
            cgroups: self.cgroups.clone(),
            quota: self.quota.clone(),
            bandwidth: self.bandwidth.clone(),
            process_tracker: self.tracker.clone(),
            filter: self.filter.clone(),
            iptables: self.iptables.clone(),
            oom_watcher: self.oom.clone(),
            policy: self.policy.clone(),
        }
    }

    pub fn container_path(&self) -> PathBuf {
        self.dir.path().join("containers").join("c-1")
    }

    pub fn spec(&self) -> ContainerSpec {
        let resources = Resources::new(
            10000,
            Network {
                ip: Ipv4Addr::new(10, 254, 0, 2),
                subnet: "10.254.0.0/30".parse().unwrap(),
            },
            "w-bridge",
            Ipv4Addr::new(203, 0, 113, 7),
        );
        let mut spec = ContainerSpec::new("c-1", "web", self.container_path(), resources);
        spec.rootfs_path = self.dir.path().join("rootfs").join("c-1");
        spec.version = Some("1.0.0".to_string());
        spec
    }

    pub fn container(&self) -> LinuxContainer {
        LinuxContainer::new(self.spec(), self.collaborators())
    }

    pub fn container_in_space(&self, space: &str) -> LinuxContainer {
        let mut spec = self.spec();
        spec.properties
            .insert("network.space_id".to_string(), space.to_string());
        LinuxContainer::new(spec, self.collaborators())
    }

    /// Writes the namespace host pid file the stream helpers read.
    pub fn write_pid(&self, pid: &str) {
        let run = self.container_path().join("run");
        std::fs::create_dir_all(&run).unwrap();
        std::fs::write(run.join("wshd.pid"), pid).unwrap();
    }
}

/// Polls `done` until it holds, yielding to spawned tasks in between.
pub async fn eventually(done: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if done() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    done()
}
