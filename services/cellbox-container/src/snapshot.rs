//! Snapshot document.
//!
//! A snapshot is the JSON document the orchestrator keeps for every container
//! so the container can be rebuilt after the controlling process restarts.
//! The OS-level container keeps running across that restart; the snapshot
//! only has to carry what the runtime object needs to re-attach to it.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::spec::{ContainerSpec, Limits, NetInSpec, NetOutRule, Properties, Resources};
use crate::state::ContainerState;

/// A process that was running when the snapshot was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveProcess {
    pub id: u32,
}

/// Point-in-time view of a container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerSnapshot {
    pub id: String,
    pub handle: String,
    pub rootfs_path: PathBuf,
    pub container_path: PathBuf,
    #[serde(default)]
    pub version: Option<String>,
    pub grace_time: Duration,
    pub state: ContainerState,
    #[serde(default)]
    pub events: Vec<String>,
    #[serde(default)]
    pub limits: Limits,
    pub resources: Resources,
    #[serde(default)]
    pub net_ins: Vec<NetInSpec>,
    #[serde(default)]
    pub net_outs: Vec<NetOutRule>,
    #[serde(default)]
    pub processes: Vec<ActiveProcess>,
    #[serde(default)]
    pub properties: Properties,
    #[serde(default)]
    pub env: Vec<String>,
}

impl ContainerSnapshot {
    /// Decodes a snapshot.
    pub fn read_from<R: Read>(reader: R) -> Result<Self> {
        Ok(serde_json::from_reader(reader)?)
    }

    /// Encodes the snapshot as one JSON document followed by a newline.
    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<()> {
        serde_json::to_writer(&mut writer, self)?;
        writer.write_all(b"\n")?;
        Ok(())
    }

    /// Returns the spec to construct the container with before restoring.
    ///
    /// Identity, paths, limits, properties and resources carry over. State,
    /// events, environment and network rules start empty: restoring the
    /// snapshot sets or replays them.
    #[must_use]
    pub fn base_spec(&self) -> ContainerSpec {
        ContainerSpec {
            id: self.id.clone(),
            handle: self.handle.clone(),
            rootfs_path: self.rootfs_path.clone(),
            container_path: self.container_path.clone(),
            grace_time: self.grace_time,
            version: self.version.clone(),
            limits: self.limits.clone(),
            resources: self.resources.clone(),
            env: Vec::new(),
            properties: self.properties.clone(),
            net_ins: Vec::new(),
            net_outs: Vec::new(),
            events: Vec::new(),
            state: ContainerState::Born,
        }
    }

    /// Returns the highest process ID in the snapshot.
    #[must_use]
    pub fn max_process_id(&self) -> Option<u32> {
        self.processes.iter().map(|p| p.id).max()
    }
}
