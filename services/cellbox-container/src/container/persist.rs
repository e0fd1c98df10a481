//! Snapshot and restore.

use std::io::Write;

use tracing::{debug, error, info, info_span, instrument};

use super::{LinuxContainer, write};
use crate::error::{ContainerError, Result};
use crate::snapshot::{ActiveProcess, ContainerSnapshot};

impl LinuxContainer {
    /// Writes a consistent snapshot of the container to `writer`.
    ///
    /// Every facet lock is held until the document is fully encoded.
    pub fn snapshot<W: Write>(&self, writer: W) -> Result<()> {
        let span = info_span!("snapshot", handle = %self.handle);
        let _enter = span.enter();
        debug!("saving");

        let processes = self
            .deps
            .process_tracker
            .active_processes()
            .into_iter()
            .map(|id| ActiveProcess { id })
            .collect();

        let view = self.lock_all();
        let snapshot = ContainerSnapshot {
            id: self.id.clone(),
            handle: self.handle.clone(),
            rootfs_path: self.rootfs_path.clone(),
            container_path: self.container_path.clone(),
            version: self.version.clone(),
            grace_time: *view.grace_time,
            state: *view.state,
            events: view.events.clone(),
            limits: view.limits(),
            resources: view.resources.clone(),
            net_ins: view.net_ins.clone(),
            net_outs: view.net_outs.clone(),
            processes,
            properties: (**view.properties).clone(),
            env: view.env.clone(),
        };

        match snapshot.write_to(writer) {
            Ok(()) => {
                info!(
                    state = %snapshot.state,
                    processes = snapshot.processes.len(),
                    net_ins = snapshot.net_ins.len(),
                    "saved"
                );
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "failed-to-save");
                Err(e)
            }
        }
    }

    /// Re-attaches to a container that kept running across a restart.
    ///
    /// Sets state and environment, replays the event log, reapplies the
    /// memory limit, re-attaches tracked processes, re-reserves the
    /// container's host ports, reinstalls its network rules and replays every
    /// port mapping and outbound rule. Every step can be repeated safely on
    /// each restart.
    ///
    /// The first failure aborts the restore. The container must then be
    /// discarded.
    #[instrument(name = "restore", skip_all, fields(handle = %self.handle))]
    pub async fn restore(&self, snapshot: &ContainerSnapshot) -> Result<()> {
        debug!("restoring");

        self.set_state(snapshot.state);
        *write(&self.env) = snapshot.env.clone();

        for event in &snapshot.events {
            self.register_event(event.clone());
        }

        if let Some(memory) = snapshot.limits.memory {
            self.limit_memory(memory).map_err(|e| {
                error!(error = %e, "failed-to-limit-memory");
                e
            })?;
        }

        for process in &snapshot.processes {
            info!(process = process.id, "restoring-process");
            self.process_ids.restore(process.id);
            self.deps
                .process_tracker
                .restore(process.id, self.signaller.clone());
        }

        for &port in &snapshot.resources.ports {
            match self.deps.port_pool.remove(port) {
                Ok(()) => debug!(port, "port re-reserved"),
                Err(e) if e.is_port_taken() => debug!(port, "port already reserved"),
                Err(e) => {
                    error!(port, error = %e, "failed-to-reserve-port");
                    return Err(e.into());
                }
            }
        }

        let resources = &snapshot.resources;
        self.deps
            .iptables
            .container_setup(
                &snapshot.id,
                &resources.bridge,
                resources.network.ip,
                resources.network.subnet,
            )
            .await
            .map_err(|e| {
                error!(error = %e, "failed-to-reenforce-network-rules");
                ContainerError::collaborator("iptables setup", e)
            })?;

        for net_in in &snapshot.net_ins {
            self.net_in(net_in.host_port, net_in.container_port)
                .await
                .map_err(|e| {
                    error!(error = %e, "failed-to-reenforce-port-mapping");
                    e
                })?;
        }

        for net_out in &snapshot.net_outs {
            self.net_out(net_out.clone()).await.map_err(|e| {
                error!(error = %e, "failed-to-reenforce-net-out");
                e
            })?;
        }

        info!("restored");
        Ok(())
    }
}
