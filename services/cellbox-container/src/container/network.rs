//! Inbound port mappings and outbound rules.

use tracing::{debug, error, info, instrument, warn};

use super::{LinuxContainer, read, write};
use crate::error::{ContainerError, Result};
use crate::policy::{FallbackReason, GroupResolution};
use crate::runner::ScriptCommand;
use crate::spec::{NetInSpec, NetOutRule};

/// Property holding the tenant space a container belongs to.
pub const SPACE_PROPERTY: &str = "network.space_id";

/// Container port of the SSH daemon; mappings to it are not registered
/// with the policy service.
pub const RESERVED_CONTAINER_PORT: u32 = 2222;

impl LinuxContainer {
    /// Maps `host_port` on the host to `container_port` in the container.
    ///
    /// A zero `host_port` draws a port from the pool group of the container's
    /// space; a zero `container_port` mirrors the host port. Returns the
    /// resolved pair. A pool-drawn port goes back to the pool if the mapping
    /// cannot be installed.
    #[instrument(name = "netin", skip(self), fields(handle = %self.handle))]
    pub async fn net_in(&self, host_port: u32, container_port: u32) -> Result<(u32, u32)> {
        debug!("natting");

        let space = self.property(SPACE_PROPERTY).ok().filter(|s| !s.is_empty());

        let (host_port, drawn) = if host_port == 0 {
            let group = self.resolve_group(space.as_deref()).await;
            let port = self.deps.port_pool.acquire(group).map_err(|e| {
                error!(group, error = %e, "port-acquire-failed");
                ContainerError::from(e)
            })?;
            (port, true)
        } else {
            (host_port, false)
        };
        let container_port = if container_port == 0 {
            host_port
        } else {
            container_port
        };

        if container_port != RESERVED_CONTAINER_PORT {
            if let Some(space) = &space {
                let external_ip = read(&self.resources).external_ip;
                self.notifier
                    .notify(space.clone(), format!("{external_ip}:{host_port}"));
            }
        }

        let command = ScriptCommand::new(self.container_path.join("net.sh"))
            .arg("in")
            .env("HOST_PORT", host_port.to_string())
            .env("CONTAINER_PORT", container_port.to_string())
            .inherit_path();
        if let Err(e) = self.run_script(&command).await {
            error!(host_port, container_port, error = %e, "net-in-failed");
            if drawn {
                self.deps.port_pool.release(host_port);
            }
            return Err(e);
        }

        if drawn {
            write(&self.resources).add_port(host_port);
        }
        write(&self.net_ins).push(NetInSpec {
            host_port,
            container_port,
        });

        info!(host_port, container_port, "mapped");
        Ok((host_port, container_port))
    }

    /// Allows traffic matching `rule` out of the container.
    ///
    /// The rule is recorded only once the packet filter accepted it.
    #[instrument(name = "netout", skip_all, fields(handle = %self.handle))]
    pub async fn net_out(&self, rule: NetOutRule) -> Result<()> {
        self.deps.filter.net_out(&rule).await.map_err(|e| {
            error!(error = %e, "net-out-failed");
            ContainerError::collaborator("net out", e)
        })?;

        write(&self.net_outs).push(rule);
        Ok(())
    }

    /// Picks the pool group for a container in `space`.
    async fn resolve_group(&self, space: Option<&str>) -> usize {
        let resolution = match space {
            Some(space) => self.deps.policy.resolve_group(space).await,
            None => GroupResolution::Fallback(FallbackReason::NoSpace),
        };

        let group = resolution.group();
        match resolution.fallback_reason() {
            Some(reason) => warn!(%reason, group, "using fallback port group"),
            None => debug!(group, "port group resolved"),
        }
        group
    }
}
