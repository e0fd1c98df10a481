//! Process signal delivery strategies.
//!
//! Containers created before format versioning existed can only be signalled
//! by running `kill` inside the container through the `wsh` helper. Newer
//! containers keep a link to every tracked process and forward signals over
//! it. The strategy is chosen once, when the container is constructed or
//! restored, and handed to the process tracker.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use cellbox_error::CommonError;

use crate::error::{ContainerError, Result};
use crate::runner::{CommandRunner, ScriptCommand};

/// Default bound on a legacy signal delivery.
pub const DEFAULT_LEGACY_SIGNAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Versions that mark a container as predating format versioning.
const MISSING_VERSIONS: [&str; 2] = ["", "0.0.0"];

/// Signals the runtime sends to container processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    Terminate,
    Kill,
}

impl Signal {
    /// Returns the signal name without the `SIG` prefix.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Terminate => "TERM",
            Self::Kill => "KILL",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Signal delivery strategy for a container's tracked processes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signaller {
    /// Runs `kill` inside the container's namespaces.
    Namespaced(NamespacedSignaller),
    /// Forwards the signal over the process link.
    Link,
}

impl Signaller {
    /// Picks the strategy for a container with format `version`.
    ///
    /// An absent, empty or zero version selects the namespaced signaller
    /// bounded by `timeout`; any other version selects the link signaller.
    #[must_use]
    pub fn for_version(version: Option<&str>, container_path: &Path, timeout: Duration) -> Self {
        match version.map(str::trim) {
            None => Self::Namespaced(NamespacedSignaller::new(container_path, timeout)),
            Some(v) if MISSING_VERSIONS.contains(&v) => {
                Self::Namespaced(NamespacedSignaller::new(container_path, timeout))
            }
            Some(_) => Self::Link,
        }
    }

    /// Returns true for the namespaced strategy.
    #[must_use]
    pub const fn is_legacy(&self) -> bool {
        matches!(self, Self::Namespaced(_))
    }
}

/// Delivers signals by running the `wsh` helper against the container's
/// daemon socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespacedSignaller {
    container_path: PathBuf,
    timeout: Duration,
}

impl NamespacedSignaller {
    /// Creates a signaller for the container at `container_path`.
    #[must_use]
    pub fn new(container_path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            container_path: container_path.into(),
            timeout,
        }
    }

    /// Returns the delivery bound.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Builds the `wsh` invocation that sends `signal` to `pid`.
    #[must_use]
    pub fn command(&self, pid: u32, signal: Signal) -> ScriptCommand {
        let wsh = self.container_path.join("bin").join("wsh");
        let socket = self.container_path.join("run").join("wshd.sock");
        ScriptCommand::new(wsh)
            .arg("--socket")
            .arg(socket.display().to_string())
            .args(["--user", "root", "kill"])
            .arg(format!("-{}", signal.name()))
            .arg(pid.to_string())
    }

    /// Sends `signal` to `pid`, giving up after the configured timeout.
    pub async fn signal(
        &self,
        runner: &dyn CommandRunner,
        pid: u32,
        signal: Signal,
    ) -> Result<()> {
        let command = self.command(pid, signal);
        tracing::debug!(pid, %signal, "signalling process through wsh");

        let output = tokio::time::timeout(self.timeout, runner.run(&command))
            .await
            .map_err(|_| {
                CommonError::timeout(format!(
                    "signalling process {pid} did not finish within {:?}",
                    self.timeout
                ))
            })??;

        if output.is_success() {
            Ok(())
        } else {
            Err(ContainerError::script(
                command.name(),
                output.describe_failure(),
            ))
        }
    }
}
