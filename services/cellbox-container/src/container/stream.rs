//! Copying files in and out of the container as tar streams.
//!
//! Both directions run the container's `tar` inside its mount namespace
//! through the `nstar` helper, targeting the namespace host process recorded
//! in `run/wshd.pid`.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use cellbox_error::CommonError;
use tracing::{debug, error, instrument};

use super::LinuxContainer;
use crate::error::{ContainerError, Result};
use crate::runner::ScriptCommand;

const DEFAULT_USER: &str = "root";

/// Tar archive to unpack into the container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamInSpec {
    /// User to unpack as. Defaults to root.
    pub user: Option<String>,
    /// Destination directory inside the container.
    pub path: String,
    pub tar: Bytes,
}

/// File or directory to archive out of the container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamOutSpec {
    /// User to read as. Defaults to root.
    pub user: Option<String>,
    /// Path inside the container. A trailing `/` archives the directory's
    /// contents rather than the directory itself.
    pub path: String,
}

impl LinuxContainer {
    /// Unpacks `spec.tar` at `spec.path` inside the container.
    #[instrument(name = "stream-in", skip_all, fields(handle = %self.handle, path = %spec.path))]
    pub async fn stream_in(&self, spec: StreamInSpec) -> Result<()> {
        let pid = self.namespace_pid().await?;
        let command = self
            .nstar(pid, spec.user.as_deref())
            .arg(spec.path)
            .stdin(spec.tar);

        self.run_script(&command).await.map_err(|e| {
            error!(error = %e, "stream-in-failed");
            match e {
                ContainerError::Script { script, message } => ContainerError::Script {
                    script,
                    message: format!("error streaming in: {message}"),
                },
                other => other,
            }
        })?;
        Ok(())
    }

    /// Returns a tar archive of `spec.path` inside the container.
    #[instrument(name = "stream-out", skip_all, fields(handle = %self.handle, path = %spec.path))]
    pub async fn stream_out(&self, spec: StreamOutSpec) -> Result<Bytes> {
        let (working_dir, target) = archive_target(&spec.path);
        let pid = self.namespace_pid().await?;
        let command = self
            .nstar(pid, spec.user.as_deref())
            .arg(working_dir)
            .arg(target);

        let output = self.run_script(&command).await.map_err(|e| {
            error!(error = %e, "stream-out-failed");
            e
        })?;
        debug!(bytes = output.stdout.len(), "streamed out");
        Ok(output.stdout)
    }

    fn nstar(&self, pid: u32, user: Option<&str>) -> ScriptCommand {
        let bin = self.container_path.join("bin");
        let user = user.filter(|u| !u.is_empty()).unwrap_or(DEFAULT_USER);
        ScriptCommand::new(bin.join("nstar"))
            .arg(bin.join("tar").display().to_string())
            .arg(pid.to_string())
            .arg(user)
    }

    /// Reads the PID of the process holding the container's namespaces.
    async fn namespace_pid(&self) -> Result<u32> {
        let path = self.pid_file();
        let raw = tokio::fs::read_to_string(&path).await?;
        raw.trim().parse().map_err(|_| {
            CommonError::internal(format!(
                "{} does not hold a pid: {:?}",
                path.display(),
                raw.trim()
            ))
            .into()
        })
    }

    fn pid_file(&self) -> PathBuf {
        self.container_path.join("run").join("wshd.pid")
    }
}

/// Splits `path` into the directory tar runs in and the entry it archives.
fn archive_target(path: &str) -> (String, String) {
    if path.ends_with('/') {
        return (path.to_string(), ".".to_string());
    }

    let path = Path::new(path);
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.display().to_string(),
        _ => ".".to_string(),
    };
    let entry = path
        .file_name()
        .map_or_else(|| ".".to_string(), |name| name.to_string_lossy().into_owned());
    (dir, entry)
}
