//! Privileged helper script execution.
//!
//! Lifecycle and networking changes are carried out by shell scripts that
//! live in the container directory (`start.sh`, `stop.sh`, `net.sh`) and by
//! the `nstar`/`wsh` helpers under `bin/`. [`CommandRunner`] is the seam
//! between the container and those processes so tests can substitute a fake.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// A helper invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptCommand {
    /// Program to execute.
    pub program: PathBuf,
    /// Arguments.
    pub args: Vec<String>,
    /// Environment. `None` inherits the caller's environment; `Some` runs the
    /// program with exactly these variables.
    pub env: Option<Vec<(String, OsString)>>,
    /// Bytes fed to the program's standard input.
    pub stdin: Option<Bytes>,
}

impl ScriptCommand {
    /// Creates an invocation of `program` that inherits the environment.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Appends an argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Adds a variable to a minimal environment.
    ///
    /// The first call switches the command from an inherited environment to an
    /// explicit one.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<OsString>) -> Self {
        self.env
            .get_or_insert_with(Vec::new)
            .push((key.into(), value.into()));
        self
    }

    /// Adds the caller's `PATH` to a minimal environment.
    #[must_use]
    pub fn inherit_path(self) -> Self {
        let path = std::env::var_os("PATH").unwrap_or_default();
        self.env("PATH", path)
    }

    /// Feeds `input` to the program's standard input.
    #[must_use]
    pub fn stdin(mut self, input: impl Into<Bytes>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Returns the value of an explicitly set environment variable.
    #[must_use]
    pub fn env_var(&self, key: &str) -> Option<&OsString> {
        self.env
            .as_ref()?
            .iter()
            .find_map(|(k, v)| (k == key).then_some(v))
    }

    /// Returns the program file name, used to label failures.
    #[must_use]
    pub fn name(&self) -> String {
        self.program
            .file_name()
            .map_or_else(|| self.program.display().to_string(), |n| n.to_string_lossy().into_owned())
    }
}

/// Result of a finished helper.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptOutput {
    /// Exit code, `None` if the process was killed by a signal.
    pub status: Option<i32>,
    pub stdout: Bytes,
    pub stderr: Bytes,
}

impl ScriptOutput {
    /// Successful output carrying `stdout`.
    #[must_use]
    pub fn success(stdout: impl Into<Bytes>) -> Self {
        Self {
            status: Some(0),
            stdout: stdout.into(),
            stderr: Bytes::new(),
        }
    }

    /// Failed output with the given exit code and diagnostics.
    #[must_use]
    pub fn failure(code: i32, stderr: impl Into<Bytes>) -> Self {
        Self {
            status: Some(code),
            stdout: Bytes::new(),
            stderr: stderr.into(),
        }
    }

    /// Returns true if the program exited with status 0.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == Some(0)
    }

    /// Describes a failed run: exit status plus whatever the program printed.
    #[must_use]
    pub fn describe_failure(&self) -> String {
        let status = self
            .status
            .map_or_else(|| "terminated by signal".to_string(), |c| format!("exit status {c}"));
        let mut output = String::from_utf8_lossy(&self.stderr).trim().to_string();
        if output.is_empty() {
            output = String::from_utf8_lossy(&self.stdout).trim().to_string();
        }
        if output.is_empty() {
            status
        } else {
            format!("{status}: {output}")
        }
    }
}

/// Runs helper programs to completion.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs `command` and waits for it to exit.
    ///
    /// A non-zero exit is reported through [`ScriptOutput::status`], not as an
    /// error; errors mean the program could not be run at all.
    async fn run(&self, command: &ScriptCommand) -> std::io::Result<ScriptOutput>;
}

/// [`CommandRunner`] that spawns real processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, command: &ScriptCommand) -> std::io::Result<ScriptOutput> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args);

        if let Some(env) = &command.env {
            cmd.env_clear();
            cmd.envs(env.iter().map(|(k, v)| (k, v)));
        }

        if command.stdin.is_some() {
            cmd.stdin(Stdio::piped());
        } else {
            cmd.stdin(Stdio::null());
        }
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        tracing::debug!(program = %command.program.display(), args = ?command.args, "running helper");

        let mut child = cmd.spawn()?;
        if let (Some(input), Some(mut pipe)) = (&command.stdin, child.stdin.take()) {
            pipe.write_all(input).await?;
            // Dropping the pipe closes it so the helper sees EOF.
            drop(pipe);
        }

        let output = child.wait_with_output().await?;
        Ok(ScriptOutput {
            status: output.status.code(),
            stdout: Bytes::from(output.stdout),
            stderr: Bytes::from(output.stderr),
        })
    }
}
