//! Host abstraction over the emulation substrate
//!
//! The substrate hands us nodes that have an IPv4 address and can run
//! shell commands; everything else in this crate is built on top of
//! that capability. `Host` is the seam: production code wires in
//! [`ShellHost`], tests substitute recording mocks.

use std::net::Ipv4Addr;
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use crate::error::{MeshError, MeshResult};

/// Captured result of a host command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// A node in the emulated fabric: an address plus the ability to run
/// commands. Implementations must not reorder concurrently issued
/// commands from a single caller; callers serialize per-host mutations.
#[async_trait::async_trait]
pub trait Host: Send + Sync {
    /// Node name in the emulated topology
    fn name(&self) -> &str;

    /// Primary IPv4 address of this node
    fn addr(&self) -> Ipv4Addr;

    /// Run a command to completion and capture its output.
    ///
    /// Returns `Err` only when the command could not be issued at all;
    /// a non-zero exit is reported through `CommandOutput::success` so
    /// callers can decide whether it matters.
    async fn run(&self, command: &str) -> MeshResult<CommandOutput>;

    /// Launch a command detached, discarding its output.
    async fn spawn(&self, command: &str) -> MeshResult<()>;
}

/// Host implementation that shells out on the local machine. Under the
/// emulation substrate each node is a network namespace, so commands
/// are optionally wrapped in `ip netns exec`.
pub struct ShellHost {
    name: String,
    addr: Ipv4Addr,
    netns: Option<String>,
}

impl ShellHost {
    pub fn new(name: impl Into<String>, addr: Ipv4Addr) -> Self {
        Self {
            name: name.into(),
            addr,
            netns: None,
        }
    }

    /// Run all commands inside the named network namespace.
    pub fn in_netns(name: impl Into<String>, addr: Ipv4Addr, netns: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            addr,
            netns: Some(netns.into()),
        }
    }

    fn wrap(&self, command: &str) -> String {
        match &self.netns {
            Some(ns) => format!("ip netns exec {} {}", ns, command),
            None => command.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl Host for ShellHost {
    fn name(&self) -> &str {
        &self.name
    }

    fn addr(&self) -> Ipv4Addr {
        self.addr
    }

    async fn run(&self, command: &str) -> MeshResult<CommandOutput> {
        let wrapped = self.wrap(command);
        debug!(host = %self.name, command = %wrapped, "running command");

        let output = Command::new("sh")
            .arg("-c")
            .arg(&wrapped)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| MeshError::CommandFailed {
                command: wrapped.clone(),
                details: e.to_string(),
            })?;

        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn spawn(&self, command: &str) -> MeshResult<()> {
        let wrapped = self.wrap(command);
        debug!(host = %self.name, command = %wrapped, "spawning detached command");

        Command::new("sh")
            .arg("-c")
            .arg(&wrapped)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| MeshError::CommandFailed {
                command: wrapped.clone(),
                details: e.to_string(),
            })?;

        Ok(())
    }
}
