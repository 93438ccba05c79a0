//! Tunnel processes
//!
//! Tunnels are `ssh -N -L` processes placed in their own process group so
//! they survive the invoking shell. Nothing here owns them after spawn: they
//! are found again by PID from the persisted record.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{KubehopError, KubehopResult};

/// How long a fresh tunnel must stay up before it counts as started
pub const SPAWN_GRACE: Duration = Duration::from_millis(750);

/// What to forward and through which host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelSpec {
    pub host_alias: String,
    pub local_port: u16,
    pub remote_host: String,
    pub remote_port: u16,
    /// File receiving the tunnel's stderr
    pub log_path: Option<PathBuf>,
}

impl TunnelSpec {
    pub fn new(
        host_alias: impl Into<String>,
        local_port: u16,
        remote_host: impl Into<String>,
        remote_port: u16,
    ) -> Self {
        Self {
            host_alias: host_alias.into(),
            local_port,
            remote_host: remote_host.into(),
            remote_port,
            log_path: None,
        }
    }

    pub fn with_log(mut self, path: PathBuf) -> Self {
        self.log_path = Some(path);
        self
    }

    fn forward(&self) -> String {
        format!("{}:{}:{}", self.local_port, self.remote_host, self.remote_port)
    }

    /// Arguments for the ssh client
    pub fn ssh_args(&self) -> Vec<String> {
        vec![
            "-N".to_string(),
            "-L".to_string(),
            self.forward(),
            "-o".to_string(),
            "ExitOnForwardFailure=yes".to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "ServerAliveInterval=30".to_string(),
            self.host_alias.clone(),
        ]
    }

    /// Equivalent command for the operator to run by hand
    pub fn manual_command(&self) -> String {
        format!("ssh -f -N -L {} {}", self.forward(), self.host_alias)
    }
}

/// Process operations the supervisor needs
#[async_trait]
pub trait ProcessControl: Send + Sync {
    /// Whether `pid` is running and looks like a tunnel
    fn is_alive(&self, pid: u32) -> bool;

    /// Send SIGTERM; `Ok(false)` when the process was already gone
    fn terminate(&self, pid: u32) -> KubehopResult<bool>;

    /// Start a detached tunnel and return its PID
    async fn spawn_tunnel(&self, spec: &TunnelSpec) -> KubehopResult<u32>;
}

/// A spawned tunnel that nothing tracks yet
///
/// Dropping it sends SIGTERM, so a cancelled or failed start does not leave
/// an orphaned `ssh` holding the port. Call [`Untracked::disarm`] once the
/// PID is recorded or the process is known to be gone.
pub(crate) struct Untracked<'a> {
    processes: &'a dyn ProcessControl,
    pid: u32,
    armed: bool,
}

impl<'a> Untracked<'a> {
    pub(crate) fn new(processes: &'a dyn ProcessControl, pid: u32) -> Self {
        Self {
            processes,
            pid,
            armed: true,
        }
    }

    pub(crate) fn disarm(mut self) -> u32 {
        self.armed = false;
        self.pid
    }
}

impl Drop for Untracked<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match self.processes.terminate(self.pid) {
            Ok(_) => warn!("Stopped untracked tunnel (pid {})", self.pid),
            Err(e) => warn!("Could not stop untracked tunnel (pid {}): {}", self.pid, e),
        }
    }
}

/// Real processes via the system ssh client
#[derive(Debug, Clone)]
pub struct SystemProcesses {
    ssh_program: String,
    grace: Duration,
}

impl SystemProcesses {
    pub fn new() -> Self {
        Self {
            ssh_program: "ssh".to_string(),
            grace: SPAWN_GRACE,
        }
    }

    /// Use another program in place of `ssh`
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.ssh_program = program.into();
        self
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    fn stderr_target(spec: &TunnelSpec) -> KubehopResult<Stdio> {
        let Some(path) = spec.log_path.as_ref() else {
            return Ok(Stdio::null());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| KubehopError::io(format!("creating {}", parent.display()), e))?;
        }
        let file = std::fs::File::create(path)
            .map_err(|e| KubehopError::io(format!("creating {}", path.display()), e))?;
        Ok(Stdio::from(file))
    }
}

impl Default for SystemProcesses {
    fn default() -> Self {
        Self::new()
    }
}

fn raw_pid(pid: u32) -> Option<libc::pid_t> {
    libc::pid_t::try_from(pid).ok().filter(|p| *p > 0)
}

/// Linux exposes the command line; elsewhere existence has to do
fn looks_like_tunnel(pid: u32, program: &str) -> bool {
    match std::fs::read(format!("/proc/{}/cmdline", pid)) {
        Ok(raw) => {
            let cmdline = String::from_utf8_lossy(&raw);
            cmdline.contains("ssh") || cmdline.contains(program)
        }
        Err(_) => true,
    }
}

#[async_trait]
impl ProcessControl for SystemProcesses {
    fn is_alive(&self, pid: u32) -> bool {
        let Some(raw) = raw_pid(pid) else {
            return false;
        };
        // SAFETY: signal 0 only checks for existence and permission
        let rc = unsafe { libc::kill(raw, 0) };
        let exists = rc == 0
            || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM);
        exists && looks_like_tunnel(pid, &self.ssh_program)
    }

    fn terminate(&self, pid: u32) -> KubehopResult<bool> {
        let Some(raw) = raw_pid(pid) else {
            return Ok(false);
        };
        // SAFETY: plain kill(2) on a PID we recorded
        let rc = unsafe { libc::kill(raw, libc::SIGTERM) };
        if rc == 0 {
            return Ok(true);
        }
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            return Ok(false);
        }
        Err(KubehopError::io(format!("terminating process {}", pid), err))
    }

    async fn spawn_tunnel(&self, spec: &TunnelSpec) -> KubehopResult<u32> {
        let failure = |reason: String| KubehopError::TunnelCreationFailure {
            port: spec.local_port,
            reason,
        };

        let args = spec.ssh_args();
        debug!("Spawning {} {}", self.ssh_program, args.join(" "));

        let mut child = Command::new(&self.ssh_program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Self::stderr_target(spec)?)
            .process_group(0)
            .spawn()
            .map_err(|e| failure(format!("could not start {}: {}", self.ssh_program, e)))?;

        let pid = child
            .id()
            .ok_or_else(|| failure("process exited before reporting a PID".to_string()))?;
        let untracked = Untracked::new(self, pid);

        // ExitOnForwardFailure makes a bad forward exit quickly
        match tokio::time::timeout(self.grace, child.wait()).await {
            Err(_) => {
                info!(
                    "Tunnel localhost:{} -> {}:{} via {} (pid {})",
                    spec.local_port, spec.remote_host, spec.remote_port, spec.host_alias, pid
                );
                Ok(untracked.disarm())
            }
            Ok(Ok(status)) => {
                // Reaped already; the PID may be reused
                untracked.disarm();
                let detail = spec
                    .log_path
                    .as_ref()
                    .and_then(|p| std::fs::read_to_string(p).ok())
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty());
                Err(failure(match detail {
                    Some(detail) => format!("ssh exited with {}: {}", status, detail),
                    None => format!("ssh exited with {}", status),
                }))
            }
            Ok(Err(e)) => Err(failure(format!("waiting for ssh: {}", e))),
        }
    }
}
