//! Tunnel lifecycle per context
//!
//! `absent -> starting -> running -> (killed | exited)`. A record whose
//! process is gone is stale and is removed the first time it is looked at.
//! Records may vanish between check and act when another invocation races
//! us; every path tolerates that.

use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use super::process::{ProcessControl, SystemProcesses, TunnelSpec, Untracked};
use super::state::{FsPidStore, PidStore, TunnelRecord};
use crate::config::Config;
use crate::context::Context;
use crate::error::KubehopResult;

/// Observed state of a context's tunnel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelState {
    Absent,
    Running(TunnelRecord),
}

/// What `kill` found
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KillOutcome {
    /// SIGTERM delivered to a live tunnel
    Terminated(TunnelRecord),
    /// Record pointed at a process that was already gone
    Stale(TunnelRecord),
    /// No record
    Absent,
}

/// Result of sweeping every record
#[derive(Debug, Default, Serialize)]
pub struct KillReport {
    pub terminated: Vec<Context>,
    pub stale: Vec<Context>,
    pub failures: Vec<(Context, String)>,
}

/// Tunnel as shown to the operator
#[derive(Debug, Clone, Serialize)]
pub struct TunnelStatus {
    #[serde(flatten)]
    pub record: TunnelRecord,
    pub alive: bool,
}

/// Whether `ensure` reused a tunnel or started one
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnsureOutcome {
    Reused(TunnelRecord),
    Created(TunnelRecord),
}

impl EnsureOutcome {
    pub fn record(&self) -> &TunnelRecord {
        match self {
            Self::Reused(r) | Self::Created(r) => r,
        }
    }
}

/// Starts, finds, and stops tunnels
pub struct TunnelSupervisor {
    store: Box<dyn PidStore>,
    processes: Box<dyn ProcessControl>,
    log_dir: Option<PathBuf>,
}

impl TunnelSupervisor {
    pub fn new(store: Box<dyn PidStore>, processes: Box<dyn ProcessControl>) -> Self {
        Self {
            store,
            processes,
            log_dir: None,
        }
    }

    /// Filesystem records and real ssh processes
    pub fn from_config(config: &Config) -> Self {
        let dir = config.tunnels_dir();
        Self {
            store: Box::new(FsPidStore::new(dir.clone())),
            processes: Box::new(SystemProcesses::new()),
            log_dir: Some(dir),
        }
    }

    pub async fn state(&self, context: &Context) -> KubehopResult<TunnelState> {
        let Some(record) = self.store.get(context).await? else {
            return Ok(TunnelState::Absent);
        };

        if self.processes.is_alive(record.pid) {
            return Ok(TunnelState::Running(record));
        }

        debug!("Tunnel for {} (pid {}) has exited", context, record.pid);
        self.store.delete(context).await?;
        Ok(TunnelState::Absent)
    }

    pub async fn is_running(&self, context: &Context) -> KubehopResult<bool> {
        Ok(matches!(self.state(context).await?, TunnelState::Running(_)))
    }

    /// Spawn a tunnel and persist its record
    ///
    /// The tunnel is stopped again if its record cannot be written.
    pub async fn create(
        &self,
        context: &Context,
        host_alias: &str,
        remote_host: &str,
        local_port: u16,
        remote_port: u16,
    ) -> KubehopResult<TunnelRecord> {
        let spec = self.spec_for(context, host_alias, remote_host, local_port, remote_port);
        let pid = self.processes.spawn_tunnel(&spec).await?;
        let untracked = Untracked::new(self.processes.as_ref(), pid);

        let record = TunnelRecord::new(
            context.clone(),
            pid,
            local_port,
            remote_host,
            remote_port,
            host_alias,
        );
        self.save(&record).await?;
        untracked.disarm();
        Ok(record)
    }

    /// Reuse a live tunnel with the same forward, otherwise replace it
    pub async fn ensure(
        &self,
        context: &Context,
        host_alias: &str,
        remote_host: &str,
        local_port: u16,
        remote_port: u16,
    ) -> KubehopResult<EnsureOutcome> {
        if let TunnelState::Running(record) = self.state(context).await? {
            let same_forward = record.local_port == local_port
                && record.remote_host == remote_host
                && record.remote_port == remote_port;
            if same_forward {
                info!("Reusing tunnel for {} on port {}", context, local_port);
                return Ok(EnsureOutcome::Reused(record));
            }
            info!("Tunnel for {} points elsewhere, replacing it", context);
            self.kill(context).await?;
        }

        self.create(context, host_alias, remote_host, local_port, remote_port)
            .await
            .map(EnsureOutcome::Created)
    }

    /// Persist a record, overwriting any previous one for the context
    pub async fn save(&self, record: &TunnelRecord) -> KubehopResult<()> {
        self.store.put(record).await
    }

    pub async fn kill(&self, context: &Context) -> KubehopResult<KillOutcome> {
        let Some(record) = self.store.get(context).await? else {
            return Ok(KillOutcome::Absent);
        };

        let delivered = self.processes.is_alive(record.pid)
            && self.processes.terminate(record.pid)?;
        self.store.delete(context).await?;

        if delivered {
            info!("Stopped tunnel for {} (pid {})", context, record.pid);
            Ok(KillOutcome::Terminated(record))
        } else {
            debug!("Removed stale tunnel record for {}", context);
            Ok(KillOutcome::Stale(record))
        }
    }

    /// Kill every recorded tunnel, collecting failures
    pub async fn kill_all(&self) -> KubehopResult<KillReport> {
        let mut report = KillReport::default();

        for record in self.store.list().await? {
            match self.kill(&record.context).await {
                Ok(KillOutcome::Terminated(r)) => report.terminated.push(r.context),
                Ok(KillOutcome::Stale(r)) => report.stale.push(r.context),
                Ok(KillOutcome::Absent) => {}
                Err(e) => {
                    warn!("Failed to stop tunnel for {}: {}", record.context, e);
                    report.failures.push((record.context, e.to_string()));
                }
            }
        }

        Ok(report)
    }

    /// Ports held by live tunnels, pruning stale records on the way
    pub async fn live_ports(&self) -> KubehopResult<HashMap<u16, Context>> {
        let mut ports = HashMap::new();
        for record in self.store.list().await? {
            if self.processes.is_alive(record.pid) {
                ports.insert(record.local_port, record.context);
            } else {
                self.store.delete(&record.context).await?;
            }
        }
        Ok(ports)
    }

    /// Every record with its liveness, without pruning
    pub async fn list(&self) -> KubehopResult<Vec<TunnelStatus>> {
        Ok(self
            .store
            .list()
            .await?
            .into_iter()
            .map(|record| TunnelStatus {
                alive: self.processes.is_alive(record.pid),
                record,
            })
            .collect())
    }

    pub fn spec_for(
        &self,
        context: &Context,
        host_alias: &str,
        remote_host: &str,
        local_port: u16,
        remote_port: u16,
    ) -> TunnelSpec {
        let spec = TunnelSpec::new(host_alias, local_port, remote_host, remote_port);
        match &self.log_dir {
            Some(dir) => spec.with_log(dir.join(context.file_name("log"))),
            None => spec,
        }
    }
}
