//! Local port forwarding to cluster API servers
//!
//! Each context gets a deterministic local port and at most one `ssh -L`
//! process, tracked by a PID record that outlives kubehop itself.

pub mod port;
pub mod process;
pub mod state;
pub mod supervisor;

pub use port::{allocate, PortRange};
pub use process::{ProcessControl, SystemProcesses, TunnelSpec};
pub use state::{FsPidStore, MemoryPidStore, PidStore, TunnelRecord};
pub use supervisor::{
    EnsureOutcome, KillOutcome, KillReport, TunnelState, TunnelStatus, TunnelSupervisor,
};
