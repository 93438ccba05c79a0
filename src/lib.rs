//! kubehop - k3s kubeconfigs over SSH
//!
//! Fetches `/etc/rancher/k3s/k3s.yaml` from an inventory host, caches it by
//! content hash, merges it into the local kubeconfig under
//! `<organization>-<host>`, and keeps an `ssh -L` tunnel to the API server
//! on a port derived from that name.

pub mod cache;
pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod fsutil;
pub mod inventory;
pub mod kubeconfig;
pub mod orchestrator;
pub mod ssh;
pub mod tunnel;
pub mod ui;

pub use context::Context;
pub use error::{KubehopError, KubehopResult};
