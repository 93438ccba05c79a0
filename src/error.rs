//! Error types for kubehop
//!
//! All modules use `KubehopResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for kubehop operations
pub type KubehopResult<T> = Result<T, KubehopError>;

/// All errors that can occur in kubehop
#[derive(Error, Debug)]
pub enum KubehopError {
    // Remote errors
    #[error("SSH connection to {host}:{port} failed: {reason}")]
    ConnectionFailure {
        host: String,
        port: u16,
        reason: String,
        retryable: bool,
    },

    #[error("Could not compute remote hash for {path}")]
    HashUnavailable { path: String },

    #[error("Failed to transfer {path}: {reason}")]
    TransferFailure {
        path: String,
        reason: String,
        retryable: bool,
    },

    #[error("Could not detect an internal IPv4 address on the remote host")]
    InternalAddressUnavailable,

    #[error("Invalid ssh_config: {0}")]
    SshConfigInvalid(String),

    // Kubeconfig errors
    #[error("Malformed kubeconfig: {0}")]
    MalformedDocument(String),

    #[error("Failed to merge into {path}: {reason}")]
    MergeFailure { path: PathBuf, reason: String },

    // Tunnel errors
    #[error("Failed to create tunnel on local port {port}: {reason}")]
    TunnelCreationFailure { port: u16, reason: String },

    #[error("No free local port in range {start}..{end}")]
    PortRangeExhausted { start: u16, end: u32 },

    #[error("Invalid port range: start {start}, size {size}")]
    InvalidPortRange { start: u32, size: u32 },

    #[error("Invalid context name: {0:?}")]
    InvalidContext(String),

    // Inventory errors
    #[error("No inventories found in {0}")]
    NoInventories(PathBuf),

    #[error("No hosts found in {0} inventory")]
    NoHosts(String),

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    User(String),
}

impl KubehopError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Check if error is worth retrying with backoff
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailure {
                retryable: true,
                ..
            } | Self::TransferFailure {
                retryable: true,
                ..
            }
        )
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::ConnectionFailure {
                retryable: false, ..
            } => Some("Check that `ssh <host>` works and your key is loaded (ssh-add -l)"),
            Self::ConnectionFailure { .. } => {
                Some("Check VPN/sshuttle and that the host is reachable")
            }
            Self::TransferFailure { .. } => {
                Some("The remote user needs read access to the k3s kubeconfig")
            }
            Self::PortRangeExhausted { .. } => Some("Run: kubehop tunnels kill-all"),
            Self::InvalidPortRange { .. } => {
                Some("Set ports.range_start and ports.range_size within 1..=65535")
            }
            Self::MergeFailure { .. } => {
                Some("The standalone backup file still holds the rewritten kubeconfig")
            }
            Self::NoInventories(_) => Some("Set paths.inventory or INVENTORY_PATH"),
            Self::ConfigInvalid { .. } => Some("Fix the file, or reset it with: kubehop config init --force"),
            _ => None,
        }
    }
}
