//! Configuration schema for kubehop
//!
//! Configuration is stored at `~/.config/kubehop/config.toml`

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Remote k3s node settings
    pub remote: RemoteConfig,

    /// SSH connection settings
    pub ssh: SshSettings,

    /// Local tunnel port range
    pub ports: PortsConfig,

    /// Filesystem locations
    pub paths: PathsConfig,

    /// Private network hints
    pub network: NetworkConfig,
}

/// Remote k3s node settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Path of the kubeconfig on the remote node
    pub config_path: String,

    /// Kubernetes API port on the remote node
    pub api_port: u16,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            config_path: "/etc/rancher/k3s/k3s.yaml".to_string(),
            api_port: 6443,
        }
    }
}

/// SSH connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshSettings {
    /// Identity used when ssh_config names none
    pub key_path: PathBuf,

    /// OpenSSH client configuration to resolve host aliases from
    pub config_path: PathBuf,

    /// User when ssh_config names none
    pub default_user: String,

    /// Timeout for TCP connect and each SSH operation
    pub connect_timeout_secs: u64,

    /// Connection attempts before giving up
    pub connect_attempts: u32,

    /// Transfer attempts before giving up
    pub fetch_attempts: u32,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            key_path: PathBuf::from("~/.ssh/id_ed25519"),
            config_path: PathBuf::from("~/.ssh/config"),
            default_user: "ubuntu".to_string(),
            connect_timeout_secs: 10,
            connect_attempts: 3,
            fetch_attempts: 2,
        }
    }
}

/// Local port range for tunnels, `[range_start, range_start + range_size)`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortsConfig {
    pub range_start: u16,
    pub range_size: u16,
}

impl Default for PortsConfig {
    fn default() -> Self {
        Self {
            range_start: 16443,
            range_size: 10000,
        }
    }
}

/// Filesystem locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory holding `*_hosts.yml` inventories
    pub inventory: PathBuf,

    /// Tunnel state root (default: platform state dir)
    pub state_dir: Option<PathBuf>,

    /// Kubeconfig cache (default: platform cache dir)
    pub cache_dir: Option<PathBuf>,

    /// Merged kubeconfig (default: ~/.kube/config)
    pub kubeconfig: Option<PathBuf>,

    /// Where standalone `<org>_<host>.yml` backups are written
    pub backup_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            inventory: PathBuf::from("./inventory"),
            state_dir: None,
            cache_dir: None,
            kubeconfig: None,
            backup_dir: PathBuf::from("."),
        }
    }
}

/// Private network hints
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// `user@host` of the sshuttle gateway shown in advisories
    pub sshuttle_remote: Option<String>,
}
