//! Configuration management for kubehop
//!
//! Values are layered: environment override > config file > built-in
//! default. Numeric settings given as strings (in the file or the
//! environment) are coerced to integers; a value that does not parse stays a
//! string and is rejected when the typed [`Config`] is built.

pub mod schema;

pub use schema::Config;

use crate::error::{KubehopError, KubehopResult};
use crate::tunnel::PortRange;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info};

/// An environment variable that overrides one config key
#[derive(Debug, Clone, Copy)]
pub struct EnvOverride {
    pub var: &'static str,
    pub section: &'static str,
    pub key: &'static str,
    pub numeric: bool,
}

/// Environment overrides, applied in order after the config file
pub const ENV_OVERRIDES: &[EnvOverride] = &[
    EnvOverride { var: "REMOTE_K3S_CONFIG_PATH", section: "remote", key: "config_path", numeric: false },
    EnvOverride { var: "K3S_API_PORT", section: "remote", key: "api_port", numeric: true },
    EnvOverride { var: "SSH_KEY_PATH", section: "ssh", key: "key_path", numeric: false },
    EnvOverride { var: "SSH_CONFIG_PATH", section: "ssh", key: "config_path", numeric: false },
    EnvOverride { var: "PORT_RANGE_START", section: "ports", key: "range_start", numeric: true },
    EnvOverride { var: "PORT_RANGE_SIZE", section: "ports", key: "range_size", numeric: true },
    EnvOverride { var: "INVENTORY_PATH", section: "paths", key: "inventory", numeric: false },
    EnvOverride { var: "KUBEHOP_STATE_DIR", section: "paths", key: "state_dir", numeric: false },
    EnvOverride { var: "KUBEHOP_CACHE_DIR", section: "paths", key: "cache_dir", numeric: false },
    EnvOverride { var: "KUBEHOP_KUBECONFIG", section: "paths", key: "kubeconfig", numeric: false },
    EnvOverride { var: "KUBEHOP_BACKUP_DIR", section: "paths", key: "backup_dir", numeric: false },
    EnvOverride { var: "SSHUTTLE_REMOTE", section: "network", key: "sshuttle_remote", numeric: false },
];

/// Configuration manager
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new config manager with default path
    pub fn new() -> Self {
        Self {
            config_path: Self::default_config_path(),
        }
    }

    /// Create a config manager with a custom path
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("kubehop")
            .join("config.toml")
    }

    /// Get the default state directory path
    pub fn default_state_dir() -> PathBuf {
        dirs::state_dir()
            .or_else(dirs::data_local_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("kubehop")
    }

    /// Get the default kubeconfig cache directory path
    pub fn default_cache_dir() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("kubehop")
    }

    /// Load configuration from the file and the process environment
    pub async fn load(&self) -> KubehopResult<Config> {
        self.load_with_env(|var| std::env::var(var).ok()).await
    }

    /// Load configuration, resolving overrides through `lookup`
    pub async fn load_with_env<F>(&self, lookup: F) -> KubehopResult<Config>
    where
        F: Fn(&str) -> Option<String>,
    {
        let table = self.layered_table(lookup).await?;
        toml::Value::Table(table)
            .try_into()
            .map_err(|e: toml::de::Error| KubehopError::ConfigInvalid {
                path: self.config_path.clone(),
                reason: e.to_string(),
            })
    }

    /// Raw, untyped view of file values with overrides applied
    pub async fn layered_table<F>(&self, lookup: F) -> KubehopResult<toml::Table>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut table = self.read_table().await?;
        normalize_numeric(&mut table);
        apply_env_overrides(&mut table, lookup);
        Ok(table)
    }

    async fn read_table(&self) -> KubehopResult<toml::Table> {
        if !self.config_path.exists() {
            debug!("Config file not found, using defaults");
            return Ok(toml::Table::new());
        }

        let content = fs::read_to_string(&self.config_path).await.map_err(|e| {
            KubehopError::io(
                format!("reading config from {}", self.config_path.display()),
                e,
            )
        })?;

        content
            .parse::<toml::Table>()
            .map_err(|e| KubehopError::ConfigInvalid {
                path: self.config_path.clone(),
                reason: e.to_string(),
            })
    }

    /// Save configuration to file
    pub async fn save(&self, config: &Config) -> KubehopResult<()> {
        self.ensure_config_dir().await?;

        let content = toml::to_string_pretty(config)?;
        fs::write(&self.config_path, content).await.map_err(|e| {
            KubehopError::io(
                format!("writing config to {}", self.config_path.display()),
                e,
            )
        })?;

        info!("Configuration saved to {}", self.config_path.display());
        Ok(())
    }

    /// Ensure the config directory exists
    async fn ensure_config_dir(&self) -> KubehopResult<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| KubehopError::ConfigDirCreate {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }
        Ok(())
    }

    /// Ensure tunnel state and cache directories exist
    pub async fn ensure_state_dirs(config: &Config) -> KubehopResult<()> {
        let dirs = [config.tunnels_dir(), config.cache_dir()];

        for dir in &dirs {
            fs::create_dir_all(dir).await.map_err(|e| {
                KubehopError::io(format!("creating directory {}", dir.display()), e)
            })?;
        }

        // The cache holds cluster-admin credentials
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o700);
            std::fs::set_permissions(config.cache_dir(), perms)
                .map_err(|e| KubehopError::io("setting cache dir permissions", e))?;
        }

        Ok(())
    }

    /// Get the config file path
    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// Directory holding one tunnel record per context
    pub fn tunnels_dir(&self) -> PathBuf {
        self.paths
            .state_dir
            .as_deref()
            .map(expand_tilde)
            .unwrap_or_else(ConfigManager::default_state_dir)
            .join("tunnels")
    }

    /// Directory holding one cached kubeconfig per context
    pub fn cache_dir(&self) -> PathBuf {
        self.paths
            .cache_dir
            .as_deref()
            .map(expand_tilde)
            .unwrap_or_else(ConfigManager::default_cache_dir)
    }

    /// The shared kubeconfig that fetched clusters are merged into
    pub fn kubeconfig_path(&self) -> PathBuf {
        match self.paths.kubeconfig.as_deref() {
            Some(path) => expand_tilde(path),
            None => dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".kube")
                .join("config"),
        }
    }

    pub fn inventory_dir(&self) -> PathBuf {
        expand_tilde(&self.paths.inventory)
    }

    pub fn backup_dir(&self) -> PathBuf {
        expand_tilde(&self.paths.backup_dir)
    }

    pub fn ssh_config_path(&self) -> PathBuf {
        expand_tilde(&self.ssh.config_path)
    }

    pub fn default_key_path(&self) -> PathBuf {
        expand_tilde(&self.ssh.key_path)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.ssh.connect_timeout_secs.max(1))
    }

    /// Validated tunnel port range
    pub fn port_range(&self) -> KubehopResult<PortRange> {
        PortRange::new(self.ports.range_start, self.ports.range_size)
    }
}

/// Expand a leading `~` to the user's home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match dirs::home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}

/// Coerce a string to an integer value, keeping the raw string on failure
fn coerce_numeric(raw: &str) -> toml::Value {
    match raw.trim().parse::<i64>() {
        Ok(n) => toml::Value::Integer(n),
        Err(_) => toml::Value::String(raw.to_string()),
    }
}

/// Normalize numeric keys that the file spells as strings
fn normalize_numeric(table: &mut toml::Table) {
    for ov in ENV_OVERRIDES.iter().filter(|ov| ov.numeric) {
        let Some(toml::Value::Table(section)) = table.get_mut(ov.section) else {
            continue;
        };
        if let Some(toml::Value::String(raw)) = section.get(ov.key) {
            let coerced = coerce_numeric(raw);
            section.insert(ov.key.to_string(), coerced);
        }
    }
}

fn apply_env_overrides<F>(table: &mut toml::Table, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    for ov in ENV_OVERRIDES {
        let Some(raw) = lookup(ov.var) else {
            continue;
        };
        let value = if ov.numeric {
            coerce_numeric(&raw)
        } else {
            toml::Value::String(raw)
        };
        debug!("{} overrides {}.{}", ov.var, ov.section, ov.key);

        let section = table
            .entry(ov.section.to_string())
            .or_insert(toml::Value::Table(toml::Table::new()));
        if let toml::Value::Table(section) = section {
            section.insert(ov.key.to_string(), value);
        }
    }
}
