//! Host alias resolution from the OpenSSH client configuration
//!
//! Parsing and `Host` pattern matching come from `ssh2_config`. This module
//! only fills the gaps: default user and key, and turning `ProxyCommand` or
//! `ProxyJump` into the command that carries the transport.

use crate::config::expand_tilde;
use crate::error::{KubehopError, KubehopResult};
use ssh2_config::ParseRule;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Everything needed to open an SSH session to one host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    /// Alias as written in the inventory
    pub alias: String,
    pub hostname: String,
    pub port: u16,
    pub user: String,
    /// Candidate keys, tried in order before the agent
    pub identity_files: Vec<PathBuf>,
    /// Command whose stdio carries the SSH transport
    pub proxy_command: Option<String>,
}

/// Parsed ssh_config
#[derive(Default)]
pub struct SshConfig {
    inner: ssh2_config::SshConfig,
}

impl SshConfig {
    /// Load from disk
    ///
    /// A missing or unparsable file yields an empty config, so aliases
    /// resolve to themselves with the configured defaults.
    pub async fn load(path: &Path) -> KubehopResult<Self> {
        if !path.exists() {
            debug!("No ssh config at {}", path.display());
            return Ok(Self::default());
        }
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| KubehopError::io(format!("reading {}", path.display()), e))?;
        match Self::parse(&content) {
            Ok(config) => Ok(config),
            Err(e) => {
                warn!("Ignoring {}: {}", path.display(), e);
                Ok(Self::default())
            }
        }
    }

    pub fn parse(content: &str) -> KubehopResult<Self> {
        let mut reader = BufReader::new(content.as_bytes());
        let inner = ssh2_config::SshConfig::default()
            .parse(&mut reader, ParseRule::ALLOW_UNSUPPORTED_FIELDS)
            .map_err(|e| KubehopError::SshConfigInvalid(e.to_string()))?;
        Ok(Self { inner })
    }

    /// Resolve an alias into connection parameters
    ///
    /// `default_user` and `default_key` fill in what the config leaves
    /// unset; the default key is only offered when it exists on disk.
    pub fn resolve(&self, alias: &str, default_user: &str, default_key: &Path) -> ConnectParams {
        let params = self.inner.query(alias);

        let hostname = params
            .host_name
            .map(|h| h.replace("%h", alias))
            .unwrap_or_else(|| alias.to_string());

        let mut identity_files: Vec<PathBuf> = params
            .identity_file
            .unwrap_or_default()
            .iter()
            .map(|f| expand_tilde(f))
            .collect();
        if identity_files.is_empty() && default_key.exists() {
            identity_files.push(default_key.to_path_buf());
        }

        // Not modelled by the parser; kept verbatim in the unsupported fields
        let proxy_command = params
            .unsupported_fields
            .get("proxycommand")
            .map(|words| words.join(" "));
        let proxy_jump = params.proxy_jump.map(|hops| hops.join(","));

        // ProxyCommand wins over ProxyJump, "none" disables both
        let proxy_command = match (proxy_command, proxy_jump) {
            (Some(cmd), _) if !cmd.eq_ignore_ascii_case("none") => Some(cmd),
            (Some(_), _) => None,
            (None, Some(jump)) if !jump.eq_ignore_ascii_case("none") => {
                Some(jump_command(&jump))
            }
            _ => None,
        };

        ConnectParams {
            alias: alias.to_string(),
            hostname,
            port: params.port.unwrap_or(22),
            user: params.user.unwrap_or_else(|| default_user.to_string()),
            identity_files,
            proxy_command,
        }
    }
}

/// `ProxyJump a,b` reaches `b` through `a`; the last hop carries the -W forward
fn jump_command(jump: &str) -> String {
    let hops: Vec<&str> = jump
        .split(',')
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .collect();
    match hops.split_last() {
        Some((last, [])) => format!("ssh -o BatchMode=yes -W %h:%p {}", last),
        Some((last, earlier)) => format!(
            "ssh -o BatchMode=yes -J {} -W %h:%p {}",
            earlier.join(","),
            last
        ),
        None => format!("ssh -o BatchMode=yes -W %h:%p {}", jump.trim()),
    }
}
