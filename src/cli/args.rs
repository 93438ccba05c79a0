//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use std::path::PathBuf;

/// kubehop - k3s kubeconfigs over SSH
///
/// Fetches a cluster's kubeconfig from a host in your Ansible inventory,
/// merges it into your kubeconfig, and keeps an SSH tunnel to its API server.
#[derive(Parser, Debug)]
#[command(name = "kubehop")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute (defaults to fetch)
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "KUBEHOP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Also write logs to this file
    #[arg(long, global = true, env = "KUBEHOP_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Log format on stderr
    #[arg(long, global = true, default_value = "text")]
    pub log_format: LogFormat,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch a host's kubeconfig and set up its tunnel
    Fetch(FetchArgs),

    /// Manage SSH tunnels
    Tunnels(TunnelsArgs),

    /// Manage cached kubeconfigs
    Cache(CacheArgs),

    /// Show or initialize configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions {
        /// Target shell
        shell: Shell,
    },
}

/// Arguments for the fetch command
#[derive(Parser, Debug, Default)]
pub struct FetchArgs {
    /// Only consider this organization's inventory
    #[arg(short, long)]
    pub org: Option<String>,

    /// Only consider hosts with this alias
    #[arg(long)]
    pub host: Option<String>,

    /// Use the node's internal address instead of a tunnel
    #[arg(long)]
    pub direct: bool,

    /// Approve VPN and sshuttle checks without asking
    #[arg(short, long)]
    pub yes: bool,
}

/// Arguments for the tunnels command
#[derive(Parser, Debug)]
pub struct TunnelsArgs {
    #[command(subcommand)]
    pub action: TunnelsAction,
}

/// Tunnel subcommands
#[derive(Subcommand, Debug)]
pub enum TunnelsAction {
    /// List recorded tunnels
    List {
        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Stop the tunnel of one context
    Kill {
        /// Context name, e.g. acme-prod1
        context: String,
    },

    /// Stop every recorded tunnel
    KillAll,
}

/// Arguments for the cache command
#[derive(Parser, Debug)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache subcommands
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// List cached kubeconfigs
    List {
        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Remove one cached kubeconfig, or all of them
    Clear {
        /// Context name; omit to clear everything
        context: Option<String>,
    },
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show,

    /// Show configuration file path
    Path,

    /// Write a default configuration file
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },
}

/// Output format for list commands
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// One name per line
    Plain,
}

/// Format of log lines on stderr
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}
