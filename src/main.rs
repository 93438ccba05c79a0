//! kubehop - k3s kubeconfigs over SSH
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use kubehop::cli::commands::{self, FetchStatus};
use kubehop::cli::{Cli, Commands, LogFormat};
use kubehop::config::ConfigManager;
use kubehop::error::{KubehopError, KubehopResult};
use std::fs::OpenOptions;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Mutex;
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const EXIT_ABORTED: u8 = 2;
const EXIT_INTERRUPTED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.verbose, cli.log_format, cli.log_file.as_deref()) {
        report(&e);
        return ExitCode::FAILURE;
    }

    tokio::select! {
        result = run(cli) => match result {
            Ok(code) => code,
            Err(e) => {
                report(&e);
                ExitCode::FAILURE
            }
        },
        Ok(()) = tokio::signal::ctrl_c() => {
            eprintln!();
            eprintln!("{} Interrupted", style("!").yellow());
            ExitCode::from(EXIT_INTERRUPTED)
        }
    }
}

fn report(e: &KubehopError) {
    eprintln!("{} {}", style("Error:").red().bold(), e);
    if let Some(hint) = e.hint() {
        eprintln!("{} {}", style("Hint:").yellow(), hint);
    }
}

/// 0 = warn, 1 = info, 2+ = debug; `KUBEHOP_LOG` takes precedence
fn init_logging(verbose: u8, format: LogFormat, log_file: Option<&Path>) -> KubehopResult<()> {
    let level = match verbose {
        0 => "kubehop=warn",
        1 => "kubehop=info",
        _ => "kubehop=debug",
    };
    let filter = EnvFilter::try_from_env("KUBEHOP_LOG").unwrap_or_else(|_| EnvFilter::new(level));

    let (text, json) = match format {
        LogFormat::Text => (
            Some(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false)
                    .without_time(),
            ),
            None,
        ),
        LogFormat::Json => (None, Some(fmt::layer().json().with_writer(std::io::stderr))),
    };

    let file = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|e| {
                    KubehopError::io(format!("creating log directory {}", parent.display()), e)
                })?;
            }
            let handle = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| KubehopError::io(format!("opening log file {}", path.display()), e))?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(handle)))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(text)
        .with(json)
        .with(file)
        .init();
    Ok(())
}

async fn run(cli: Cli) -> KubehopResult<ExitCode> {
    let manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    debug!("Using config {}", manager.path().display());

    let command = cli.command.unwrap_or_else(|| Commands::Fetch(Default::default()));

    // Commands that must work without a valid config
    let command = match command {
        Commands::Completions { shell } => {
            commands::completions(shell);
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Config(args) => {
            commands::config(args, &manager).await?;
            return Ok(ExitCode::SUCCESS);
        }
        other => other,
    };

    let config = manager.load().await?;

    match command {
        Commands::Fetch(args) => {
            kubehop::ui::init_theme();
            match commands::fetch(args, &config).await? {
                FetchStatus::Completed | FetchStatus::Cancelled => Ok(ExitCode::SUCCESS),
                FetchStatus::Aborted => Ok(ExitCode::from(EXIT_ABORTED)),
            }
        }
        Commands::Tunnels(args) => commands::tunnels(args, &config).await.map(|()| ExitCode::SUCCESS),
        Commands::Cache(args) => commands::cache(args, &config).await.map(|()| ExitCode::SUCCESS),
        Commands::Completions { .. } | Commands::Config(_) => Ok(ExitCode::SUCCESS),
    }
}
