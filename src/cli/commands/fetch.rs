//! Fetch command - pick a host, merge its kubeconfig, start its tunnel

use crate::cli::args::FetchArgs;
use crate::config::{Config, ConfigManager};
use crate::error::KubehopResult;
use crate::inventory::load_inventories;
use crate::kubeconfig::Endpoint;
use crate::orchestrator::{
    FetchOptions, FetchReport, InteractiveOperator, Orchestrator, RunOutcome, TunnelReport,
};
use crate::ui::{self, UiContext};
use tracing::debug;

/// How a fetch ended, for the exit code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    Completed,
    Cancelled,
    Aborted,
}

/// Execute the fetch command
pub async fn execute(args: FetchArgs, config: &Config) -> KubehopResult<FetchStatus> {
    let ctx = UiContext::detect().with_auto_yes(args.yes);
    ui::intro(&ctx, "kubehop");

    let inventory_dir = config.inventory_dir();
    debug!("Loading inventories from {}", inventory_dir.display());
    let inventories = load_inventories(&inventory_dir).await?;

    ConfigManager::ensure_state_dirs(config).await?;

    let operator = Box::new(InteractiveOperator::new(ctx.clone()));
    let orchestrator = Orchestrator::from_config(config.clone(), ctx.clone(), operator).await?;
    let options = FetchOptions {
        organization: args.org,
        host: args.host,
        direct: args.direct,
    };

    match orchestrator.run(&inventories, &options).await? {
        RunOutcome::Completed(report) => {
            print_summary(&ctx, &report);
            Ok(FetchStatus::Completed)
        }
        RunOutcome::Cancelled => {
            ui::outro_warn(&ctx, "Cancelled");
            Ok(FetchStatus::Cancelled)
        }
        RunOutcome::Aborted => {
            ui::outro_warn(&ctx, "Aborted");
            Ok(FetchStatus::Aborted)
        }
    }
}

fn print_summary(ctx: &UiContext, report: &FetchReport) {
    ui::key_value(ctx, "Context", report.context.as_str());
    ui::key_value(ctx, "Server", &report.endpoint.to_string());
    ui::key_value(ctx, "Kubeconfig", &report.kubeconfig.display().to_string());
    if let Some(backup) = &report.backup {
        ui::key_value(ctx, "Backup", &backup.display().to_string());
    }

    match (&report.endpoint, &report.tunnel) {
        (Endpoint::Direct { .. }, _) => {
            ui::outro_success(ctx, &format!("{} ready (direct)", report.context))
        }
        (_, TunnelReport::Failed { .. }) => ui::outro_warn(
            ctx,
            &format!("{} merged, start the tunnel before using it", report.context),
        ),
        _ => ui::outro_success(
            ctx,
            &format!("{} ready: kubectl --context {} get nodes", report.context, report.context),
        ),
    }
}
