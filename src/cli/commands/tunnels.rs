//! Tunnels command - list and stop tunnels

use crate::cli::args::{OutputFormat, TunnelsAction, TunnelsArgs};
use crate::config::Config;
use crate::context::Context;
use crate::error::KubehopResult;
use crate::tunnel::{KillOutcome, TunnelStatus, TunnelSupervisor};
use crate::ui::{self, UiContext};
use console::style;

/// Execute the tunnels command
pub async fn execute(args: TunnelsArgs, config: &Config) -> KubehopResult<()> {
    let supervisor = TunnelSupervisor::from_config(config);

    match args.action {
        TunnelsAction::List { format } => list(&supervisor, format).await,
        TunnelsAction::Kill { context } => kill(&supervisor, &context).await,
        TunnelsAction::KillAll => kill_all(&supervisor).await,
    }
}

async fn list(supervisor: &TunnelSupervisor, format: OutputFormat) -> KubehopResult<()> {
    let tunnels = supervisor.list().await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&tunnels)?),
        OutputFormat::Plain => {
            for tunnel in &tunnels {
                println!("{}", tunnel.record.context);
            }
        }
        OutputFormat::Table if tunnels.is_empty() => {
            ui::step_info(&UiContext::detect(), "No tunnels recorded");
        }
        OutputFormat::Table => print_table(&tunnels),
    }
    Ok(())
}

fn print_table(tunnels: &[TunnelStatus]) {
    println!(
        "{:<30} {:<8} {:<8} {:<24} {:<10} {:<16}",
        style("CONTEXT").bold(),
        style("PID").bold(),
        style("PORT").bold(),
        style("FORWARD").bold(),
        style("STATUS").bold(),
        style("STARTED").bold()
    );
    println!("{}", "-".repeat(100));

    for tunnel in tunnels {
        let record = &tunnel.record;
        let status = if tunnel.alive {
            style("running").green()
        } else {
            style("exited").dim()
        };
        println!(
            "{:<30} {:<8} {:<8} {:<24} {:<10} {:<16}",
            record.context,
            record.pid,
            record.local_port,
            format!("{}:{}", record.remote_host, record.remote_port),
            status,
            record.created_at.format("%Y-%m-%d %H:%M"),
        );
    }

    println!();
    println!("{} tunnel(s)", tunnels.len());
}

async fn kill(supervisor: &TunnelSupervisor, context: &str) -> KubehopResult<()> {
    let ctx = UiContext::detect();
    let context = Context::parse(context)?;

    match supervisor.kill(&context).await? {
        KillOutcome::Terminated(record) => ui::step_ok(
            &ctx,
            &format!("Stopped tunnel for {} (pid {})", context, record.pid),
        ),
        KillOutcome::Stale(_) => ui::step_info(
            &ctx,
            &format!("Tunnel for {} had already exited, record removed", context),
        ),
        KillOutcome::Absent => ui::step_info(&ctx, &format!("No tunnel recorded for {}", context)),
    }
    Ok(())
}

async fn kill_all(supervisor: &TunnelSupervisor) -> KubehopResult<()> {
    let ctx = UiContext::detect();
    let report = supervisor.kill_all().await?;

    for context in &report.terminated {
        ui::step_ok(&ctx, &format!("Stopped {}", context));
    }
    for context in &report.stale {
        ui::remark(&ctx, &format!("{} had already exited", context));
    }
    for (context, reason) in &report.failures {
        ui::step_error_detail(&ctx, &format!("Could not stop {}", context), reason);
    }

    if report.terminated.is_empty() && report.stale.is_empty() && report.failures.is_empty() {
        ui::step_info(&ctx, "No tunnels recorded");
    }
    Ok(())
}
