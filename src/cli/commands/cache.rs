//! Cache command - inspect and clear cached kubeconfigs

use crate::cache::{CacheEntry, CacheStore, FsCacheStore};
use crate::cli::args::{CacheAction, CacheArgs, OutputFormat};
use crate::config::Config;
use crate::context::Context;
use crate::error::KubehopResult;
use crate::ui::{self, UiContext};
use console::style;

/// Execute the cache command
pub async fn execute(args: CacheArgs, config: &Config) -> KubehopResult<()> {
    let store = FsCacheStore::new(config.cache_dir());

    match args.action {
        CacheAction::List { format } => list(&store, format).await,
        CacheAction::Clear { context } => clear(&store, context.as_deref()).await,
    }
}

async fn list(store: &FsCacheStore, format: OutputFormat) -> KubehopResult<()> {
    let entries = store.list().await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
        OutputFormat::Plain => {
            for entry in &entries {
                println!("{}", entry.context);
            }
        }
        OutputFormat::Table if entries.is_empty() => {
            ui::step_info(&UiContext::detect(), "No cached kubeconfigs");
        }
        OutputFormat::Table => print_table(&entries),
    }
    Ok(())
}

fn print_table(entries: &[CacheEntry]) {
    println!(
        "{:<30} {:<10} {:<14} {:<16}",
        style("CONTEXT").bold(),
        style("SIZE").bold(),
        style("SHA256").bold(),
        style("UPDATED").bold()
    );
    println!("{}", "-".repeat(72));

    for entry in entries {
        let updated = entry
            .modified
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<30} {:<10} {:<14} {:<16}",
            entry.context,
            format_bytes(entry.size),
            &entry.sha256[..12.min(entry.sha256.len())],
            updated
        );
    }

    println!();
    println!("Total: {} entr{}", entries.len(), if entries.len() == 1 { "y" } else { "ies" });
}

async fn clear(store: &FsCacheStore, context: Option<&str>) -> KubehopResult<()> {
    let ctx = UiContext::detect();

    match context {
        Some(name) => {
            let context = Context::parse(name)?;
            if store.remove(&context).await? {
                ui::step_ok(&ctx, &format!("Removed cached kubeconfig for {}", context));
            } else {
                ui::step_info(&ctx, &format!("Nothing cached for {}", context));
            }
        }
        None => {
            let removed = store.clear().await?;
            ui::step_ok_detail(
                &ctx,
                &format!("Removed {} cached kubeconfig(s)", removed),
                &store.dir().display().to_string(),
            );
        }
    }
    Ok(())
}

/// Human-readable size, e.g. "2.9 KB"
fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;

    if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
