//! Prompts with a non-interactive fallback
//!
//! An interrupted prompt (Ctrl-C, Esc) counts as "no" or "nothing chosen".

use super::context::UiContext;
use crate::error::{KubehopError, KubehopResult};
use std::io;

fn interrupted<T>(result: io::Result<T>) -> KubehopResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(None),
        Err(e) => Err(KubehopError::User(format!("Prompt failed: {}", e))),
    }
}

/// Ask a yes/no question; never auto-approved
///
/// Without a terminal the default is returned.
pub async fn confirm(ctx: &UiContext, message: &str, default: bool) -> KubehopResult<bool> {
    if !ctx.is_interactive() {
        return Ok(default);
    }

    let message = message.to_string();
    let result = tokio::task::spawn_blocking(move || {
        cliclack::confirm(&message).initial_value(default).interact()
    })
    .await
    .map_err(|e| KubehopError::Internal(format!("Prompt task failed: {}", e)))?;

    Ok(interrupted(result)?.unwrap_or(false))
}

/// Confirm an advisory; `--yes` approves it, otherwise the default is no
pub async fn approve(ctx: &UiContext, message: &str) -> KubehopResult<bool> {
    if ctx.auto_yes() {
        println!("  {} (auto-approved)", message);
        return Ok(true);
    }
    confirm(ctx, message, false).await
}

/// Pick one of `options` (value, label, hint); `None` when cancelled
pub async fn select<T: Clone + Send + Eq + 'static>(
    ctx: &UiContext,
    message: &str,
    options: &[(T, String, String)],
) -> KubehopResult<Option<T>> {
    if options.is_empty() {
        return Ok(None);
    }
    if !ctx.is_interactive() {
        return Err(KubehopError::User(format!(
            "{} (needs a terminal; narrow the choice with --org and --host)",
            message.trim_end_matches(':')
        )));
    }

    let message = message.to_string();
    let items = options.to_vec();
    let result = tokio::task::spawn_blocking(move || {
        let mut select = cliclack::select(&message);
        for (value, label, hint) in items {
            select = select.item(value, label, hint);
        }
        select.interact()
    })
    .await
    .map_err(|e| KubehopError::Internal(format!("Select task failed: {}", e)))?;

    interrupted(result)
}
