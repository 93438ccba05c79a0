//! Operator-facing output
//!
//! `cliclack` framing and prompts on a terminal, tagged plain lines
//! (`[OK]`, `[WARN]`, `[FAIL]`) everywhere else.
//!
//! ```rust,ignore
//! let ctx = UiContext::detect().with_auto_yes(args.yes);
//! ui::intro(&ctx, "kubehop");
//! let mut spinner = TaskSpinner::new(&ctx);
//! spinner.start("Connecting to prod1...");
//! spinner.stop("Connected");
//! if ui::approve(&ctx, "Are you connected to the VPN?").await? { /* ... */ }
//! ```

mod context;
mod output;
mod progress;
mod prompts;
mod theme;

pub use context::UiContext;
pub use output::{
    intro, key_value, outro_success, outro_warn, remark, step_error_detail, step_info, step_ok,
    step_ok_detail, step_warn, step_warn_hint,
};
pub use progress::TaskSpinner;
pub use prompts::{approve, confirm, select};
pub use theme::{init_theme, KubehopTheme};
