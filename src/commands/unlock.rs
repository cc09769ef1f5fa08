//! `polsync unlock`: manual recovery after an aborted run

use crate::Context;
use crate::cli::UnlockArgs;
use crate::commands::{open_device, save_device};
use crate::config::PolsyncConfig;
use crate::ui;
use anyhow::{Result, bail};

pub fn run(ctx: &Context, args: UnlockArgs) -> Result<()> {
    let config = PolsyncConfig::load()?;
    let mut device = open_device(&args.device.device, &config)?;

    let report = converge::unlock(&mut device, &args.scopes);
    save_device(&device, &args.device.device)?;

    if !ctx.quiet {
        for lock in &report.released {
            ui::success(&format!("Released {} lock on {}", lock.kind, lock.scope));
        }
        if report.released.is_empty() && report.release_failures.is_empty() {
            ui::info("No locks held");
        }
    }
    if !report.release_failures.is_empty() {
        for failure in &report.release_failures {
            ui::error(failure);
        }
        bail!("{} locks could not be released", report.release_failures.len());
    }
    Ok(())
}
