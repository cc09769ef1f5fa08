//! `polsync reconcile`: converge the device to the declared objects

use crate::Context;
use crate::cli::ReconcileArgs;
use crate::commands::plan::print_plans;
use crate::commands::{confirm, fatal, open_device, run_context, save_device};
use crate::config::PolsyncConfig;
use crate::desired;
use crate::ui;
use anyhow::Result;
use converge::{ReconcileRequest, RunStats};

pub fn run(ctx: &Context, args: ReconcileArgs) -> Result<()> {
    let config = PolsyncConfig::load()?;
    let desired = desired::load(&args.selection.desired)?;
    let device_path = args.device.device;
    let mut device = open_device(&device_path, &config)?;

    let plans = converge::plan(
        &mut device,
        &args.selection.scopes,
        &args.selection.kinds,
        &desired,
    )?;
    ui::header("Reconcile");
    print_plans(&plans, false);
    if !plans.iter().any(|p| !p.is_empty()) {
        return Ok(());
    }
    if args.dry_run {
        ui::info("Dry run, nothing submitted");
        return Ok(());
    }
    if !confirm(ctx, "Apply these changes?", args.yes)? {
        ui::info("Aborted");
        return Ok(());
    }

    let request = ReconcileRequest {
        scopes: args.selection.scopes,
        kinds: args.selection.kinds,
        desired,
        mode: args.mode.unwrap_or(config.mode),
        failure_policy: args.failure_policy.unwrap_or(config.failure_policy),
        dry_run: false,
    };
    let (mut run, diagnostics) = run_context(ctx, &config)?;
    let result = converge::reconcile(&mut device, &mut run, &request);

    // Locks left by an aborted run must survive in the snapshot.
    save_device(&device, &device_path)?;
    let report = result.map_err(|e| fatal(e, &diagnostics))?;

    print_stats(&report.stats);
    ui::warnings_summary(&report.warnings);
    if report.is_success() {
        ui::success("Device converged");
    } else {
        ui::warn(&format!(
            "Finished with {} failed operations",
            report.stats.failed
        ));
    }
    Ok(())
}

pub fn print_stats(stats: &RunStats) {
    ui::section("Statistics");
    ui::kv("batches", &stats.batches.to_string());
    ui::kv("operations", &stats.operations.to_string());
    ui::kv("applied", &stats.applied.to_string());
    if stats.already_absent > 0 {
        ui::kv("already absent", &stats.already_absent.to_string());
    }
    if stats.failed > 0 {
        ui::kv("failed", &stats.failed.to_string());
    }
    ui::kv("time", &ui::format_duration(stats.duration));
}
