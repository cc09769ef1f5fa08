//! `polsync copy`: copy objects and their dependencies between scopes

use crate::Context;
use crate::cli::CopyArgs;
use crate::commands::reconcile::print_stats;
use crate::commands::{confirm, fatal, open_device, run_context, save_device};
use crate::config::PolsyncConfig;
use crate::ui;
use anyhow::Result;
use converge::{Action, CopyRequest, OperationList, RootSelector};

pub fn run(ctx: &Context, args: CopyArgs) -> Result<()> {
    let config = PolsyncConfig::load()?;
    let device_path = args.device.device;
    let mut device = open_device(&device_path, &config)?;

    let roots = match args.tag {
        Some(tag) => RootSelector::RulesTagged(tag),
        None => RootSelector::Objects(args.roots),
    };
    let mut request = CopyRequest {
        source: args.from,
        dest: args.to,
        roots,
        on_conflict: args.on_conflict.unwrap_or(config.on_conflict),
        position: args.position,
        mode: config.mode,
        failure_policy: args.failure_policy.unwrap_or(config.failure_policy),
        dry_run: true,
    };

    // Resolve first so the operator sees the closure before anything is locked.
    let (mut run, diagnostics) = run_context(ctx, &config)?;
    let preview = converge::copy_objects(&mut device, &mut run, &request)?;
    ui::header(&format!("Copy {} -> {}", request.source, request.dest));
    ui::kv("roots", &preview.roots.len().to_string());
    ui::kv("reused from ancestors", &preview.resolution.reused.len().to_string());
    ui::kv("already at destination", &preview.resolution.skipped.len().to_string());
    ui::kv("rule position", &request.position.to_string());
    print_operations(&preview.operations);
    let warnings: Vec<String> = preview
        .resolution
        .warnings
        .iter()
        .map(ToString::to_string)
        .collect();
    ui::warnings_summary(&warnings);

    if preview.operations.is_empty() {
        ui::success("Nothing to copy");
        return Ok(());
    }
    if args.dry_run {
        ui::info("Dry run, nothing submitted");
        return Ok(());
    }
    if !confirm(ctx, "Copy these objects?", args.yes)? {
        ui::info("Aborted");
        return Ok(());
    }

    request.dry_run = false;
    let result = converge::copy_objects(&mut device, &mut run, &request);
    save_device(&device, &device_path)?;
    let report = result.map_err(|e| fatal(e, &diagnostics))?;

    print_stats(&report.stats);
    if !report.placed.is_empty() && !ctx.quiet {
        ui::info(&format!(
            "Placed {} rules at {}",
            report.placed.len(),
            request.position
        ));
    }
    ui::warnings_summary(&report.warnings);
    if report.is_success() {
        ui::success(&format!(
            "Copied {} objects to {}",
            report.resolution.created.len(),
            request.dest
        ));
    } else {
        ui::warn(&format!(
            "Finished with {} failed operations and {} warnings",
            report.stats.failed,
            report.warnings.len()
        ));
    }
    Ok(())
}

fn print_operations(operations: &OperationList) {
    if operations.is_empty() {
        return;
    }
    ui::section(&format!("{} operations", operations.len()));
    for operation in operations {
        let text = format!("{} {}", operation.path.kind.info().display_name, operation.path.name);
        match operation.action {
            Action::Create => ui::added(&text),
            Action::Delete => ui::removed(&text),
        }
    }
}
