//! `polsync plan`: show what a reconcile would change

use crate::Context;
use crate::cli::PlanArgs;
use crate::commands::open_device;
use crate::config::PolsyncConfig;
use crate::desired;
use crate::ui;
use anyhow::Result;
use colored::Colorize;
use converge::{ChangeSet, ConfigObject, DiffSummary, ScopePlan};

pub fn run(ctx: &Context, args: PlanArgs) -> Result<()> {
    let config = PolsyncConfig::load()?;
    let desired = desired::load(&args.selection.desired)?;
    let mut device = open_device(&args.device.device, &config)?;

    let plans = converge::plan(
        &mut device,
        &args.selection.scopes,
        &args.selection.kinds,
        &desired,
    )?;

    ui::header("Plan");
    print_plans(&plans, args.diff);
    if !ctx.quiet {
        for plan in plans.iter().filter(|p| !p.is_empty()) {
            ui::section(&format!("{} batches for {}", plan.operations.batches().len(), plan.scope));
            for batch in plan.operations.batches() {
                ui::dim(&batch.label());
            }
        }
    }
    Ok(())
}

/// Print per-scope, per-kind change sets and the overall summary.
pub fn print_plans(plans: &[ScopePlan], with_diff: bool) {
    let mut total = DiffSummary::default();
    for plan in plans {
        let summary = plan.summary();
        if !summary.has_changes() && summary.collapsed == 0 {
            continue;
        }
        ui::section(&plan.scope.to_string());
        for change_set in &plan.change_sets {
            print_change_set(change_set, with_diff);
            total.add(change_set);
        }
    }

    println!();
    if total.has_changes() {
        println!(
            "{} to add, {} to replace, {} to remove",
            total.additions.to_string().green(),
            total.modifications.to_string().yellow(),
            total.removals.to_string().red()
        );
    } else {
        ui::success("Device already matches the declared state");
    }
}

fn print_change_set(change_set: &ChangeSet, with_diff: bool) {
    let info = change_set.kind.info();
    let summary = change_set.summary();
    if summary.has_changes() {
        println!("  {}", info.count(summary.total()).bold());
    }
    for object in change_set.added() {
        ui::added(&object.name);
    }
    for (old, new) in change_set.modified() {
        ui::modified(&new.name);
        if with_diff {
            show_object_diff(old, new);
        }
    }
    for object in change_set.removed() {
        ui::removed(&object.name);
    }
    if !change_set.collapsed.is_empty() {
        ui::dim(&format!("merged duplicates: {}", change_set.collapsed.join(", ")));
    }
}

fn render(object: &ConfigObject) -> String {
    serde_json::to_string_pretty(&object.spec).unwrap_or_else(|e| format!("<{e}>")) + "\n"
}

/// Line diff of two versions of an object using the `similar` crate
fn show_object_diff(old: &ConfigObject, new: &ConfigObject) {
    let (old, new) = (render(old), render(new));
    let diff = similar::TextDiff::from_lines(&old, &new);
    for change in diff.iter_all_changes() {
        match change.tag() {
            similar::ChangeTag::Delete => print!("        {}", format!("- {change}").red()),
            similar::ChangeTag::Insert => print!("        {}", format!("+ {change}").green()),
            similar::ChangeTag::Equal => {}
        }
    }
}
