//! Spinner shown while a batch is in flight

use crate::ui;
use colored::Colorize;
use converge::{BatchObserver, BatchOutcome, Error, Mode};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Reports batch progress on the terminal
pub struct BatchSpinner {
    bar: Option<ProgressBar>,
    quiet: bool,
}

impl BatchSpinner {
    pub fn new(quiet: bool) -> Self {
        Self { bar: None, quiet }
    }

    fn finish(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}

impl BatchObserver for BatchSpinner {
    fn on_batch_start(&mut self, label: &str, _operations: usize, mode: Mode) {
        self.finish();
        if self.quiet {
            return;
        }
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg} {elapsed:.dim}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_message(format!("{label} ({mode})"));
        bar.enable_steady_tick(Duration::from_millis(100));
        self.bar = Some(bar);
    }

    fn on_batch_complete(&mut self, outcome: &BatchOutcome) {
        self.finish();
        if self.quiet {
            return;
        }
        let timing = format!(
            "{} total, {} per operation",
            ui::format_duration(outcome.duration),
            ui::format_duration(outcome.average_per_operation())
        );
        if outcome.is_success() {
            ui::success(&format!("{} {}", outcome.label, timing.dimmed()));
        } else {
            ui::warn(&format!(
                "{}: {} of {} failed {}",
                outcome.label,
                outcome.failures.len().max(1),
                outcome.operations,
                timing.dimmed()
            ));
        }
    }

    fn on_batch_aborted(&mut self, label: &str, error: &Error) {
        if let Some(bar) = self.bar.take() {
            bar.abandon();
        }
        ui::error(&format!("{label}: {error}"));
    }
}

impl Drop for BatchSpinner {
    fn drop(&mut self) {
        self.finish();
    }
}
