pub mod config;
pub mod copy;
pub mod plan;
pub mod reconcile;
pub mod unlock;

use crate::Context;
use crate::config::PolsyncConfig;
use crate::paths;
use crate::progress::BatchSpinner;
use crate::ui;
use anyhow::{Context as _, Result};
use converge::{AuditLog, DiagnosticLog, MemoryDevice, RunContext};
use dialoguer::Confirm;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Append-only file opened on first write, so quiet runs leave no files.
struct LazyFile {
    path: PathBuf,
    file: Option<File>,
}

impl LazyFile {
    fn new(path: PathBuf) -> Self {
        Self { path, file: None }
    }

    fn open(&mut self) -> io::Result<&mut File> {
        if self.file.is_none() {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            self.file = Some(file);
        }
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::other("log file not open"))
    }
}

impl Write for LazyFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.open()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

/// A run context wired to the terminal, the audit trail and the diagnostic
/// side log. Returns the side log path for error messages.
pub fn run_context(ctx: &Context, config: &PolsyncConfig) -> Result<(RunContext, PathBuf)> {
    let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
    let diagnostics = config.logs_dir()?.join(format!("run-{stamp}.jsonl"));

    let mut run = RunContext::new()
        .with_first_batch_strict(config.first_batch_strict)
        .with_retry(config.retry_config())
        .with_diagnostics(DiagnosticLog::new(LazyFile::new(diagnostics.clone())))
        .with_observer(BatchSpinner::new(ctx.quiet));

    if config.audit {
        let audit = paths::state_dir()?.join("audit.jsonl");
        log::info!("Auditing requests to {}", audit.display());
        run = run.with_audit(AuditLog::new(LazyFile::new(audit)));
    }
    Ok((run, diagnostics))
}

/// Open the device snapshot as the configured principal.
pub fn open_device(path: &Path, config: &PolsyncConfig) -> Result<MemoryDevice> {
    MemoryDevice::load(path, config.principal())
        .with_context(|| format!("Could not open device snapshot {}", path.display()))
}

pub fn save_device(device: &MemoryDevice, path: &Path) -> Result<()> {
    device
        .save(path)
        .with_context(|| format!("Could not save device snapshot {}", path.display()))
}

/// Ask before mutating unless `--yes` was given or the run is quiet.
pub fn confirm(ctx: &Context, prompt: &str, yes: bool) -> Result<bool> {
    if yes || ctx.quiet {
        return Ok(true);
    }
    Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()
        .context("Failed to read confirmation")
}

/// Report a run-ending error with the advice for its category.
pub fn fatal(error: converge::Error, diagnostics: &Path) -> anyhow::Error {
    ui::error(&error.to_string());
    ui::dim(error.category().advice());
    if diagnostics.exists() {
        ui::dim(&format!("Details: {}", diagnostics.display()));
    }
    anyhow::Error::new(error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lazy_file_creates_nothing_until_written() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logs").join("run.jsonl");
        let mut file = LazyFile::new(path.clone());
        file.flush().unwrap();
        assert!(!path.exists());

        writeln!(file, "{{\"event\":\"request\"}}").unwrap();
        writeln!(file, "{{\"event\":\"response\"}}").unwrap();
        file.flush().unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), 2);
    }
}
