//! Batch transaction executor
//!
//! Submits one ordered batch at a time to a scope, applying the retry
//! settings, the first-batch strictness and the failure policy carried by the
//! [`RunContext`].

use crate::audit::{AuditLog, DiagnosticLog};
use crate::error::{Error, Result};
use crate::retry::{LogCallback, RetryConfig, with_retry};
use crate::transport::{BatchResponse, NOT_FOUND, Transport};
use crate::types::{Action, FailurePolicy, Mode, ObjectPath, OperationList, Scope};
use std::fmt;
use std::time::{Duration, Instant};

/// Receives batch progress notifications
///
/// Implement this trait to show progress while batches are in flight.
pub trait BatchObserver {
    /// Called before a batch is sent
    fn on_batch_start(&mut self, label: &str, operations: usize, mode: Mode);

    /// Called when a batch finished, successfully or under the soft policy
    fn on_batch_complete(&mut self, outcome: &BatchOutcome);

    /// Called when a batch ends the run
    fn on_batch_aborted(&mut self, _label: &str, _error: &Error) {}
}

/// Observer that ignores everything
pub struct NoProgress;

impl BatchObserver for NoProgress {
    fn on_batch_start(&mut self, _label: &str, _operations: usize, _mode: Mode) {}
    fn on_batch_complete(&mut self, _outcome: &BatchOutcome) {}
}

/// A failed operation inside a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationFailure {
    pub seq: u32,
    pub path: Option<ObjectPath>,
    pub code: Option<String>,
    pub message: String,
}

impl fmt::Display for OperationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} ", self.seq)?;
        match &self.path {
            Some(path) => write!(f, "{path}")?,
            None => f.write_str("?")?,
        }
        write!(f, ": {}", self.message)
    }
}

/// Result of one batch submission
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub scope: Scope,
    pub label: String,
    pub mode: Mode,
    /// Operations submitted
    pub operations: usize,
    /// Operations the device applied
    pub applied: usize,
    /// Deletes whose target was already gone
    pub already_absent: usize,
    pub failures: Vec<OperationFailure>,
    /// Batch-level error recorded under the soft policy
    pub error: Option<String>,
    pub duration: Duration,
}

impl BatchOutcome {
    fn empty(scope: &Scope) -> Self {
        Self {
            scope: scope.clone(),
            label: "Empty batch".to_string(),
            mode: Mode::Relaxed,
            operations: 0,
            applied: 0,
            already_absent: 0,
            failures: Vec::new(),
            error: None,
            duration: Duration::ZERO,
        }
    }

    /// Check if every operation reached its desired state
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.failures.is_empty()
    }

    /// One line per batch error or refused operation
    pub fn warnings(&self) -> Vec<String> {
        match &self.error {
            Some(error) => vec![format!("{} on {}: {error}", self.label, self.scope)],
            None => self
                .failures
                .iter()
                .map(|failure| format!("{} on {}: {failure}", self.label, self.scope))
                .collect(),
        }
    }

    /// Mean time spent per operation
    pub fn average_per_operation(&self) -> Duration {
        match u32::try_from(self.operations) {
            Ok(0) | Err(_) => Duration::ZERO,
            Ok(n) => self.duration / n,
        }
    }
}

/// Totals over every batch of a run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    pub batches: usize,
    pub operations: usize,
    pub applied: usize,
    pub already_absent: usize,
    pub failed: usize,
    pub duration: Duration,
}

impl RunStats {
    pub fn record(&mut self, outcome: &BatchOutcome) {
        self.batches += 1;
        self.operations += outcome.operations;
        self.applied += outcome.applied;
        self.already_absent += outcome.already_absent;
        self.failed += if outcome.failures.is_empty() && outcome.error.is_some() {
            outcome.operations
        } else {
            outcome.failures.len()
        };
        self.duration += outcome.duration;
    }
}

/// Per-run state threaded through every submission
pub struct RunContext {
    first_batch_strict: bool,
    first_batch_sent: bool,
    retry: RetryConfig,
    audit: Option<AuditLog>,
    diagnostics: Option<DiagnosticLog>,
    observer: Box<dyn BatchObserver>,
    stats: RunStats,
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            first_batch_strict: true,
            first_batch_sent: false,
            retry: RetryConfig::default(),
            audit: None,
            diagnostics: None,
            observer: Box::new(NoProgress),
            stats: RunStats::default(),
        }
    }

    /// Whether the first non-empty batch of the run is forced to strict mode
    #[must_use]
    pub fn with_first_batch_strict(mut self, enabled: bool) -> Self {
        self.first_batch_strict = enabled;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_audit(mut self, audit: AuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    #[must_use]
    pub fn with_diagnostics(mut self, diagnostics: DiagnosticLog) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    #[must_use]
    pub fn with_observer(mut self, observer: impl BatchObserver + 'static) -> Self {
        self.observer = Box::new(observer);
        self
    }

    /// Mode for the next batch; consumes the first-batch strictness.
    pub fn mode_for_batch(&mut self, requested: Mode) -> Mode {
        let first = !self.first_batch_sent;
        self.first_batch_sent = true;
        if first && self.first_batch_strict {
            Mode::Strict
        } else {
            requested
        }
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    fn audit(&mut self, write: impl FnOnce(&mut AuditLog) -> Result<()>) {
        if let Some(audit) = self.audit.as_mut()
            && let Err(e) = write(audit)
        {
            log::warn!("Failed to write audit entry: {e}");
        }
    }
}

/// Check that sequence ids are 1-based, contiguous and in order.
pub fn validate_sequence(ops: &OperationList) -> Result<()> {
    for (i, op) in ops.iter().enumerate() {
        let expected = u32::try_from(i + 1).map_err(|_| Error::validation("batch is too large"))?;
        if op.seq != expected {
            return Err(Error::validation(format!(
                "operation {} has sequence id {} (expected {expected})",
                op.path, op.seq
            )));
        }
    }
    Ok(())
}

fn collect_failures(ops: &OperationList, response: &BatchResponse) -> (Vec<OperationFailure>, usize) {
    let mut failures = Vec::new();
    let mut already_absent = 0;
    for status in response.failures() {
        let op = ops.iter().find(|op| op.seq == status.seq);
        let absent = status.code.as_deref() == Some(NOT_FOUND)
            && op.is_some_and(|op| op.action == Action::Delete);
        if absent {
            already_absent += 1;
            continue;
        }
        failures.push(OperationFailure {
            seq: status.seq,
            path: op.map(|op| op.path.clone()),
            code: status.code.clone(),
            message: status
                .message
                .clone()
                .unwrap_or_else(|| "operation failed".to_string()),
        });
    }
    (failures, already_absent)
}

/// Batch-level failure in a device answer.
///
/// A strict batch with any failed operation was rejected as a whole. A failed
/// aggregate status without any per-operation failure is a rejection too.
/// Failed operations inside an applied relaxed batch are results, not errors.
fn batch_error(response: &BatchResponse, outcome: &BatchOutcome) -> Option<Error> {
    let rejected = outcome.mode == Mode::Strict && !outcome.failures.is_empty();
    let unexplained = !response.success && response.failures().next().is_none();
    if !rejected && !unexplained {
        return None;
    }
    let message = response.message.clone().unwrap_or_else(|| {
        if rejected {
            format!(
                "batch rejected: {} of {} operations failed",
                outcome.failures.len(),
                outcome.operations
            )
        } else {
            "batch rejected".to_string()
        }
    });
    Some(Error::transport(message))
}

/// Submit one batch to `scope`.
///
/// An empty batch is a no-op and leaves the first-batch strictness for the
/// next one. Transient transport errors are retried first. A remaining
/// transport error or rejected batch either aborts the run with
/// [`Error::BatchAborted`] (hard policy) or is recorded in the outcome (soft
/// policy). Operations the device refused inside a relaxed batch are listed
/// in [`BatchOutcome::failures`] under either policy. Lock conflicts and
/// validation errors are returned as they are.
pub fn submit<T: Transport + ?Sized>(
    transport: &mut T,
    ctx: &mut RunContext,
    scope: &Scope,
    ops: &OperationList,
    mode: Mode,
    policy: FailurePolicy,
) -> Result<BatchOutcome> {
    validate_sequence(ops)?;
    if ops.is_empty() {
        return Ok(BatchOutcome::empty(scope));
    }

    let mode = ctx.mode_for_batch(mode);
    let label = ops.label();
    ctx.observer.on_batch_start(&label, ops.len(), mode);
    ctx.audit(|a| a.record_request(scope, &label, mode, ops));

    let started = Instant::now();
    let result = with_retry(&ctx.retry, &LogCallback, || transport.submit(ops, scope, mode));
    let duration = started.elapsed();

    let mut outcome = BatchOutcome {
        scope: scope.clone(),
        label: label.clone(),
        mode,
        operations: ops.len(),
        applied: 0,
        already_absent: 0,
        failures: Vec::new(),
        error: None,
        duration,
    };

    let (error, response) = match result {
        Ok(response) => {
            ctx.audit(|a| a.record_response(scope, &label, &response));
            let (failures, already_absent) = collect_failures(ops, &response);
            outcome.applied = response.applied();
            outcome.already_absent = already_absent;
            outcome.failures = failures;
            (batch_error(&response, &outcome), Some(response))
        }
        Err(e) => {
            ctx.audit(|a| a.record_error(scope, &label, &e));
            (Some(e), None)
        }
    };

    if let Some(error) = error {
        let fatal = error.category().is_fatal();
        if fatal || policy == FailurePolicy::Hard {
            match ctx.diagnostics.as_mut() {
                Some(side_log) => {
                    if let Err(e) =
                        side_log.record_failure(scope, &label, ops, &error, response.as_ref())
                    {
                        log::warn!("Failed to write diagnostic log: {e}");
                    }
                }
                None => log::error!("{label} on {scope} failed: {error}"),
            }
            let error = if fatal {
                error
            } else {
                Error::BatchAborted {
                    scope: scope.to_string(),
                    label: label.clone(),
                    message: error.to_string(),
                }
            };
            ctx.observer.on_batch_aborted(&label, &error);
            return Err(error);
        }
        log::warn!("{label} on {scope} failed, continuing: {error}");
        outcome.error = Some(error.to_string());
    }
    for failure in &outcome.failures {
        log::warn!("{label} on {scope}: {failure}");
    }

    log::info!(
        "{label} on {scope}: {} operations in {:.2}s ({} ms/op)",
        outcome.operations,
        outcome.duration.as_secs_f64(),
        outcome.average_per_operation().as_millis()
    );
    ctx.stats.record(&outcome);
    ctx.observer.on_batch_complete(&outcome);
    Ok(outcome)
}
