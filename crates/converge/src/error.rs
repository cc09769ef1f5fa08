//! Error types for reconciliation runs.
//!
//! Errors are categorized so callers can decide between retrying, aborting
//! the run, or reporting and moving on. Unresolvable references are not
//! errors at all; they are collected as [`crate::resolver::ResolveWarning`]s.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Machine-readable reason a lock or scope-set call was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictReason {
    /// The config lock for the scope is held by another principal
    ConfigLockHeld,
    /// The commit lock for the scope is held by another principal
    CommitLockHeld,
    /// A commit is running on the device
    CommitInProgress,
}

impl ConflictReason {
    /// Stable code for logs and reports.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigLockHeld => "config-lock-held",
            Self::CommitLockHeld => "commit-lock-held",
            Self::CommitInProgress => "commit-in-progress",
        }
    }
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Categories of errors for retry and abort decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Network or remote failure that may succeed on retry
    TransientTransport,
    /// Remote failure that will not go away by retrying
    Transport,
    /// Another principal holds the device
    Conflict,
    /// Malformed input; a programming or data error
    Validation,
    /// The run was terminated by the hard failure policy
    Aborted,
    /// Local I/O or serialization failure
    Local,
}

impl ErrorCategory {
    /// Whether this error category is worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientTransport)
    }

    /// Whether an error of this category always ends the run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Conflict | Self::Validation | Self::Aborted)
    }

    /// Actionable advice for the operator.
    pub fn advice(&self) -> &'static str {
        match self {
            Self::TransientTransport => "Check connectivity to the device and run again",
            Self::Transport => "Review the device response in the error log",
            Self::Conflict => "Wait for the other administrator to release their locks",
            Self::Validation => "Fix the declared configuration and run again",
            Self::Aborted => {
                "Locks were left in place; inspect the device, then run `polsync unlock`"
            }
            Self::Local => "Check file paths and permissions",
        }
    }
}

/// Errors produced by the reconciliation core.
#[derive(Debug, Error)]
pub enum Error {
    /// A transport call failed
    #[error("transport error: {message}")]
    Transport {
        /// Detail from the remote side or the connection
        message: String,
        /// Whether retrying the identical call may succeed
        transient: bool,
    },

    /// A lock or scope-set call was blocked by another principal
    #[error("conflict on {scope}: {reason}{}", holder.as_ref().map(|h| format!(" (held by {h})")).unwrap_or_default())]
    Conflict {
        /// Scope the call targeted
        scope: String,
        /// Why the device refused
        reason: ConflictReason,
        /// Current holder, when the device reports it
        holder: Option<String>,
    },

    /// Malformed input
    #[error("validation error: {0}")]
    Validation(String),

    /// A batch failed under the hard failure policy
    #[error("batch '{label}' on {scope} aborted: {message}")]
    BatchAborted {
        /// Scope the batch targeted
        scope: String,
        /// Human label of the batch
        label: String,
        /// Underlying transport failure
        message: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Shorthand for a non-transient transport failure.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            transient: false,
        }
    }

    /// Shorthand for a transient transport failure.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            transient: true,
        }
    }

    /// Shorthand for a validation failure.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Transport {
                transient: true, ..
            } => ErrorCategory::TransientTransport,
            Error::Transport { .. } => ErrorCategory::Transport,
            Error::Conflict { .. } => ErrorCategory::Conflict,
            Error::Validation(_) => ErrorCategory::Validation,
            Error::BatchAborted { .. } => ErrorCategory::Aborted,
            Error::Io(_) | Error::Json(_) => ErrorCategory::Local,
        }
    }

    /// Whether retrying the identical call may succeed.
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Whether this error must leave held locks in place.
    pub fn preserves_locks(&self) -> bool {
        matches!(self, Error::BatchAborted { .. })
    }
}

/// Result type for reconciliation operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_transport_is_retryable() {
        assert!(Error::transient("timed out").is_retryable());
        assert!(!Error::transport("bad xpath").is_retryable());
        assert!(!Error::validation("mixed kinds").is_retryable());
    }

    #[test]
    fn test_fatal_categories() {
        assert!(ErrorCategory::Conflict.is_fatal());
        assert!(ErrorCategory::Validation.is_fatal());
        assert!(ErrorCategory::Aborted.is_fatal());
        assert!(!ErrorCategory::Transport.is_fatal());
        assert!(!ErrorCategory::TransientTransport.is_fatal());
    }

    #[test]
    fn test_conflict_display_includes_reason_code_and_holder() {
        let err = Error::Conflict {
            scope: "device-group:branch".to_string(),
            reason: ConflictReason::ConfigLockHeld,
            holder: Some("jdoe".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "conflict on device-group:branch: config-lock-held (held by jdoe)"
        );
        assert_eq!(err.category(), ErrorCategory::Conflict);
    }

    #[test]
    fn test_only_aborts_preserve_locks() {
        let aborted = Error::BatchAborted {
            scope: "shared".to_string(),
            label: "Creating 2 addresses".to_string(),
            message: "connection reset".to_string(),
        };
        assert!(aborted.preserves_locks());
        assert!(!Error::transport("boom").preserves_locks());
    }
}
