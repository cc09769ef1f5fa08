//! The device seam
//!
//! Everything the core knows about the remote device goes through
//! [`Transport`]. Calls are synchronous; a run issues them one at a time.

use crate::error::Result;
use crate::kinds::ObjectKind;
use crate::types::{ConfigObject, LockAction, LockKind, Mode, OperationList, RulePosition, Scope};
use serde::{Deserialize, Serialize};

/// Reason code for an operation whose target does not exist
pub const NOT_FOUND: &str = "not-found";
/// Reason code for a create whose references are not visible
pub const MISSING_REFERENCE: &str = "missing-reference";
/// Reason code for an operation skipped because the strict batch was rejected
pub const ROLLED_BACK: &str = "rolled-back";
/// Reason code for a malformed operation
pub const INVALID: &str = "invalid";

/// Outcome of one operation inside a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationStatus {
    pub seq: u32,
    pub ok: bool,
    /// Machine-readable reason for a failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl OperationStatus {
    pub fn success(seq: u32) -> Self {
        Self {
            seq,
            ok: true,
            code: None,
            message: None,
        }
    }

    pub fn failure(seq: u32, code: &str, message: impl Into<String>) -> Self {
        Self {
            seq,
            ok: false,
            code: Some(code.to_string()),
            message: Some(message.into()),
        }
    }
}

/// Device answer to a batch submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResponse {
    /// Aggregate status: true when every operation was applied
    pub success: bool,
    pub statuses: Vec<OperationStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl BatchResponse {
    pub fn failures(&self) -> impl Iterator<Item = &OperationStatus> {
        self.statuses.iter().filter(|s| !s.ok)
    }

    pub fn applied(&self) -> usize {
        self.statuses.iter().filter(|s| s.ok).count()
    }
}

/// Result of a lock call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LockStatus {
    /// Whether the call changed the lock state
    pub changed: bool,
    /// Whether the lock was already held by the caller
    pub already_held: bool,
}

/// Connection to a policy device.
///
/// Implementations report a lock held by someone else as
/// [`crate::Error::Conflict`] and network trouble as a transient
/// [`crate::Error::Transport`].
pub trait Transport {
    /// Identity the device sees for this connection
    fn principal(&self) -> &str;

    /// Live objects of `kind` defined directly in `scope`.
    ///
    /// Security rules come back in rulebase order.
    fn list(&mut self, kind: ObjectKind, scope: &Scope) -> Result<Vec<ConfigObject>>;

    /// Apply a batch to `scope`.
    ///
    /// In strict mode nothing is applied unless every operation succeeds.
    fn submit(&mut self, batch: &OperationList, scope: &Scope, mode: Mode) -> Result<BatchResponse>;

    /// Acquire or release a lock on `scope`
    fn lock(&mut self, kind: LockKind, scope: &Scope, action: LockAction) -> Result<LockStatus>;

    /// Make `scope` the target of subsequent configuration calls
    fn set_active_scope(&mut self, scope: &Scope) -> Result<()>;

    /// Move an existing security rule of `scope` within its rulebase
    fn move_rule(&mut self, scope: &Scope, name: &str, position: &RulePosition) -> Result<()>;
}
