//! # Converge
//!
//! Reconciles declared configuration objects against the live state of a
//! policy device, organized in a hierarchy of scopes.
//!
//! ## Core Concepts
//!
//! - **ConfigObject**: A named object of one [`ObjectKind`] defined in a [`Scope`]
//! - **ChangeSet**: Objects to create and delete for one kind
//! - **OperationList**: Ordered create/delete operations, split into batches
//! - **Transport**: The seam to the device (list, submit, lock, scope)
//!
//! ## Flow
//!
//! 1. [`diff`] compares live and declared objects per kind
//! 2. [`plan_scope`] orders the changes so dependencies exist before use
//! 3. [`with_locks`] holds config and commit locks for the scopes touched
//! 4. [`submit`] sends each batch, with retries and the failure policy
//!
//! [`copy_objects`] follows the same path, with [`resolve`] computing the
//! dependency closure of the copied objects instead of a diff.
//!
//! ## Example
//!
//! ```ignore
//! use converge::{MemoryDevice, ReconcileRequest, RunContext, reconcile};
//!
//! let mut device = MemoryDevice::load(path, "admin")?;
//! let request = ReconcileRequest { desired, ..Default::default() };
//! let report = reconcile(&mut device, &mut RunContext::new(), &request)?;
//! println!("{} changes", report.summary().total());
//! ```

pub mod audit;
pub mod device;
pub mod diff;
pub mod error;
pub mod executor;
pub mod inventory;
pub mod kinds;
pub mod lock;
pub mod plan;
pub mod reconcile;
pub mod resolver;
pub mod retry;
pub mod transport;
pub mod types;

pub use audit::{AuditLog, DiagnosticLog};
pub use device::{MemoryDevice, Snapshot};
pub use diff::{DiffSummary, diff};
pub use error::{ConflictReason, Error, ErrorCategory, Result};
pub use executor::{BatchObserver, BatchOutcome, NoProgress, RunContext, RunStats, submit};
pub use inventory::Inventory;
pub use kinds::{Family, KindInfo, ObjectKind, Role};
pub use lock::{LockReport, unlock, with_locks};
pub use plan::plan_scope;
pub use reconcile::{
    CopyReport, CopyRequest, ReconcileRequest, RootSelector, RunReport, ScopePlan, copy_objects,
    plan, reconcile, resolve_dependencies,
};
pub use resolver::{Resolution, ResolveReport, ResolveWarning, resolve};
pub use retry::{LogCallback, RetryCallback, RetryConfig};
pub use transport::{BatchResponse, LockStatus, OperationStatus, Transport};
pub use types::{
    Action, ChangeSet, ConfigObject, ConflictPolicy, FailurePolicy, LockAction, LockKind, Mode,
    ObjectPath, ObjectSpec, Operation, OperationList, RulePosition, Scope,
};
