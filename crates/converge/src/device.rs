//! In-memory model of a policy device, persisted as a JSON snapshot
//!
//! The model keeps the candidate configuration tree and the lock table of a
//! device and enforces the same contracts a real device does:
//! - strict batches are all-or-nothing
//! - a created object must only reference names visible from its scope
//! - locks held by another principal block lock calls and submissions
//! - scope changes are refused while a commit runs
//! - security rules keep their rulebase order per scope

use crate::error::{ConflictReason, Error, Result};
use crate::kinds::ObjectKind;
use crate::transport::{
    BatchResponse, INVALID, LockStatus, MISSING_REFERENCE, NOT_FOUND, OperationStatus,
    ROLLED_BACK, Transport,
};
use crate::types::{
    Action, ConfigObject, LockAction, LockKind, Mode, ObjectPath, Operation, OperationList,
    RulePosition, Scope,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::Path;

// ============================================================================
// Snapshot format
// ============================================================================

/// A lock entry as stored in a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub scope: Scope,
    pub kind: LockKind,
    pub holder: String,
}

/// On-disk form of the device state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    /// Security rules appear in rulebase order
    #[serde(default)]
    pub objects: Vec<ConfigObject>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locks: Vec<LockRecord>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub commit_in_progress: bool,
}

/// One recorded `submit` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitRecord {
    pub scope: Scope,
    pub mode: Mode,
    pub operations: usize,
}

// ============================================================================
// Device
// ============================================================================

/// Snapshot-backed device implementing [`Transport`]
#[derive(Debug)]
pub struct MemoryDevice {
    principal: String,
    objects: BTreeMap<ObjectPath, ConfigObject>,
    /// Security rule names per scope, top first
    rulebase: BTreeMap<Scope, Vec<String>>,
    locks: BTreeMap<(Scope, LockKind), String>,
    active_scope: Option<Scope>,
    commit_in_progress: bool,
    submit_failures: VecDeque<Error>,
    release_failures: VecDeque<Error>,
    submissions: Vec<SubmitRecord>,
}

impl MemoryDevice {
    /// Empty device seen through `principal`
    pub fn new(principal: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            objects: BTreeMap::new(),
            rulebase: BTreeMap::new(),
            locks: BTreeMap::new(),
            active_scope: None,
            commit_in_progress: false,
            submit_failures: VecDeque::new(),
            release_failures: VecDeque::new(),
            submissions: Vec::new(),
        }
    }

    /// Build a device from a snapshot.
    ///
    /// Objects are validated; a snapshot declaring the same path twice is
    /// rejected.
    pub fn from_snapshot(principal: impl Into<String>, snapshot: Snapshot) -> Result<Self> {
        let mut device = Self::new(principal);
        for object in snapshot.objects {
            object.validate()?;
            let path = object.path();
            if device.objects.contains_key(&path) {
                return Err(Error::validation(format!("snapshot declares {path} twice")));
            }
            device.insert(object);
        }
        for lock in snapshot.locks {
            device.locks.insert((lock.scope, lock.kind), lock.holder);
        }
        device.commit_in_progress = snapshot.commit_in_progress;
        Ok(device)
    }

    /// Load a snapshot file.
    pub fn load(path: &Path, principal: impl Into<String>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let snapshot: Snapshot = serde_json::from_str(&content)?;
        let device = Self::from_snapshot(principal, snapshot)?;
        log::debug!(
            "Loaded {} objects and {} locks from {}",
            device.objects.len(),
            device.locks.len(),
            path.display()
        );
        Ok(device)
    }

    /// Current state in snapshot form
    pub fn snapshot(&self) -> Snapshot {
        let rules = self
            .rulebase
            .iter()
            .flat_map(|(scope, names)| names.iter().map(move |name| rule_path(scope, name)))
            .filter_map(|path| self.objects.get(&path));
        Snapshot {
            objects: self
                .objects
                .values()
                .filter(|obj| obj.kind() != ObjectKind::SecurityRule)
                .chain(rules)
                .cloned()
                .collect(),
            locks: self
                .locks
                .iter()
                .map(|((scope, kind), holder)| LockRecord {
                    scope: scope.clone(),
                    kind: *kind,
                    holder: holder.clone(),
                })
                .collect(),
            commit_in_progress: self.commit_in_progress,
        }
    }

    /// Write the current state to a snapshot file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(&self.snapshot())?;
        fs::write(path, content + "\n")?;
        log::debug!("Saved snapshot to {}", path.display());
        Ok(())
    }

    /// Add an object without any checks. A new security rule goes to the
    /// bottom of its rulebase.
    pub fn insert(&mut self, object: ConfigObject) {
        let path = object.path();
        self.objects.insert(path.clone(), object);
        self.append_rule(&path);
    }

    pub fn get(&self, path: &ObjectPath) -> Option<&ConfigObject> {
        self.objects.get(path)
    }

    pub fn objects(&self) -> impl Iterator<Item = &ConfigObject> {
        self.objects.values()
    }

    /// Security rule names of `scope`, top first
    pub fn rule_order(&self, scope: &Scope) -> Vec<&str> {
        self.rulebase
            .get(scope)
            .map(|names| names.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    fn append_rule(&mut self, path: &ObjectPath) {
        if path.kind != ObjectKind::SecurityRule {
            return;
        }
        let names = self.rulebase.entry(path.scope.clone()).or_default();
        if !names.contains(&path.name) {
            names.push(path.name.clone());
        }
    }

    fn remove_rule(&mut self, path: &ObjectPath) {
        if path.kind != ObjectKind::SecurityRule {
            return;
        }
        if let Some(names) = self.rulebase.get_mut(&path.scope) {
            names.retain(|name| *name != path.name);
        }
    }

    /// Record a lock as held by `holder`.
    pub fn insert_lock(&mut self, scope: Scope, kind: LockKind, holder: impl Into<String>) {
        self.locks.insert((scope, kind), holder.into());
    }

    pub fn lock_holder(&self, scope: &Scope, kind: LockKind) -> Option<&str> {
        self.locks.get(&(scope.clone(), kind)).map(String::as_str)
    }

    /// Locks currently held by anyone
    pub fn held_locks(&self) -> usize {
        self.locks.len()
    }

    pub fn active_scope(&self) -> Option<&Scope> {
        self.active_scope.as_ref()
    }

    pub fn set_commit_in_progress(&mut self, running: bool) {
        self.commit_in_progress = running;
    }

    /// Make the next `submit` call fail with `error`.
    pub fn fail_next_submit(&mut self, error: Error) {
        self.submit_failures.push_back(error);
    }

    /// Make the next lock release fail with `error`.
    pub fn fail_next_release(&mut self, error: Error) {
        self.release_failures.push_back(error);
    }

    /// Every `submit` call seen so far
    pub fn submissions(&self) -> &[SubmitRecord] {
        &self.submissions
    }

    fn foreign_holder(&self, scope: &Scope, kind: LockKind) -> Option<&str> {
        self.lock_holder(scope, kind)
            .filter(|holder| *holder != self.principal)
    }

    fn conflict(scope: &Scope, kind: LockKind, holder: &str) -> Error {
        Error::Conflict {
            scope: scope.to_string(),
            reason: match kind {
                LockKind::Config => ConflictReason::ConfigLockHeld,
                LockKind::Commit => ConflictReason::CommitLockHeld,
            },
            holder: Some(holder.to_string()),
        }
    }
}

// ============================================================================
// Batch application
// ============================================================================

fn rule_path(scope: &Scope, name: &str) -> ObjectPath {
    ObjectPath {
        scope: scope.clone(),
        kind: ObjectKind::SecurityRule,
        name: name.to_string(),
    }
}

fn is_visible(
    objects: &BTreeMap<ObjectPath, ConfigObject>,
    kinds: &[ObjectKind],
    name: &str,
    from: &Scope,
) -> bool {
    std::iter::once(from.clone())
        .chain(from.ancestors())
        .any(|scope| {
            kinds.iter().any(|kind| {
                objects.contains_key(&ObjectPath {
                    scope: scope.clone(),
                    kind: *kind,
                    name: name.to_string(),
                })
            })
        })
}

fn apply(
    objects: &mut BTreeMap<ObjectPath, ConfigObject>,
    op: &Operation,
    scope: &Scope,
) -> OperationStatus {
    if op.path.scope != *scope {
        return OperationStatus::failure(
            op.seq,
            INVALID,
            format!("{} is outside the batch scope {scope}", op.path),
        );
    }
    match op.action {
        Action::Delete => {
            if objects.remove(&op.path).is_some() {
                OperationStatus::success(op.seq)
            } else {
                OperationStatus::failure(op.seq, NOT_FOUND, format!("{} does not exist", op.path))
            }
        }
        Action::Create => {
            let Some(object) = op.payload.as_ref() else {
                return OperationStatus::failure(op.seq, INVALID, "create without payload");
            };
            if object.path() != op.path {
                return OperationStatus::failure(
                    op.seq,
                    INVALID,
                    format!("payload does not match {}", op.path),
                );
            }
            if let Err(e) = object.validate() {
                return OperationStatus::failure(op.seq, INVALID, e.to_string());
            }
            for (family, name) in object.references() {
                if !family.is_sentinel(name) && !is_visible(objects, family.candidates(), name, scope) {
                    return OperationStatus::failure(
                        op.seq,
                        MISSING_REFERENCE,
                        format!("{family} '{name}' referenced by {} is not defined", op.path),
                    );
                }
            }
            for tag in object.tags() {
                if !is_visible(objects, &[ObjectKind::Tag], tag.trim(), scope) {
                    return OperationStatus::failure(
                        op.seq,
                        MISSING_REFERENCE,
                        format!("tag '{}' used by {} is not defined", tag.trim(), op.path),
                    );
                }
            }
            objects.insert(op.path.clone(), object.clone());
            OperationStatus::success(op.seq)
        }
    }
}

// Deletes are idempotent on the device: an absent target never blocks a
// strict batch.
fn blocks_strict(op: &Operation, status: &OperationStatus) -> bool {
    !status.ok && !(op.action == Action::Delete && status.code.as_deref() == Some(NOT_FOUND))
}

impl Transport for MemoryDevice {
    fn principal(&self) -> &str {
        &self.principal
    }

    fn list(&mut self, kind: ObjectKind, scope: &Scope) -> Result<Vec<ConfigObject>> {
        if kind == ObjectKind::SecurityRule {
            return Ok(self
                .rule_order(scope)
                .into_iter()
                .filter_map(|name| self.objects.get(&rule_path(scope, name)))
                .cloned()
                .collect());
        }
        Ok(self
            .objects
            .iter()
            .filter(|(path, _)| path.kind == kind && path.scope == *scope)
            .map(|(_, obj)| obj.clone())
            .collect())
    }

    fn submit(&mut self, batch: &OperationList, scope: &Scope, mode: Mode) -> Result<BatchResponse> {
        self.submissions.push(SubmitRecord {
            scope: scope.clone(),
            mode,
            operations: batch.len(),
        });
        if let Some(error) = self.submit_failures.pop_front() {
            return Err(error);
        }
        if let Some(holder) = self.foreign_holder(scope, LockKind::Config) {
            return Err(Self::conflict(scope, LockKind::Config, holder));
        }

        let mut staged = self.objects.clone();
        let mut statuses: Vec<OperationStatus> =
            batch.iter().map(|op| apply(&mut staged, op, scope)).collect();

        let blocked = batch
            .iter()
            .zip(&statuses)
            .filter(|(op, status)| blocks_strict(op, status))
            .count();

        if mode == Mode::Strict && blocked > 0 {
            for status in statuses.iter_mut().filter(|s| s.ok) {
                *status = OperationStatus::failure(status.seq, ROLLED_BACK, "batch rejected");
            }
            return Ok(BatchResponse {
                success: false,
                statuses,
                message: Some(format!(
                    "batch rejected: {blocked} of {} operations failed",
                    batch.len()
                )),
            });
        }

        self.objects = staged;
        for (op, status) in batch.iter().zip(&statuses) {
            if status.ok {
                match op.action {
                    Action::Create => self.append_rule(&op.path),
                    Action::Delete => self.remove_rule(&op.path),
                }
            }
        }
        let success = statuses.iter().all(|s| s.ok);
        Ok(BatchResponse {
            success,
            message: (!success).then(|| {
                format!(
                    "{} of {} operations failed",
                    statuses.iter().filter(|s| !s.ok).count(),
                    batch.len()
                )
            }),
            statuses,
        })
    }

    fn lock(&mut self, kind: LockKind, scope: &Scope, action: LockAction) -> Result<LockStatus> {
        if action == LockAction::Release
            && let Some(error) = self.release_failures.pop_front()
        {
            return Err(error);
        }
        if let Some(holder) = self.foreign_holder(scope, kind) {
            return Err(Self::conflict(scope, kind, holder));
        }
        let key = (scope.clone(), kind);
        let held = self.locks.contains_key(&key);
        let status = match action {
            LockAction::Acquire => {
                if !held {
                    self.locks.insert(key, self.principal.clone());
                }
                LockStatus {
                    changed: !held,
                    already_held: held,
                }
            }
            LockAction::Release => {
                self.locks.remove(&key);
                LockStatus {
                    changed: held,
                    already_held: held,
                }
            }
        };
        Ok(status)
    }

    fn set_active_scope(&mut self, scope: &Scope) -> Result<()> {
        if self.commit_in_progress {
            return Err(Error::Conflict {
                scope: scope.to_string(),
                reason: ConflictReason::CommitInProgress,
                holder: None,
            });
        }
        self.active_scope = Some(scope.clone());
        Ok(())
    }

    fn move_rule(&mut self, scope: &Scope, name: &str, position: &RulePosition) -> Result<()> {
        if let Some(holder) = self.foreign_holder(scope, LockKind::Config) {
            return Err(Self::conflict(scope, LockKind::Config, holder));
        }
        let missing = |rule: &str| Error::transport(format!("rule '{rule}' does not exist in {scope}"));
        let Some(names) = self.rulebase.get_mut(scope) else {
            return Err(missing(name));
        };
        let Some(from) = names.iter().position(|n| n == name) else {
            return Err(missing(name));
        };
        if let Some(anchor) = position.anchor() {
            if anchor == name {
                return Err(Error::transport(format!(
                    "cannot move rule '{name}' relative to itself"
                )));
            }
            if !names.iter().any(|n| n == anchor) {
                return Err(missing(anchor));
            }
        }

        let moved = names.remove(from);
        let to = match position {
            RulePosition::Top => 0,
            RulePosition::Bottom => names.len(),
            RulePosition::Before(anchor) => names.iter().position(|n| n == anchor).unwrap_or(0),
            RulePosition::After(anchor) => names
                .iter()
                .position(|n| n == anchor)
                .map_or(names.len(), |i| i + 1),
        };
        names.insert(to, moved);
        log::debug!("Moved rule '{name}' to {position} in {scope}");
        Ok(())
    }
}
