//! Scoped config/commit lock acquisition
//!
//! Locks are taken per scope before any mutation and released in reverse
//! order when the body finishes, whether it returns, fails or panics:
//! 1. Each scope is made the active target, then its config lock and its
//!    commit lock are acquired
//! 2. The body runs with the transport
//! 3. Every held lock is released, most recent first
//!
//! Two exits leave locks in place on purpose: a failure while acquiring, and
//! a batch aborted under the hard failure policy. A partially applied
//! configuration stays protected until an operator inspects it and runs the
//! manual unlock.

use crate::error::Result;
use crate::transport::Transport;
use crate::types::{LockAction, LockKind, Scope};

/// Coordinator state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Idle,
    ScopeSet,
    Locked,
    Mutating,
    Unlocking,
    /// Acquisition failed or the body aborted; locks stay held
    Fatal,
}

/// A lock held by the current run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeldLock {
    pub scope: Scope,
    pub kind: LockKind,
    /// The principal already held it before this run asked
    pub already_held: bool,
}

/// What the coordinator did with locks during a run
#[derive(Debug, Clone, Default)]
pub struct LockReport {
    /// Locks acquired, in acquisition order
    pub acquired: Vec<HeldLock>,
    /// Locks released, in release order
    pub released: Vec<HeldLock>,
    /// Release calls that failed
    pub release_failures: Vec<String>,
}

impl LockReport {
    /// Whether every acquired lock was released
    pub fn is_clean(&self) -> bool {
        self.release_failures.is_empty() && self.released.len() == self.acquired.len()
    }
}

/// Releases held locks when dropped unless disarmed.
struct LockGuard<'a, T: Transport + ?Sized> {
    transport: &'a mut T,
    state: LockState,
    held: Vec<HeldLock>,
    report: LockReport,
    armed: bool,
}

impl<'a, T: Transport + ?Sized> LockGuard<'a, T> {
    fn new(transport: &'a mut T) -> Self {
        Self {
            transport,
            state: LockState::Idle,
            held: Vec::new(),
            report: LockReport::default(),
            armed: true,
        }
    }

    fn transition(&mut self, next: LockState) {
        log::debug!("Lock state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn acquire(&mut self, scope: &Scope) -> Result<()> {
        self.transition(LockState::ScopeSet);
        self.transport.set_active_scope(scope)?;
        for kind in [LockKind::Config, LockKind::Commit] {
            let status = self.transport.lock(kind, scope, LockAction::Acquire)?;
            if status.already_held {
                log::debug!("{kind} lock on {scope} already held by {}", self.transport.principal());
            }
            let lock = HeldLock {
                scope: scope.clone(),
                kind,
                already_held: status.already_held,
            };
            self.report.acquired.push(lock.clone());
            self.held.push(lock);
        }
        self.transition(LockState::Locked);
        Ok(())
    }

    fn release_all(&mut self) {
        self.transition(LockState::Unlocking);
        while let Some(lock) = self.held.pop() {
            match self.transport.lock(lock.kind, &lock.scope, LockAction::Release) {
                Ok(_) => {
                    log::debug!("Released {} lock on {}", lock.kind, lock.scope);
                    self.report.released.push(lock);
                }
                Err(e) => {
                    log::warn!("Failed to release {} lock on {}: {e}", lock.kind, lock.scope);
                    self.report
                        .release_failures
                        .push(format!("{} lock on {}: {e}", lock.kind, lock.scope));
                }
            }
        }
        self.transition(LockState::Idle);
    }

    /// Give up on releasing: the held locks stay on the device.
    fn retain(&mut self) {
        self.transition(LockState::Fatal);
        self.armed = false;
        for lock in &self.held {
            log::warn!("Leaving {} lock on {} held", lock.kind, lock.scope);
        }
    }
}

impl<T: Transport + ?Sized> Drop for LockGuard<'_, T> {
    fn drop(&mut self) {
        if self.armed && !self.held.is_empty() {
            self.release_all();
        }
    }
}

/// Run `body` while holding config and commit locks on every scope.
///
/// Scopes are locked in the given order with duplicates removed. A lock
/// already held by the same principal counts as acquired; one held by
/// another principal fails the call with [`crate::Error::Conflict`].
pub fn with_locks<T, R, F>(transport: &mut T, scopes: &[Scope], body: F) -> Result<(R, LockReport)>
where
    T: Transport + ?Sized,
    F: FnOnce(&mut T) -> Result<R>,
{
    let mut unique: Vec<&Scope> = Vec::with_capacity(scopes.len());
    for scope in scopes {
        if !unique.contains(&scope) {
            unique.push(scope);
        }
    }

    let mut guard = LockGuard::new(transport);
    for scope in unique {
        if let Err(e) = guard.acquire(scope) {
            log::error!("Could not lock {scope}: {e}");
            guard.retain();
            return Err(e);
        }
    }

    guard.transition(LockState::Mutating);
    let outcome = body(&mut *guard.transport);

    match outcome {
        Err(e) if e.preserves_locks() => {
            guard.retain();
            Err(e)
        }
        Err(e) => {
            guard.release_all();
            Err(e)
        }
        Ok(value) => {
            guard.release_all();
            Ok((value, std::mem::take(&mut guard.report)))
        }
    }
}

/// Release config and commit locks on each scope, for manual recovery.
///
/// Releasing a lock that is not held is a no-op.
pub fn unlock<T: Transport + ?Sized>(transport: &mut T, scopes: &[Scope]) -> LockReport {
    let mut report = LockReport::default();
    for scope in scopes {
        for kind in [LockKind::Commit, LockKind::Config] {
            match transport.lock(kind, scope, LockAction::Release) {
                Ok(status) if status.changed => {
                    log::info!("Released {kind} lock on {scope}");
                    report.released.push(HeldLock {
                        scope: scope.clone(),
                        kind,
                        already_held: true,
                    });
                }
                Ok(_) => log::debug!("No {kind} lock held on {scope}"),
                Err(e) => {
                    log::warn!("Failed to release {kind} lock on {scope}: {e}");
                    report
                        .release_failures
                        .push(format!("{kind} lock on {scope}: {e}"));
                }
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemoryDevice;
    use crate::error::{ConflictReason, Error};
    use std::panic::{AssertUnwindSafe, catch_unwind};

    fn dg(name: &str) -> Scope {
        Scope::DeviceGroup(name.to_string())
    }

    #[test]
    fn test_locks_are_taken_and_released_in_reverse() {
        let mut device = MemoryDevice::new("admin");
        let ((), report) = with_locks(&mut device, &[Scope::Shared, dg("branch")], |d| {
            assert_eq!(d.held_locks(), 4);
            assert_eq!(d.active_scope(), Some(&dg("branch")));
            Ok(())
        })
        .unwrap();

        assert_eq!(device.held_locks(), 0);
        assert!(report.is_clean());
        let released: Vec<(Scope, LockKind)> = report
            .released
            .iter()
            .map(|l| (l.scope.clone(), l.kind))
            .collect();
        assert_eq!(
            released,
            vec![
                (dg("branch"), LockKind::Commit),
                (dg("branch"), LockKind::Config),
                (Scope::Shared, LockKind::Commit),
                (Scope::Shared, LockKind::Config),
            ]
        );
    }

    #[test]
    fn test_duplicate_scopes_are_locked_once() {
        let mut device = MemoryDevice::new("admin");
        let ((), report) =
            with_locks(&mut device, &[Scope::Shared, Scope::Shared], |_| Ok(())).unwrap();
        assert_eq!(report.acquired.len(), 2);
    }

    #[test]
    fn test_sequential_runs_on_same_scope_both_succeed() {
        let mut device = MemoryDevice::new("admin");
        assert!(with_locks(&mut device, &[dg("branch")], |_| Ok(())).is_ok());
        assert!(with_locks(&mut device, &[dg("branch")], |_| Ok(())).is_ok());
    }

    #[test]
    fn test_lock_already_held_by_same_principal_is_success() {
        let mut device = MemoryDevice::new("admin");
        device.insert_lock(dg("branch"), LockKind::Config, "admin");
        let ((), report) = with_locks(&mut device, &[dg("branch")], |_| Ok(())).unwrap();
        assert!(report.acquired[0].already_held);
        assert!(!report.acquired[1].already_held);
        assert_eq!(device.held_locks(), 0);
    }

    #[test]
    fn test_foreign_lock_is_fatal_and_keeps_earlier_locks() {
        let mut device = MemoryDevice::new("admin");
        device.insert_lock(dg("branch"), LockKind::Commit, "jdoe");
        let mut ran = false;
        let err = with_locks(&mut device, &[Scope::Shared, dg("branch")], |_| {
            ran = true;
            Ok(())
        })
        .unwrap_err();

        assert!(!ran);
        assert!(matches!(
            err,
            Error::Conflict {
                reason: ConflictReason::CommitLockHeld,
                ..
            }
        ));
        assert_eq!(device.lock_holder(&Scope::Shared, LockKind::Config), Some("admin"));
        assert_eq!(device.lock_holder(&dg("branch"), LockKind::Config), Some("admin"));
    }

    #[test]
    fn test_body_error_releases_locks() {
        let mut device = MemoryDevice::new("admin");
        let result: Result<((), LockReport)> =
            with_locks(&mut device, &[Scope::Shared], |_| Err(Error::transport("boom")));
        assert!(result.is_err());
        assert_eq!(device.held_locks(), 0);
    }

    #[test]
    fn test_hard_abort_keeps_locks() {
        let mut device = MemoryDevice::new("admin");
        let result: Result<((), LockReport)> = with_locks(&mut device, &[Scope::Shared], |_| {
            Err(Error::BatchAborted {
                scope: "shared".to_string(),
                label: "Creating 1 address".to_string(),
                message: "connection reset".to_string(),
            })
        });
        assert!(result.is_err());
        assert_eq!(device.held_locks(), 2);

        let report = unlock(&mut device, &[Scope::Shared]);
        assert_eq!(report.released.len(), 2);
        assert_eq!(device.held_locks(), 0);
    }

    #[test]
    fn test_panic_in_body_releases_locks() {
        let mut device = MemoryDevice::new("admin");
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            let _: Result<((), LockReport)> =
                with_locks(&mut device, &[Scope::Shared], |_| panic!("body failed"));
        }));
        assert!(outcome.is_err());
        assert_eq!(device.held_locks(), 0);
    }

    #[test]
    fn test_release_failure_is_recorded_not_fatal() {
        let mut device = MemoryDevice::new("admin");
        device.fail_next_release(Error::transient("timeout"));
        let (value, report) = with_locks(&mut device, &[Scope::Shared], |_| Ok(5)).unwrap();
        assert_eq!(value, 5);
        assert_eq!(report.release_failures.len(), 1);
        assert_eq!(report.released.len(), 1);
        assert!(!report.is_clean());
    }

    #[test]
    fn test_unlock_without_locks_is_noop() {
        let mut device = MemoryDevice::new("admin");
        let report = unlock(&mut device, &[dg("branch")]);
        assert!(report.released.is_empty());
        assert!(report.release_failures.is_empty());
    }
}
