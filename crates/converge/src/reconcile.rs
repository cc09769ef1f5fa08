//! Run entry points: reconcile declared state, resolve dependencies, copy
//! objects between scopes.

use crate::diff::{DiffSummary, diff};
use crate::error::{Error, Result};
use crate::executor::{BatchOutcome, RunContext, RunStats, submit};
use crate::inventory::Inventory;
use crate::kinds::ObjectKind;
use crate::lock::{LockReport, with_locks};
use crate::plan::plan_scope;
use crate::resolver::{Resolution, ResolveReport, resolve};
use crate::transport::Transport;
use crate::types::{
    ChangeSet, ConfigObject, ConflictPolicy, FailurePolicy, Mode, ObjectPath, OperationList,
    RulePosition, Scope,
};
use std::collections::HashSet;

/// Planned changes for one scope
#[derive(Debug, Clone)]
pub struct ScopePlan {
    pub scope: Scope,
    /// Non-empty change sets, one per kind
    pub change_sets: Vec<ChangeSet>,
    pub operations: OperationList,
}

impl ScopePlan {
    pub fn summary(&self) -> DiffSummary {
        DiffSummary::from_change_sets(&self.change_sets)
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// What to reconcile
#[derive(Debug, Clone, Default)]
pub struct ReconcileRequest {
    /// Scopes to converge; empty means every scope named by `desired`
    pub scopes: Vec<Scope>,
    /// Kinds to converge; empty means every kind
    pub kinds: Vec<ObjectKind>,
    pub desired: Vec<ConfigObject>,
    /// Mode for batches after the first
    pub mode: Mode,
    pub failure_policy: FailurePolicy,
    /// Plan only, never lock or submit
    pub dry_run: bool,
}

/// Outcome of a reconcile run
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub plans: Vec<ScopePlan>,
    pub batches: Vec<BatchOutcome>,
    /// Present when locks were taken
    pub locks: Option<LockReport>,
    pub stats: RunStats,
    pub warnings: Vec<String>,
    pub dry_run: bool,
}

impl RunReport {
    pub fn summary(&self) -> DiffSummary {
        let mut summary = DiffSummary::default();
        for plan in &self.plans {
            for cs in &plan.change_sets {
                summary.add(cs);
            }
        }
        summary
    }

    /// Whether every submitted batch fully succeeded
    pub fn is_success(&self) -> bool {
        self.batches.iter().all(BatchOutcome::is_success)
    }
}

/// Scopes in lock and submission order: `shared` first, then as given.
fn ordered_scopes(requested: &[Scope], desired: &[ConfigObject]) -> Vec<Scope> {
    let mut scopes: Vec<Scope> = Vec::new();
    let candidates: Box<dyn Iterator<Item = &Scope>> = if requested.is_empty() {
        Box::new(desired.iter().map(|obj| &obj.scope))
    } else {
        Box::new(requested.iter())
    };
    for scope in candidates {
        if !scopes.contains(scope) {
            scopes.push(scope.clone());
        }
    }
    scopes.sort_by_key(|scope| !scope.is_shared());
    scopes
}

/// Compute the per-scope plans for converging `desired` without touching
/// the device.
pub fn plan<T: Transport + ?Sized>(
    transport: &mut T,
    scopes: &[Scope],
    kinds: &[ObjectKind],
    desired: &[ConfigObject],
) -> Result<Vec<ScopePlan>> {
    for object in desired {
        object.validate()?;
    }
    let kinds: &[ObjectKind] = if kinds.is_empty() { &ObjectKind::ALL } else { kinds };
    let mut inventory = Inventory::new();
    let mut plans = Vec::new();

    for scope in ordered_scopes(scopes, desired) {
        let mut change_sets = Vec::new();
        for &kind in kinds {
            let wanted: Vec<ConfigObject> = desired
                .iter()
                .filter(|obj| obj.kind() == kind && obj.scope == scope)
                .cloned()
                .collect();
            let current = inventory.objects(transport, kind, &scope)?;
            let change_set = diff(kind, current, &wanted)?;
            if !change_set.is_empty() || !change_set.collapsed.is_empty() {
                change_sets.push(change_set);
            }
        }
        let operations = plan_scope(&change_sets);
        log::debug!("{scope}: {} planned operations", operations.len());
        plans.push(ScopePlan {
            scope,
            change_sets,
            operations,
        });
    }
    Ok(plans)
}

/// Converge the device to the declared objects.
///
/// Scopes with changes are locked for the whole run; each scope's operations
/// go out as batches of one action and kind, in dependency order.
pub fn reconcile<T: Transport + ?Sized>(
    transport: &mut T,
    ctx: &mut RunContext,
    request: &ReconcileRequest,
) -> Result<RunReport> {
    let plans = plan(transport, &request.scopes, &request.kinds, &request.desired)?;
    let mut report = RunReport {
        dry_run: request.dry_run,
        ..Default::default()
    };
    for plan in &plans {
        for cs in &plan.change_sets {
            if !cs.collapsed.is_empty() {
                report.warnings.push(format!(
                    "{}: merged duplicate {} ({})",
                    plan.scope,
                    cs.kind.info().count(cs.collapsed.len()),
                    cs.collapsed.join(", ")
                ));
            }
        }
    }

    let dirty: Vec<Scope> = plans
        .iter()
        .filter(|p| !p.is_empty())
        .map(|p| p.scope.clone())
        .collect();
    report.plans = plans;
    if request.dry_run || dirty.is_empty() {
        return Ok(report);
    }

    let plans = &report.plans;
    let (batches, locks) = with_locks(transport, &dirty, |t| {
        let mut batches = Vec::new();
        for plan in plans.iter().filter(|p| !p.is_empty()) {
            t.set_active_scope(&plan.scope)?;
            for batch in plan.operations.batches() {
                batches.push(submit(
                    t,
                    ctx,
                    &plan.scope,
                    &batch,
                    request.mode,
                    request.failure_policy,
                )?);
            }
        }
        Ok(batches)
    })?;

    for outcome in &batches {
        report.warnings.extend(outcome.warnings());
    }
    report.warnings.extend(locks.release_failures.iter().cloned());
    report.batches = batches;
    report.locks = Some(locks);
    report.stats = ctx.stats().clone();
    Ok(report)
}

/// Resolve the dependency closure of `roots` for a copy from `source` to
/// `dest`, with a fresh inventory.
pub fn resolve_dependencies<T: Transport + ?Sized>(
    transport: &mut T,
    roots: &[ConfigObject],
    source: &Scope,
    dest: &Scope,
    policy: ConflictPolicy,
) -> Result<Resolution> {
    let mut inventory = Inventory::new();
    resolve(transport, &mut inventory, roots, source, dest, policy)
}

/// How copy roots are chosen in the source scope
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RootSelector {
    /// Every security rule carrying the tag
    RulesTagged(String),
    /// Explicit objects
    Objects(Vec<(ObjectKind, String)>),
}

/// What to copy
#[derive(Debug, Clone)]
pub struct CopyRequest {
    pub source: Scope,
    pub dest: Scope,
    pub roots: RootSelector,
    pub on_conflict: ConflictPolicy,
    /// Where copied security rules land in the destination rulebase
    pub position: RulePosition,
    pub mode: Mode,
    pub failure_policy: FailurePolicy,
    pub dry_run: bool,
}

/// Outcome of a copy run
#[derive(Debug, Clone, Default)]
pub struct CopyReport {
    pub roots: Vec<ObjectPath>,
    pub resolution: ResolveReport,
    pub operations: OperationList,
    pub batches: Vec<BatchOutcome>,
    /// Copied security rules moved to the requested position
    pub placed: Vec<String>,
    pub locks: Option<LockReport>,
    pub stats: RunStats,
    /// Refused operations, failed rule moves and lock release failures
    pub warnings: Vec<String>,
    pub dry_run: bool,
}

impl CopyReport {
    pub fn is_success(&self) -> bool {
        self.batches.iter().all(BatchOutcome::is_success) && self.warnings.is_empty()
    }
}

/// Move the copied rules that made it to `dest` into `position`, keeping
/// their source order. Returns the rules placed and a warning per failed
/// move.
fn place_rules<T: Transport + ?Sized>(
    transport: &mut T,
    dest: &Scope,
    rules: &[String],
    position: &RulePosition,
) -> Result<(Vec<String>, Vec<String>)> {
    let present: HashSet<String> = transport
        .list(ObjectKind::SecurityRule, dest)?
        .into_iter()
        .map(|rule| rule.name)
        .collect();
    let mut pending: Vec<&String> = rules.iter().filter(|name| present.contains(*name)).collect();
    if position.stacks_in_reverse() {
        pending.reverse();
    }

    let mut placed = Vec::new();
    let mut warnings = Vec::new();
    for name in pending {
        match transport.move_rule(dest, name, position) {
            Ok(()) => placed.push(name.clone()),
            Err(e) if e.category().is_fatal() => return Err(e),
            Err(e) => {
                log::warn!("Could not move rule '{name}' to {position}: {e}");
                warnings.push(format!("rule '{name}' left at the bottom of {dest}: {e}"));
            }
        }
    }
    if position.stacks_in_reverse() {
        placed.reverse();
    }
    Ok((placed, warnings))
}

fn select_roots<T: Transport + ?Sized>(
    transport: &mut T,
    inventory: &mut Inventory,
    source: &Scope,
    selector: &RootSelector,
) -> Result<Vec<ConfigObject>> {
    match selector {
        RootSelector::RulesTagged(tag) => Ok(inventory
            .objects(transport, ObjectKind::SecurityRule, source)?
            .iter()
            .filter(|rule| rule.has_tag(tag))
            .cloned()
            .collect()),
        RootSelector::Objects(wanted) => {
            let mut roots = Vec::with_capacity(wanted.len());
            for (kind, name) in wanted {
                let found = inventory.find(transport, *kind, source, name)?.ok_or_else(|| {
                    Error::validation(format!(
                        "{} '{name}' not found in {source}",
                        kind.info().display_name
                    ))
                })?;
                roots.push(found);
            }
            Ok(roots)
        }
    }
}

/// Copy root objects and their dependency closure from one scope to another.
pub fn copy_objects<T: Transport + ?Sized>(
    transport: &mut T,
    ctx: &mut RunContext,
    request: &CopyRequest,
) -> Result<CopyReport> {
    if request.source == request.dest {
        return Err(Error::validation(format!(
            "source and destination are both {}",
            request.source
        )));
    }

    let mut inventory = Inventory::new();
    if let Some(anchor) = request.position.anchor()
        && inventory
            .find(transport, ObjectKind::SecurityRule, &request.dest, anchor)?
            .is_none()
    {
        return Err(Error::validation(format!(
            "position {}: rule '{anchor}' not found in {}",
            request.position, request.dest
        )));
    }
    let roots = select_roots(transport, &mut inventory, &request.source, &request.roots)?;
    let mut report = CopyReport {
        roots: roots.iter().map(ConfigObject::path).collect(),
        dry_run: request.dry_run,
        ..Default::default()
    };
    if roots.is_empty() {
        log::warn!("No roots selected in {}", request.source);
        return Ok(report);
    }

    let resolution = resolve(
        transport,
        &mut inventory,
        &roots,
        &request.source,
        &request.dest,
        request.on_conflict,
    )?;
    report.resolution = resolution.report;
    report.operations = resolution.operations;
    if request.dry_run || report.operations.is_empty() {
        return Ok(report);
    }

    let copied_rules: Vec<String> = report
        .resolution
        .created
        .iter()
        .filter(|path| path.kind == ObjectKind::SecurityRule)
        .map(|path| path.name.clone())
        .collect();
    let operations = &report.operations;
    let dest = &request.dest;
    let ((batches, placed, move_warnings), locks) =
        with_locks(transport, std::slice::from_ref(dest), |t| {
            let mut batches = Vec::new();
            for batch in operations.batches() {
                batches.push(submit(
                    t,
                    ctx,
                    dest,
                    &batch,
                    request.mode,
                    request.failure_policy,
                )?);
            }
            let (placed, warnings) = if copied_rules.is_empty() {
                (Vec::new(), Vec::new())
            } else {
                place_rules(t, dest, &copied_rules, &request.position)?
            };
            Ok((batches, placed, warnings))
        })?;

    for outcome in &batches {
        report.warnings.extend(outcome.warnings());
    }
    report.warnings.extend(move_warnings);
    report.warnings.extend(locks.release_failures.iter().cloned());
    report.batches = batches;
    report.placed = placed;
    report.locks = Some(locks);
    report.stats = ctx.stats().clone();
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemoryDevice;
    use crate::retry::RetryConfig;
    use crate::types::fixtures::*;
    use crate::types::{LockKind, ObjectSpec, TagObject};

    fn dg(name: &str) -> Scope {
        Scope::DeviceGroup(name.to_string())
    }

    fn ctx() -> RunContext {
        RunContext::new().with_retry(RetryConfig::no_retry())
    }

    fn request(desired: Vec<ConfigObject>) -> ReconcileRequest {
        ReconcileRequest {
            desired,
            ..Default::default()
        }
    }

    #[test]
    fn test_reconcile_converges_and_releases_locks() {
        let mut device = MemoryDevice::new("admin");
        device.insert(address("old", "10.0.0.9"));
        device.insert(address("keep", "10.0.0.1"));
        let desired = vec![
            address("keep", "10.0.0.1"),
            address("a", "10.0.0.2"),
            address_group("g", &["a", "keep"]),
        ];

        let report = reconcile(&mut device, &mut ctx(), &request(desired.clone())).unwrap();
        assert!(report.is_success());
        assert_eq!(report.summary().additions, 2);
        assert_eq!(report.summary().removals, 1);
        assert_eq!(device.held_locks(), 0);
        assert!(report.locks.unwrap().is_clean());

        let mut names: Vec<String> = device.objects().map(|o| o.name.clone()).collect();
        names.sort();
        assert_eq!(names, vec!["a", "g", "keep"]);

        // A second run finds nothing to do and takes no locks.
        let again = reconcile(&mut device, &mut ctx(), &request(desired)).unwrap();
        assert!(!again.summary().has_changes());
        assert!(again.locks.is_none());
    }

    #[test]
    fn test_dry_run_never_touches_device() {
        let mut device = MemoryDevice::new("admin");
        let mut req = request(vec![address("a", "10.0.0.1")]);
        req.dry_run = true;
        let report = reconcile(&mut device, &mut ctx(), &req).unwrap();
        assert_eq!(report.plans[0].operations.len(), 1);
        assert!(device.submissions().is_empty());
        assert_eq!(device.objects().count(), 0);
    }

    #[test]
    fn test_kind_filter_limits_scope_of_changes() {
        let mut device = MemoryDevice::new("admin");
        device.insert(service("svc-old", "8080"));
        let mut req = request(vec![address("a", "10.0.0.1")]);
        req.kinds = vec![ObjectKind::Address];
        let report = reconcile(&mut device, &mut ctx(), &req).unwrap();
        assert_eq!(report.summary().total(), 1);
        assert!(device.objects().any(|o| o.name == "svc-old"));
    }

    #[test]
    fn test_hard_failure_leaves_locks_soft_releases() {
        let mut device = MemoryDevice::new("admin");
        device.fail_next_submit(Error::transport("device error"));
        let mut req = request(vec![address("a", "10.0.0.1")]);
        let err = reconcile(&mut device, &mut ctx(), &req).unwrap_err();
        assert!(matches!(err, Error::BatchAborted { .. }));
        assert_eq!(device.lock_holder(&Scope::Shared, LockKind::Config), Some("admin"));
        assert_eq!(device.lock_holder(&Scope::Shared, LockKind::Commit), Some("admin"));

        crate::lock::unlock(&mut device, &[Scope::Shared]);
        device.fail_next_submit(Error::transport("device error"));
        req.failure_policy = FailurePolicy::Soft;
        let report = reconcile(&mut device, &mut ctx(), &req).unwrap();
        assert!(!report.is_success());
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(device.held_locks(), 0);
    }

    #[test]
    fn test_refused_operation_is_reported_and_locks_released() {
        let mut device = MemoryDevice::new("admin");
        let mut req = request(vec![address_group("g", &["ghost"])]);
        req.failure_policy = FailurePolicy::Hard;
        let mut ctx = ctx().with_first_batch_strict(false);

        let report = reconcile(&mut device, &mut ctx, &req).unwrap();
        assert!(!report.is_success());
        assert_eq!(report.stats.failed, 1);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("ghost"), "{}", report.warnings[0]);
        assert_eq!(device.held_locks(), 0);
    }

    #[test]
    fn test_foreign_lock_aborts_before_any_submission() {
        let mut device = MemoryDevice::new("admin");
        device.insert_lock(Scope::Shared, LockKind::Config, "jdoe");
        let err = reconcile(&mut device, &mut ctx(), &request(vec![address("a", "10.0.0.1")]))
            .unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
        assert!(device.submissions().is_empty());
    }

    #[test]
    fn test_shared_scope_goes_first() {
        let scopes = ordered_scopes(&[dg("b"), Scope::Shared, dg("a"), dg("b")], &[]);
        assert_eq!(scopes, vec![Scope::Shared, dg("b"), dg("a")]);
    }

    #[test]
    fn test_copy_rules_by_tag() {
        let mut device = MemoryDevice::new("admin");
        let src = dg("src");
        device.insert(ConfigObject {
            name: "migrate".to_string(),
            scope: Scope::Shared,
            spec: ObjectSpec::Tag(TagObject::default()),
        });
        device.insert(in_scope(address("web", "10.0.0.10"), &src));
        device.insert(in_scope(service("svc-https", "443"), &src));
        device.insert(in_scope(rule("allow-web", &["web"], &["svc-https"], &["migrate"]), &src));
        device.insert(in_scope(rule("other", &["web"], &["any"], &[]), &src));

        let request = CopyRequest {
            source: src,
            dest: dg("dst"),
            roots: RootSelector::RulesTagged("migrate".to_string()),
            on_conflict: ConflictPolicy::Skip,
            position: RulePosition::Bottom,
            mode: Mode::Relaxed,
            failure_policy: FailurePolicy::Hard,
            dry_run: false,
        };
        let report = copy_objects(&mut device, &mut ctx(), &request).unwrap();
        assert_eq!(report.roots.len(), 1);
        assert!(report.is_success());
        assert_eq!(report.resolution.created.len(), 3);
        assert!(device.objects().any(|o| o.scope == dg("dst") && o.name == "allow-web"));
        assert!(!device.objects().any(|o| o.scope == dg("dst") && o.name == "other"));
        assert_eq!(device.held_locks(), 0);
    }

    #[test]
    fn test_copy_leaves_unresolvable_group_behind_and_releases_locks() {
        let mut device = MemoryDevice::new("admin");
        let src = dg("src");
        device.insert(address("X", "10.0.0.1"));
        device.insert(in_scope(address_group("G", &["X", "Y"]), &src));
        device.insert(in_scope(address("web", "10.0.0.10"), &src));
        device.insert(in_scope(address_group("H", &["web", "X"]), &src));

        let request = CopyRequest {
            source: src,
            dest: dg("dst"),
            roots: RootSelector::Objects(vec![
                (ObjectKind::AddressGroup, "G".to_string()),
                (ObjectKind::AddressGroup, "H".to_string()),
            ]),
            on_conflict: ConflictPolicy::Skip,
            position: RulePosition::Bottom,
            mode: Mode::Relaxed,
            failure_policy: FailurePolicy::Hard,
            dry_run: false,
        };
        let report = copy_objects(&mut device, &mut ctx(), &request).unwrap();

        let warnings: Vec<String> = report.resolution.warnings.iter().map(ToString::to_string).collect();
        assert!(warnings.iter().any(|w| w.contains("'Y' not found")), "{warnings:?}");
        assert!(report.resolution.reused.iter().any(|p| p.name == "X"));
        assert!(report.is_success(), "{:?}", report.warnings);
        assert!(report.locks.as_ref().is_some_and(LockReport::is_clean));
        assert_eq!(device.held_locks(), 0);
        assert!(device.objects().any(|o| o.scope == dg("dst") && o.name == "H"));
        assert!(!device.objects().any(|o| o.scope == dg("dst") && o.name == "G"));
    }

    fn placement_device() -> MemoryDevice {
        let mut device = MemoryDevice::new("admin");
        let src = dg("src");
        let dst = dg("dst");
        device.insert(ConfigObject {
            name: "migrate".to_string(),
            scope: Scope::Shared,
            spec: ObjectSpec::Tag(TagObject::default()),
        });
        device.insert(in_scope(rule("r1", &["any"], &["any"], &["migrate"]), &src));
        device.insert(in_scope(rule("r2", &["any"], &["any"], &["migrate"]), &src));
        device.insert(in_scope(rule("first", &["any"], &["any"], &[]), &dst));
        device.insert(in_scope(rule("last", &["any"], &["any"], &[]), &dst));
        device
    }

    fn copy_to(position: RulePosition) -> CopyRequest {
        CopyRequest {
            source: dg("src"),
            dest: dg("dst"),
            roots: RootSelector::RulesTagged("migrate".to_string()),
            on_conflict: ConflictPolicy::Skip,
            position,
            mode: Mode::Relaxed,
            failure_policy: FailurePolicy::Hard,
            dry_run: false,
        }
    }

    #[test]
    fn test_copied_rules_land_at_requested_position() {
        let cases = [
            (RulePosition::Top, vec!["r1", "r2", "first", "last"]),
            (RulePosition::Bottom, vec!["first", "last", "r1", "r2"]),
            (RulePosition::Before("last".to_string()), vec!["first", "r1", "r2", "last"]),
            (RulePosition::After("first".to_string()), vec!["first", "r1", "r2", "last"]),
        ];
        for (position, expected) in cases {
            let mut device = placement_device();
            let report = copy_objects(&mut device, &mut ctx(), &copy_to(position.clone())).unwrap();
            assert_eq!(device.rule_order(&dg("dst")), expected, "{position}");
            assert_eq!(report.placed, vec!["r1", "r2"], "{position}");
            assert!(report.is_success(), "{position}: {:?}", report.warnings);
        }
    }

    #[test]
    fn test_copy_rejects_unknown_position_anchor() {
        let mut device = placement_device();
        let err = copy_objects(
            &mut device,
            &mut ctx(),
            &copy_to(RulePosition::After("ghost".to_string())),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(err.to_string().contains("'ghost' not found"), "{err}");
        assert!(device.submissions().is_empty());
        assert_eq!(device.held_locks(), 0);
    }

    #[test]
    fn test_copy_unknown_root_fails() {
        let mut device = MemoryDevice::new("admin");
        let request = CopyRequest {
            source: dg("src"),
            dest: dg("dst"),
            roots: RootSelector::Objects(vec![(ObjectKind::AddressGroup, "nope".to_string())]),
            on_conflict: ConflictPolicy::Skip,
            position: RulePosition::Bottom,
            mode: Mode::Relaxed,
            failure_policy: FailurePolicy::Hard,
            dry_run: true,
        };
        let err = copy_objects(&mut device, &mut ctx(), &request).unwrap_err();
        assert!(err.to_string().contains("'nope' not found"));
    }

    #[test]
    fn test_resolve_dependencies_is_read_only() {
        let mut device = MemoryDevice::new("admin");
        let group = in_scope(address_group("g", &["a"]), &dg("src"));
        device.insert(in_scope(address("a", "10.0.0.1"), &dg("src")));
        device.insert(group.clone());
        let resolution =
            resolve_dependencies(&mut device, &[group], &dg("src"), &dg("dst"), ConflictPolicy::Skip)
                .unwrap();
        assert_eq!(resolution.operations.len(), 2);
        assert!(device.submissions().is_empty());
    }
}
