//! Dependency closure of objects copied between scopes
//!
//! Starting from root objects (rules or groups) in a source scope, every
//! referenced name is looked up in the source's ancestors first, then in the
//! source itself. Names found in an ancestor are reused as they are. Names
//! found in the source become part of the closure and are walked in turn.
//! The closure is then placed at the destination according to the conflict
//! policy, dependencies before dependents. An object that references a
//! missing name would be refused by the device, so it stays behind together
//! with everything that depends on it.
//!
//! The walk keeps every visited object in an arena indexed by family and
//! name, so shared members are resolved once and reference cycles end the
//! walk instead of recursing forever.

use crate::error::Result;
use crate::inventory::Inventory;
use crate::kinds::{Family, ObjectKind};
use crate::transport::Transport;
use crate::types::{ConfigObject, ConflictPolicy, ObjectPath, Operation, OperationList, Scope};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Non-fatal finding of a resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveWarning {
    /// A referenced name exists neither in an ancestor nor in the source
    MissingReference {
        family: Family,
        name: String,
        referenced_by: String,
    },
    /// A reference leads back to an object still being walked
    CyclicReference {
        family: Family,
        name: String,
        referenced_by: String,
    },
    /// An object left behind because one of its references cannot be met
    NotCopied { object: String, reason: String },
}

impl fmt::Display for ResolveWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingReference {
                family,
                name,
                referenced_by,
            } => write!(f, "{family} '{name}' not found (referenced by {referenced_by})"),
            Self::CyclicReference {
                family,
                name,
                referenced_by,
            } => write!(
                f,
                "cyclic reference: {referenced_by} refers back to {family} '{name}'"
            ),
            Self::NotCopied { object, reason } => write!(f, "{object} not copied: {reason}"),
        }
    }
}

/// What a resolution decided for each object
#[derive(Debug, Clone, Default)]
pub struct ResolveReport {
    /// Objects scheduled for creation at the destination, tags included
    pub created: Vec<ObjectPath>,
    /// Objects left where they are because an ancestor scope provides them
    pub reused: Vec<ObjectPath>,
    /// Destination objects kept under the skip policy
    pub skipped: Vec<ObjectPath>,
    /// Destination objects replaced under the overwrite policy
    pub overwritten: Vec<ObjectPath>,
    pub warnings: Vec<ResolveWarning>,
}

impl ResolveReport {
    fn note_reused(&mut self, path: ObjectPath) {
        if !self.reused.contains(&path) {
            log::debug!("Reusing {path}");
            self.reused.push(path);
        }
    }

    fn warn(&mut self, warning: ResolveWarning) {
        if !self.warnings.contains(&warning) {
            log::warn!("{warning}");
            self.warnings.push(warning);
        }
    }
}

/// Ordered operations plus the report explaining them
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub operations: OperationList,
    pub report: ResolveReport,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Key {
    Family(Family, String),
    Kind(ObjectKind, String),
}

fn key_of(object: &ConfigObject) -> Key {
    match object.kind().info().family {
        Some(family) => Key::Family(family, object.name.clone()),
        None => Key::Kind(object.kind(), object.name.clone()),
    }
}

fn describe(object: &ConfigObject) -> String {
    format!("{} '{}'", object.kind().info().display_name, object.name)
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Reused,
    Node(usize),
    Missing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    New,
    OnPath,
    Done,
}

struct Node {
    object: ConfigObject,
    refs: Vec<(Family, String)>,
}

struct Resolver<'a, T: Transport + ?Sized> {
    transport: &'a mut T,
    inventory: &'a mut Inventory,
    source: &'a Scope,
    nodes: Vec<Node>,
    marks: Vec<Mark>,
    index: HashMap<Key, Slot>,
    report: ResolveReport,
}

impl<T: Transport + ?Sized> Resolver<'_, T> {
    fn add_node(&mut self, object: ConfigObject) -> usize {
        let key = key_of(&object);
        if let Some(Slot::Node(idx)) = self.index.get(&key) {
            return *idx;
        }
        let refs = object
            .references()
            .into_iter()
            .map(|(family, name)| (family, name.to_string()))
            .collect();
        self.nodes.push(Node { object, refs });
        self.marks.push(Mark::New);
        let idx = self.nodes.len() - 1;
        self.index.insert(key, Slot::Node(idx));
        idx
    }

    fn lookup(&mut self, family: Family, name: &str) -> Result<Slot> {
        let key = Key::Family(family, name.to_string());
        if let Some(slot) = self.index.get(&key) {
            return Ok(*slot);
        }
        let kinds = family.candidates();
        let slot = if let Some(found) =
            self.inventory
                .find_in_ancestors(self.transport, kinds, self.source, name)?
        {
            self.report.note_reused(found.path());
            Slot::Reused
        } else if let Some(found) = self
            .inventory
            .find_any(self.transport, kinds, self.source, name)?
        {
            Slot::Node(self.add_node(found))
        } else {
            Slot::Missing
        };
        self.index.insert(key, slot);
        Ok(slot)
    }

    /// Depth-first walk from `root`, appending finished nodes to `order`.
    fn walk(&mut self, root: usize, order: &mut Vec<usize>) -> Result<()> {
        if self.marks[root] != Mark::New {
            return Ok(());
        }
        self.marks[root] = Mark::OnPath;
        let mut stack = vec![(root, 0usize)];

        while let Some(&(node, cursor)) = stack.last() {
            let Some((family, name)) = self.nodes[node].refs.get(cursor).cloned() else {
                self.marks[node] = Mark::Done;
                order.push(node);
                stack.pop();
                continue;
            };
            if let Some(top) = stack.last_mut() {
                top.1 += 1;
            }
            if family.is_sentinel(&name) {
                continue;
            }

            match self.lookup(family, &name)? {
                Slot::Reused => {}
                Slot::Missing => {
                    let referenced_by = describe(&self.nodes[node].object);
                    self.report.warn(ResolveWarning::MissingReference {
                        family,
                        name,
                        referenced_by,
                    });
                }
                Slot::Node(dep) => match self.marks[dep] {
                    Mark::New => {
                        self.marks[dep] = Mark::OnPath;
                        stack.push((dep, 0));
                    }
                    Mark::OnPath => {
                        let referenced_by = describe(&self.nodes[node].object);
                        self.report.warn(ResolveWarning::CyclicReference {
                            family,
                            name,
                            referenced_by,
                        });
                    }
                    Mark::Done => {}
                },
            }
        }
        Ok(())
    }

    /// Why `idx` cannot be created: a missing reference, or a dependency
    /// that was itself left behind.
    fn blocker(&self, idx: usize, left_behind: &HashSet<usize>) -> Option<String> {
        self.nodes[idx].refs.iter().find_map(|(family, name)| {
            if family.is_sentinel(name) {
                return None;
            }
            match self.index.get(&Key::Family(*family, name.clone())) {
                Some(Slot::Missing) => Some(format!("{family} '{name}' not found")),
                Some(Slot::Node(dep)) if left_behind.contains(dep) => {
                    Some(format!("{family} '{name}' was not copied"))
                }
                _ => None,
            }
        })
    }

    /// Place the closure at `dest`, returning (deletes, creates).
    fn place(
        &mut self,
        order: &[usize],
        dest: &Scope,
        policy: ConflictPolicy,
    ) -> Result<(Vec<ObjectPath>, Vec<ConfigObject>)> {
        let mut deletes = Vec::new();
        let mut creates = Vec::new();
        let mut planned_tags: HashSet<String> = HashSet::new();
        let mut left_behind: HashSet<usize> = HashSet::new();

        for &idx in order {
            let object = self.nodes[idx].object.clone();
            let kinds: Vec<ObjectKind> = match object.kind().info().family {
                Some(family) => family.candidates().to_vec(),
                None => vec![object.kind()],
            };

            if let Some(found) =
                self.inventory
                    .find_in_ancestors(self.transport, &kinds, dest, &object.name)?
            {
                self.report.note_reused(found.path());
                continue;
            }

            let existing = self
                .inventory
                .find_any(self.transport, &kinds, dest, &object.name)?;
            if let Some(existing) = &existing
                && policy == ConflictPolicy::Skip
            {
                log::debug!("Keeping existing {}", existing.path());
                self.report.skipped.push(existing.path());
                continue;
            }

            if let Some(reason) = self.blocker(idx, &left_behind) {
                // An existing destination object still serves dependents.
                if existing.is_none() {
                    left_behind.insert(idx);
                }
                self.report.warn(ResolveWarning::NotCopied {
                    object: describe(&object),
                    reason,
                });
                continue;
            }

            if let Some(existing) = existing {
                log::debug!("Replacing existing {}", existing.path());
                self.report.overwritten.push(existing.path());
                deletes.push(existing.path());
            }

            self.ensure_tags(&object, dest, &mut planned_tags, &mut creates)?;
            let copy = object.with_scope(dest.clone());
            self.report.created.push(copy.path());
            creates.push(copy);
        }
        Ok((deletes, creates))
    }

    fn ensure_tags(
        &mut self,
        object: &ConfigObject,
        dest: &Scope,
        planned: &mut HashSet<String>,
        creates: &mut Vec<ConfigObject>,
    ) -> Result<()> {
        if !object.kind().info().taggable {
            return Ok(());
        }
        for tag in object.tags() {
            let tag = tag.trim();
            if tag.is_empty() || planned.contains(tag) {
                continue;
            }
            if self
                .inventory
                .is_visible(self.transport, &[ObjectKind::Tag], dest, tag)?
            {
                continue;
            }
            planned.insert(tag.to_string());
            let created = ConfigObject::default_tag(tag, dest.clone());
            self.report.created.push(created.path());
            creates.push(created);
        }
        Ok(())
    }
}

/// Resolve the dependency closure of `roots` and place it at `dest`.
pub fn resolve<T: Transport + ?Sized>(
    transport: &mut T,
    inventory: &mut Inventory,
    roots: &[ConfigObject],
    source: &Scope,
    dest: &Scope,
    policy: ConflictPolicy,
) -> Result<Resolution> {
    let mut resolver = Resolver {
        transport,
        inventory,
        source,
        nodes: Vec::new(),
        marks: Vec::new(),
        index: HashMap::new(),
        report: ResolveReport::default(),
    };

    let mut order = Vec::new();
    for root in roots {
        root.validate()?;
        let idx = resolver.add_node(root.clone());
        resolver.walk(idx, &mut order)?;
    }
    log::debug!(
        "Closure of {} roots from {source}: {} objects",
        roots.len(),
        order.len()
    );

    let (mut deletes, mut creates) = resolver.place(&order, dest, policy)?;

    // Deletes run dependents first, creates dependencies first. Sorting by
    // tier is stable, so the walk order survives inside each kind.
    deletes.reverse();
    deletes.sort_by_key(|path| std::cmp::Reverse(path.kind.info().tier));
    creates.sort_by_key(|obj| (obj.kind().info().tier, obj.kind()));

    let mut operations = OperationList::new();
    for path in deletes {
        operations.push(Operation::delete(path));
    }
    for object in creates {
        operations.push(Operation::create(object));
    }

    Ok(Resolution {
        operations,
        report: resolver.report,
    })
}
