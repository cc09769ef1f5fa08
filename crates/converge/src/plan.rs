//! Dependency-safe ordering of change sets
//!
//! All deletions of a scope come first, from the most dependent tier down
//! (rules, groups, leaves, tags), then all creations from tags up. Inside a
//! kind, nested groups are ordered by their references to each other.

use crate::types::{ChangeSet, ConfigObject, Operation, OperationList};
use std::collections::HashMap;

/// Order the change sets of one scope into a single operation list.
pub fn plan_scope(change_sets: &[ChangeSet]) -> OperationList {
    let mut by_tier: Vec<&ChangeSet> = change_sets.iter().collect();
    by_tier.sort_by_key(|cs| cs.kind.info().tier);

    let mut ops = OperationList::new();
    for cs in by_tier.iter().rev() {
        let order = dependency_order(&cs.to_delete);
        for idx in order.into_iter().rev() {
            ops.push(Operation::delete(cs.to_delete[idx].path()));
        }
    }
    for cs in &by_tier {
        for idx in dependency_order(&cs.to_create) {
            ops.push(Operation::create(cs.to_create[idx].clone()));
        }
    }
    ops
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    New,
    OnPath,
    Done,
}

/// Indices of `objects` with every object after the objects of the same set
/// it references. Edges closing a cycle are ignored, leaving the members of
/// a cycle in input order.
pub fn dependency_order(objects: &[ConfigObject]) -> Vec<usize> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    for (i, obj) in objects.iter().enumerate() {
        index.entry(obj.name.as_str()).or_insert(i);
    }
    let deps: Vec<Vec<usize>> = objects
        .iter()
        .enumerate()
        .map(|(i, obj)| {
            obj.references()
                .into_iter()
                .filter_map(|(_, name)| index.get(name).copied())
                .filter(|&j| j != i)
                .collect()
        })
        .collect();

    let mut marks = vec![Mark::New; objects.len()];
    let mut order = Vec::with_capacity(objects.len());
    for root in 0..objects.len() {
        if marks[root] != Mark::New {
            continue;
        }
        marks[root] = Mark::OnPath;
        let mut stack = vec![(root, 0usize)];
        while let Some(&(node, next)) = stack.last() {
            if let Some(&dep) = deps[node].get(next) {
                if let Some(top) = stack.last_mut() {
                    top.1 += 1;
                }
                if marks[dep] == Mark::New {
                    marks[dep] = Mark::OnPath;
                    stack.push((dep, 0));
                }
            } else {
                marks[node] = Mark::Done;
                order.push(node);
                stack.pop();
            }
        }
    }
    order
}
