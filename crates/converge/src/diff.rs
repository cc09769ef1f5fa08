//! Delta computation between live and desired objects
//!
//! Objects are compared by a canonical key built from their name and their
//! normalized attributes, so list order, surrounding whitespace and blank
//! optional fields never produce spurious changes. There is no partial
//! update: a changed object shows up as a deletion of the live version and a
//! creation of the desired one.

use crate::error::{Error, Result};
use crate::kinds::ObjectKind;
use crate::types::{ChangeSet, ConfigObject};
use std::collections::{HashMap, HashSet};

/// Comparison key of an object: equal keys mean no change is needed.
pub fn canonical_key(object: &ConfigObject) -> Result<String> {
    let attributes = serde_json::to_string(&object.spec.normalized())?;
    Ok(format!("{}\n{}", object.name.trim(), attributes))
}

/// Compute the changes that turn `current` into `desired` for one kind.
///
/// Every object on both sides must be of `kind`. Duplicates sharing a
/// canonical key are merged (first occurrence wins) and their names listed in
/// [`ChangeSet::collapsed`]. Two desired objects with the same name but
/// different attributes are rejected.
pub fn diff(kind: ObjectKind, current: &[ConfigObject], desired: &[ConfigObject]) -> Result<ChangeSet> {
    check_kind(kind, current, "live")?;
    check_kind(kind, desired, "desired")?;

    let mut change_set = ChangeSet::empty(kind);
    let current = dedupe(current, &mut change_set.collapsed)?;
    let desired = dedupe(desired, &mut change_set.collapsed)?;
    check_unique_names(kind, &desired)?;

    let current_keys: HashSet<&str> = current.iter().map(|(k, _)| k.as_str()).collect();
    let desired_keys: HashSet<&str> = desired.iter().map(|(k, _)| k.as_str()).collect();

    change_set.to_delete = current
        .iter()
        .filter(|(key, _)| !desired_keys.contains(key.as_str()))
        .map(|(_, obj)| (*obj).clone())
        .collect();
    change_set.to_create = desired
        .iter()
        .filter(|(key, _)| !current_keys.contains(key.as_str()))
        .map(|(_, obj)| (*obj).clone())
        .collect();

    if !change_set.collapsed.is_empty() {
        log::debug!(
            "Collapsed duplicate {}: {}",
            kind.info().count(change_set.collapsed.len()),
            change_set.collapsed.join(", ")
        );
    }
    Ok(change_set)
}

fn check_kind(kind: ObjectKind, objects: &[ConfigObject], side: &str) -> Result<()> {
    match objects.iter().find(|obj| obj.kind() != kind) {
        Some(other) => Err(Error::validation(format!(
            "cannot diff {} against {} '{}' in the {side} set",
            kind.info().display_name,
            other.kind().info().display_name,
            other.name
        ))),
        None => Ok(()),
    }
}

fn dedupe<'a>(
    objects: &'a [ConfigObject],
    collapsed: &mut Vec<String>,
) -> Result<Vec<(String, &'a ConfigObject)>> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(objects.len());
    for object in objects {
        let key = canonical_key(object)?;
        if seen.contains(&key) {
            if !collapsed.contains(&object.name) {
                collapsed.push(object.name.clone());
            }
            continue;
        }
        seen.insert(key.clone());
        out.push((key, object));
    }
    Ok(out)
}

fn check_unique_names(kind: ObjectKind, objects: &[(String, &ConfigObject)]) -> Result<()> {
    let mut names: HashMap<&str, &str> = HashMap::new();
    for (key, object) in objects {
        if let Some(previous) = names.insert(object.name.trim(), key.as_str())
            && previous != key.as_str()
        {
            return Err(Error::validation(format!(
                "{} '{}' is declared twice with different attributes",
                kind.info().display_name,
                object.name
            )));
        }
    }
    Ok(())
}

/// Diff summary statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffSummary {
    /// Objects created that have no live counterpart
    pub additions: usize,
    /// Live objects deleted without replacement
    pub removals: usize,
    /// Objects replaced (delete + recreate)
    pub modifications: usize,
    /// Duplicate entries merged
    pub collapsed: usize,
}

impl DiffSummary {
    /// Create a summary from a list of change sets
    pub fn from_change_sets(change_sets: &[ChangeSet]) -> Self {
        let mut summary = Self::default();
        for cs in change_sets {
            summary.add(cs);
        }
        summary
    }

    pub fn add(&mut self, change_set: &ChangeSet) {
        self.additions += change_set.added().len();
        self.removals += change_set.removed().len();
        self.modifications += change_set.modified().len();
        self.collapsed += change_set.collapsed.len();
    }

    /// Total number of changes
    pub fn total(&self) -> usize {
        self.additions + self.removals + self.modifications
    }

    /// Check if there are any changes
    pub fn has_changes(&self) -> bool {
        self.total() > 0
    }
}

impl ChangeSet {
    /// Per-kind counts of this change set
    pub fn summary(&self) -> DiffSummary {
        let mut summary = DiffSummary::default();
        summary.add(self);
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::fixtures::*;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_identical_single_address_has_no_changes() {
        let current = vec![address("A", "10.0.0.1")];
        let desired = vec![address("A", "10.0.0.1")];
        let cs = diff(ObjectKind::Address, &current, &desired).unwrap();
        assert!(cs.is_empty());
        assert!(!cs.summary().has_changes());
    }

    #[test]
    fn test_changed_value_is_delete_plus_create() {
        let current = vec![address("A", "10.0.0.1")];
        let desired = vec![address("A", "10.0.0.2")];
        let cs = diff(ObjectKind::Address, &current, &desired).unwrap();
        assert_eq!(cs.to_create, desired);
        assert_eq!(cs.to_delete, current);
        assert_eq!(cs.summary().modifications, 1);
    }

    #[test]
    fn test_tag_order_is_irrelevant() {
        let current = vec![tagged_address("A", "10.0.0.1", &["prod", "web"])];
        let desired = vec![tagged_address("A", "10.0.0.1", &["web", " prod"])];
        assert!(diff(ObjectKind::Address, &current, &desired).unwrap().is_empty());
    }

    #[test]
    fn test_duplicates_collapse_first_wins() {
        let desired = vec![
            address("A", "10.0.0.1"),
            tagged_address("A", "10.0.0.1", &[]),
            address("B", "10.0.0.2"),
        ];
        let cs = diff(ObjectKind::Address, &[], &desired).unwrap();
        assert_eq!(cs.to_create.len(), 2);
        assert_eq!(cs.collapsed, vec!["A".to_string()]);
    }

    #[test]
    fn test_mismatched_kinds_fail() {
        let current = vec![address("A", "10.0.0.1")];
        let desired = vec![service("A", "443")];
        let err = diff(ObjectKind::Address, &current, &desired).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let mixed = vec![address("A", "10.0.0.1"), service("S", "443")];
        assert!(diff(ObjectKind::Address, &mixed, &[]).is_err());
    }

    #[test]
    fn test_conflicting_desired_names_fail() {
        let desired = vec![address("A", "10.0.0.1"), address("A", "10.0.0.2")];
        let err = diff(ObjectKind::Address, &[], &desired).unwrap_err();
        assert!(err.to_string().contains("declared twice"));
    }

    fn keys(objects: &[ConfigObject]) -> HashSet<String> {
        objects.iter().map(|o| canonical_key(o).unwrap()).collect()
    }

    fn objects_strategy() -> impl Strategy<Value = Vec<ConfigObject>> {
        prop::collection::btree_map("[a-e]", (0u8..4, prop::bool::ANY), 0..5).prop_map(
            |entries: BTreeMap<String, (u8, bool)>| {
                entries
                    .into_iter()
                    .map(|(name, (octet, tagged))| {
                        let tags: &[&str] = if tagged { &["web"] } else { &[] };
                        tagged_address(&name, &format!("10.0.0.{octet}"), tags)
                    })
                    .collect()
            },
        )
    }

    proptest! {
        #[test]
        fn prop_diff_converges(current in objects_strategy(), desired in objects_strategy()) {
            let cs = diff(ObjectKind::Address, &current, &desired).unwrap();
            let created = keys(&cs.to_create);
            let deleted = keys(&cs.to_delete);
            prop_assert!(created.is_disjoint(&deleted));

            let mut converged: HashSet<String> = keys(&current).difference(&deleted).cloned().collect();
            converged.extend(created);
            prop_assert_eq!(converged, keys(&desired));
        }

        #[test]
        fn prop_diff_is_permutation_invariant(
            (current, shuffled_current) in objects_strategy().prop_flat_map(|v| (Just(v.clone()), Just(v).prop_shuffle())),
            (desired, shuffled_desired) in objects_strategy().prop_flat_map(|v| (Just(v.clone()), Just(v).prop_shuffle())),
        ) {
            let a = diff(ObjectKind::Address, &current, &desired).unwrap();
            let b = diff(ObjectKind::Address, &shuffled_current, &shuffled_desired).unwrap();
            prop_assert_eq!(keys(&a.to_create), keys(&b.to_create));
            prop_assert_eq!(keys(&a.to_delete), keys(&b.to_delete));
        }
    }
}
