//! Per-run read cache over [`Transport::list`]
//!
//! Each (scope, kind) pair is fetched at most once per run. The cache is
//! dropped with the run; nothing is kept between runs.

use crate::error::Result;
use crate::kinds::ObjectKind;
use crate::transport::Transport;
use crate::types::{ConfigObject, Scope};
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct Inventory {
    cache: HashMap<(Scope, ObjectKind), Vec<ConfigObject>>,
    fetches: usize,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Objects of `kind` defined directly in `scope`
    pub fn objects<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        kind: ObjectKind,
        scope: &Scope,
    ) -> Result<&[ConfigObject]> {
        let key = (scope.clone(), kind);
        if !self.cache.contains_key(&key) {
            let objects = transport.list(kind, scope)?;
            log::trace!("Fetched {} from {scope}", kind.info().count(objects.len()));
            self.fetches += 1;
            self.cache.insert(key.clone(), objects);
        }
        Ok(self.cache.get(&key).map(Vec::as_slice).unwrap_or_default())
    }

    /// Object named `name` of `kind` defined directly in `scope`
    pub fn find<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        kind: ObjectKind,
        scope: &Scope,
        name: &str,
    ) -> Result<Option<ConfigObject>> {
        Ok(self
            .objects(transport, kind, scope)?
            .iter()
            .find(|obj| obj.name == name)
            .cloned())
    }

    /// First object named `name` among `kinds` (in order) in `scope`
    pub fn find_any<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        kinds: &[ObjectKind],
        scope: &Scope,
        name: &str,
    ) -> Result<Option<ConfigObject>> {
        for kind in kinds {
            if let Some(found) = self.find(transport, *kind, scope, name)? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    /// Nearest strict ancestor of `scope` defining `name` among `kinds`
    pub fn find_in_ancestors<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        kinds: &[ObjectKind],
        scope: &Scope,
        name: &str,
    ) -> Result<Option<ConfigObject>> {
        for ancestor in scope.ancestors() {
            if let Some(found) = self.find_any(transport, kinds, &ancestor, name)? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    /// Whether `name` among `kinds` is visible from `scope`
    pub fn is_visible<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        kinds: &[ObjectKind],
        scope: &Scope,
        name: &str,
    ) -> Result<bool> {
        Ok(self.find_any(transport, kinds, scope, name)?.is_some()
            || self.find_in_ancestors(transport, kinds, scope, name)?.is_some())
    }

    /// Number of list calls issued so far
    pub fn fetches(&self) -> usize {
        self.fetches
    }
}
