//! Version history over ordered message-id sequences.

use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::identifier::Identifier;

/// An immutable ordered list of message identifiers, as they stood at one
/// point in history.
#[derive(Debug, Clone)]
pub struct Version {
    pub ids: Vec<Identifier>,
    pub metadata: Map<String, Value>,
}

/// Resolves a possibly-negative index against a length, Python-slice style.
fn resolve_index(index: i64, len: usize) -> Option<usize> {
    if index >= 0 {
        let i = index as usize;
        (i < len).then_some(i)
    } else {
        let from_end = (-index) as usize;
        (from_end <= len).then(|| len - from_end)
    }
}

/// Owns the full version history for one agent's [`crate::message_list::MessageList`].
#[derive(Default)]
pub struct VersionManager {
    versions: Vec<Version>,
}

impl VersionManager {
    pub fn new() -> Self {
        VersionManager { versions: Vec::new() }
    }

    pub fn add_version(&mut self, ids: Vec<Identifier>, metadata: Map<String, Value>) -> usize {
        self.versions.push(Version { ids, metadata });
        self.versions.len() - 1
    }

    pub fn current(&self) -> Vec<Identifier> {
        self.versions.last().map(|v| v.ids.clone()).unwrap_or_default()
    }

    pub fn current_index(&self) -> i64 {
        self.versions.len() as i64 - 1
    }

    pub fn get_version(&self, index: i64) -> Result<Vec<Identifier>> {
        if self.versions.is_empty() {
            return Ok(Vec::new());
        }
        let i = resolve_index(index, self.versions.len())
            .ok_or_else(|| Error::validation(format!("version index {index} out of range")))?;
        Ok(self.versions[i].ids.clone())
    }

    /// Non-destructive: appends a new version whose contents equal the target
    /// version, annotated with where it reverted from/to.
    pub fn revert_to(&mut self, index: i64) -> Result<usize> {
        let target_ids = self.get_version(index)?;
        let target_index = resolve_index(index, self.versions.len()).unwrap();
        let mut metadata = Map::new();
        metadata.insert("reverted_from".into(), Value::from(self.current_index()));
        metadata.insert("reverted_to".into(), Value::from(target_index as i64));
        Ok(self.add_version(target_ids, metadata))
    }

    /// Deep-copies versions up through `index` into a freshly-owned manager,
    /// used by `Agent::fork`.
    pub fn fork_at(&self, index: i64) -> Result<VersionManager> {
        if self.versions.is_empty() {
            return Ok(VersionManager::new());
        }
        let i = resolve_index(index, self.versions.len())
            .ok_or_else(|| Error::validation(format!("version index {index} out of range")))?;
        Ok(VersionManager {
            versions: self.versions[..=i].to_vec(),
        })
    }

    /// Destructive: drops every version after `index`.
    pub fn truncate_after(&mut self, index: i64) -> Result<()> {
        if self.versions.is_empty() {
            return Ok(());
        }
        let i = resolve_index(index, self.versions.len())
            .ok_or_else(|| Error::validation(format!("version index {index} out of range")))?;
        self.versions.truncate(i + 1);
        Ok(())
    }

    pub fn changes_between(&self, a: i64, b: i64) -> Result<(Vec<Identifier>, Vec<Identifier>)> {
        let ids_a: std::collections::HashSet<_> = self.get_version(a)?.into_iter().collect();
        let ids_b: std::collections::HashSet<_> = self.get_version(b)?.into_iter().collect();
        let added = ids_b.difference(&ids_a).cloned().collect();
        let removed = ids_a.difference(&ids_b).cloned().collect();
        Ok((added, removed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<Identifier> {
        (0..n).map(|_| Identifier::new()).collect()
    }

    #[test]
    fn empty_manager_has_index_minus_one_and_empty_version() {
        let vm = VersionManager::new();
        assert_eq!(vm.current_index(), -1);
        assert_eq!(vm.get_version(-1).unwrap(), Vec::new());
    }

    #[test]
    fn add_version_increments_current_index() {
        let mut vm = VersionManager::new();
        let v0 = ids(2);
        let idx = vm.add_version(v0.clone(), Map::new());
        assert_eq!(idx, 0);
        assert_eq!(vm.current(), v0);
        assert_eq!(vm.current_index(), 0);
    }

    #[test]
    fn revert_to_is_non_destructive() {
        let mut vm = VersionManager::new();
        let v0 = ids(1);
        let v1 = ids(2);
        let v2 = ids(3);
        vm.add_version(v0.clone(), Map::new());
        vm.add_version(v1.clone(), Map::new());
        vm.add_version(v2, Map::new());
        let new_idx = vm.revert_to(1).unwrap();
        assert_eq!(new_idx, 3);
        assert_eq!(vm.current(), v1);
        // earlier versions remain retrievable unchanged
        assert_eq!(vm.get_version(0).unwrap(), v0);
        assert_eq!(vm.get_version(1).unwrap(), v1);
        assert_eq!(vm.current_index(), 3);
    }

    #[test]
    fn truncate_after_is_destructive() {
        let mut vm = VersionManager::new();
        vm.add_version(ids(1), Map::new());
        vm.add_version(ids(2), Map::new());
        vm.add_version(ids(3), Map::new());
        vm.truncate_after(0).unwrap();
        assert_eq!(vm.current_index(), 0);
    }

    #[test]
    fn fork_at_deep_copies_prefix_and_is_independent() {
        let mut vm = VersionManager::new();
        vm.add_version(ids(1), Map::new());
        vm.add_version(ids(2), Map::new());
        let mut fork = vm.fork_at(0).unwrap();
        fork.add_version(ids(5), Map::new());
        assert_eq!(vm.current_index(), 1);
        assert_eq!(fork.current_index(), 1);
    }

    #[test]
    fn get_version_rejects_out_of_range_index() {
        let vm = VersionManager::new();
        let mut vm2 = vm;
        vm2.add_version(ids(1), Map::new());
        assert!(vm2.get_version(5).is_err());
        assert!(vm2.get_version(-5).is_err());
    }
}
