//! In-memory durable store with fault injection.
//!
//! Nothing here survives the process. The store is meant for tests and
//! simulations: a [`Snapshot`] of the committed keys stands in for the flash
//! contents across a restart, and power loss is modeled by refusing every
//! mutation past a budget, so an interrupted operation leaves exactly the keys
//! that were committed before the cut.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError, RwLock};

use super::{keys, lost, DurableStore};
use crate::StorageResult;

/// Committed keys and values, ordered by key.
pub type Snapshot = BTreeMap<String, Vec<u8>>;

#[derive(Debug, Default)]
struct Faults {
    /// Mutations still allowed to land before power is lost.
    power_budget: Option<usize>,
    /// Subtrees whose mutations fail.
    failing_subtrees: Vec<String>,
    /// Successful writes and deletes since creation.
    mutations: u64,
}

impl Faults {
    fn admit(&mut self, operation: &str, key: &str) -> StorageResult<()> {
        if self
            .failing_subtrees
            .iter()
            .any(|subtree| keys::strip_subtree(key, subtree).is_some())
        {
            return Err(lost(operation, key, "injected failure"));
        }
        match self.power_budget {
            Some(0) => return Err(lost(operation, key, "power lost")),
            Some(ref mut remaining) => *remaining -= 1,
            None => {}
        }
        self.mutations += 1;
        Ok(())
    }
}

/// Durable store backed by an ordered in-memory map.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<Snapshot>,
    faults: Mutex<Faults>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding `snapshot`, with no faults armed.
    #[must_use]
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        Self {
            entries: RwLock::new(snapshot),
            faults: Mutex::default(),
        }
    }

    /// Returns a copy of every committed key and value.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Models a device restart: a fresh store with the committed contents
    /// and power restored.
    #[must_use]
    pub fn reboot(&self) -> Self {
        Self::from_snapshot(self.snapshot())
    }

    /// Returns the committed value of `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Returns every committed key in ascending order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Returns the number of committed keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` if no key is committed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lets the next `mutations` writes or deletes land, then fails all
    /// further mutations as if power had been cut.
    pub fn cut_power_after(&self, mutations: usize) {
        self.faults().power_budget = Some(mutations);
    }

    /// Lifts a power cut armed with [`cut_power_after`](Self::cut_power_after).
    pub fn restore_power(&self) {
        self.faults().power_budget = None;
    }

    /// Makes every mutation under `subtree` fail until [`clear_faults`](Self::clear_faults).
    pub fn fail_subtree(&self, subtree: &str) {
        self.faults().failing_subtrees.push(subtree.to_string());
    }

    /// Disarms every injected fault.
    pub fn clear_faults(&self) {
        let mut faults = self.faults();
        faults.power_budget = None;
        faults.failing_subtrees.clear();
    }

    /// Returns the number of writes and deletes that landed.
    #[must_use]
    pub fn mutation_count(&self) -> u64 {
        self.faults().mutations
    }

    fn faults(&self) -> std::sync::MutexGuard<'_, Faults> {
        self.faults.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DurableStore for MemoryStore {
    fn write(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        keys::validate(key)?;
        self.faults().admit("write", key)?;
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> StorageResult<()> {
        keys::validate(key)?;
        self.faults().admit("delete", key)?;
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }

    fn load(&self, subtree: &str, visitor: &mut dyn FnMut(&str, &[u8])) -> StorageResult<()> {
        let entries = self.snapshot();
        for (key, value) in &entries {
            if let Some(name) = keys::strip_subtree(key, subtree) {
                visitor(name, value);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StorageError;

    #[test]
    fn test_write_delete_load() {
        let store = MemoryStore::new();
        store.write("fp/pn/name", b"speaker").unwrap();
        assert_eq!(store.get("fp/pn/name").as_deref(), Some(&b"speaker"[..]));

        store.delete("fp/pn/name").unwrap();
        store.delete("fp/pn/name").unwrap();
        assert!(store.is_empty());
        assert_eq!(store.mutation_count(), 3);
    }

    #[test]
    fn test_power_cut_keeps_committed_prefix() {
        let store = MemoryStore::new();
        store.cut_power_after(2);
        store.write("a/0", &[0]).unwrap();
        store.write("a/1", &[1]).unwrap();
        let err = store.write("a/2", &[2]).unwrap_err();
        assert!(matches!(err, StorageError::Io { .. }));
        assert!(store.delete("a/0").is_err());

        let rebooted = store.reboot();
        assert_eq!(rebooted.keys(), vec!["a/0".to_string(), "a/1".to_string()]);
        rebooted.write("a/2", &[2]).unwrap();
    }

    #[test]
    fn test_failing_subtree() {
        let store = MemoryStore::new();
        store.fail_subtree("fp/pn");
        assert!(store.write("fp/pn/name", b"x").is_err());
        store.write("fp/ak/0", &[1]).unwrap();

        store.clear_faults();
        store.write("fp/pn/name", b"x").unwrap();
    }

    #[test]
    fn test_malformed_key_rejected() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.write("fp//pn", b"x"),
            Err(StorageError::InvalidInput { .. })
        ));
    }
}
