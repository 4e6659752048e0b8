//! Durable key-value store contract and its in-tree implementations.
//!
//! Keys are '/'-delimited paths such as `fp/ak/0`. A *subtree* is a key
//! prefix ending on a segment boundary: `fp/ak` covers `fp/ak/0` but not
//! `fp/akx`. Each storage module owns one subtree and rebuilds its in-memory
//! cache from it at boot through [`replay`].
//!
//! Writes and deletes are atomic per key. Sequences of keys are not, which is
//! why the factory reset keeps its own durable progress flag.

pub mod keys;
mod lock;

mod file;
mod memory;

pub use file::FileStore;
pub use memory::{MemoryStore, Snapshot};

use log::{debug, warn};

use crate::{StorageError, StorageResult};

/// Durable key-value persistence with boot-time replay.
pub trait DurableStore: Send + Sync {
    /// Atomically replaces the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is malformed or the write does not land.
    fn write(&self, key: &str, value: &[u8]) -> StorageResult<()>;

    /// Deletes `key`. Deleting an absent key succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error only for real I/O failures.
    fn delete(&self, key: &str) -> StorageResult<()>;

    /// Calls `visitor(name, value)` for every key under `subtree`, in
    /// ascending key order. `name` is the key with the `subtree/` prefix
    /// removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the subtree cannot be enumerated or read.
    fn load(&self, subtree: &str, visitor: &mut dyn FnMut(&str, &[u8])) -> StorageResult<()>;

    /// Deletes every key under `subtree`, one key at a time. Stores may also
    /// remove leftovers under the subtree that never formed a valid key.
    ///
    /// # Errors
    ///
    /// Returns the first failing delete; keys deleted before it stay deleted.
    fn delete_subtree(&self, subtree: &str) -> StorageResult<()> {
        let mut names = Vec::new();
        self.load(subtree, &mut |name, _| names.push(name.to_string()))?;
        for name in names {
            self.delete(&keys::join(subtree, &name))?;
        }
        Ok(())
    }
}

/// Receives the records of one subtree during replay.
pub trait SettingsHandler: Send + Sync {
    /// The subtree this handler owns.
    fn subtree(&self) -> &str;

    /// Applies one replayed record to the in-memory state.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidRecord`] for bytes the handler cannot
    /// decode; the record is then treated as absent.
    fn set(&self, name: &str, value: &[u8]) -> StorageResult<()>;

    /// Called once after every record of the subtree was delivered.
    ///
    /// # Errors
    ///
    /// Returns an error if the loaded state is unusable as a whole.
    fn commit(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Outcome of replaying one or more subtrees.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    /// Records accepted by their handler.
    pub loaded: usize,
    /// Records rejected as invalid and treated as absent.
    pub rejected: usize,
}

impl ReplayStats {
    pub(crate) const fn merge(self, other: Self) -> Self {
        Self {
            loaded: self.loaded + other.loaded,
            rejected: self.rejected + other.rejected,
        }
    }
}

/// Replays the handler's subtree from `store` and commits it.
///
/// Invalid records are logged and skipped so one corrupt record never blocks
/// boot. Store failures and commit failures are returned.
///
/// # Errors
///
/// Returns an error if the store cannot enumerate the subtree or the handler
/// refuses to commit.
pub fn replay(
    store: &dyn DurableStore,
    handler: &dyn SettingsHandler,
) -> StorageResult<ReplayStats> {
    let subtree = handler.subtree();
    let mut stats = ReplayStats::default();

    store.load(subtree, &mut |name, value| match handler.set(name, value) {
        Ok(()) => stats.loaded += 1,
        Err(err) => {
            warn!("dropping record {}: {err}", keys::join(subtree, name));
            stats.rejected += 1;
        }
    })?;
    handler.commit()?;

    debug!(
        "replayed {subtree}: {} loaded, {} rejected",
        stats.loaded, stats.rejected
    );
    Ok(stats)
}

pub(crate) fn io_context(operation: &str, key: &str) -> String {
    format!("{operation} {key}")
}

pub(crate) fn lost(operation: &str, key: &str, reason: &str) -> StorageError {
    StorageError::Io {
        context: io_context(operation, key),
        message: reason.to_string(),
    }
}
