//! Account key storage.
//!
//! Account keys are the per-user pairing secrets handed out during pairing.
//! The store keeps a fixed number of slots; each slot is one durable record
//! under `fp/ak/<slot>`. Reads are served from a cache that is rebuilt by
//! replay at boot and updated only after a durable write or delete succeeded.

mod record;

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::{debug, info};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::reset::ResetModule;
use crate::store::keys::{self, ACCOUNT_KEY_SUBTREE};
use crate::store::{DurableStore, SettingsHandler};
use crate::{StorageError, StorageResult};

use record::SlotRecord;

/// Length of an account key in bytes.
pub const ACCOUNT_KEY_LEN: usize = 16;

/// Registry name of the account key module.
pub const MODULE_NAME: &str = "account_key";

/// A 128-bit account key. The bytes are wiped on drop and never printed.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct AccountKey([u8; ACCOUNT_KEY_LEN]);

impl AccountKey {
    /// Wraps raw key bytes.
    #[must_use]
    pub const fn new(bytes: [u8; ACCOUNT_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Copies a key out of a slice.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidInput`] unless `bytes` is exactly
    /// [`ACCOUNT_KEY_LEN`] long.
    pub fn from_slice(bytes: &[u8]) -> StorageResult<Self> {
        let bytes: [u8; ACCOUNT_KEY_LEN] = bytes.try_into().map_err(|_| {
            StorageError::invalid_input(
                "account_key",
                format!("expected {ACCOUNT_KEY_LEN} bytes, got {}", bytes.len()),
            )
        })?;
        Ok(Self(bytes))
    }

    /// Returns the key bytes. Treat them as secret.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; ACCOUNT_KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccountKey(<redacted>)")
    }
}

struct SlotEntry {
    key: AccountKey,
    sequence: u64,
}

/// Slot-based account key store.
pub struct AccountKeyStore {
    store: Arc<dyn DurableStore>,
    max_slots: usize,
    slots: RwLock<Vec<Option<SlotEntry>>>,
}

impl fmt::Debug for AccountKeyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountKeyStore")
            .field("max_slots", &self.max_slots)
            .field("count", &self.count())
            .finish_non_exhaustive()
    }
}

impl AccountKeyStore {
    /// Creates an empty store with `max_slots` slots. Call
    /// [`replay`](crate::store::replay) to load persisted keys.
    #[must_use]
    pub fn new(store: Arc<dyn DurableStore>, max_slots: usize) -> Self {
        Self {
            store,
            max_slots,
            slots: RwLock::new(empty_slots(max_slots)),
        }
    }

    /// Returns the number of slots.
    #[must_use]
    pub const fn max_slots(&self) -> usize {
        self.max_slots
    }

    /// Persists `key` and returns the slot it occupies.
    ///
    /// A key that is already stored keeps its slot. When every slot is in
    /// use the oldest key is overwritten.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be encoded or written; the cache
    /// is left untouched in that case.
    pub fn save(&self, key: &AccountKey) -> StorageResult<usize> {
        let mut slots = self.slots_mut();

        if let Some(slot) = slots
            .iter()
            .position(|entry| entry.as_ref().is_some_and(|entry| entry.key == *key))
        {
            debug!("account key already stored in slot {slot}");
            return Ok(slot);
        }

        let slot = match slots.iter().position(Option::is_none) {
            Some(free) => free,
            None => oldest_slot(&slots),
        };
        let sequence = slots
            .iter()
            .flatten()
            .map(|entry| entry.sequence)
            .max()
            .map_or(1, |latest| latest.saturating_add(1));

        let bytes = SlotRecord::new(*key.as_bytes(), sequence).serialize()?;
        self.store.write(&slot_key(slot), &bytes)?;

        if slots[slot].is_some() {
            info!("account key slots full, replaced oldest key in slot {slot}");
        }
        slots[slot] = Some(SlotEntry {
            key: key.clone(),
            sequence,
        });
        Ok(slot)
    }

    /// Returns every stored key, oldest first.
    #[must_use]
    pub fn get(&self) -> Vec<AccountKey> {
        let slots = self.slots();
        let mut entries: Vec<&SlotEntry> = slots.iter().flatten().collect();
        entries.sort_by_key(|entry| entry.sequence);
        entries.into_iter().map(|entry| entry.key.clone()).collect()
    }

    /// Returns the number of stored keys.
    #[must_use]
    pub fn count(&self) -> usize {
        self.slots().iter().flatten().count()
    }

    /// Returns the oldest stored key accepted by `predicate`.
    pub fn find(&self, predicate: impl Fn(&AccountKey) -> bool) -> Option<AccountKey> {
        self.get().into_iter().find(|key| predicate(key))
    }

    /// Deletes the key in `slot`. Deleting an empty slot succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidInput`] for a slot outside the store and
    /// the store error if the durable delete fails.
    pub fn delete(&self, slot: usize) -> StorageResult<()> {
        if slot >= self.max_slots {
            return Err(StorageError::invalid_input(
                "slot",
                format!("slot {slot} outside 0..{}", self.max_slots),
            ));
        }
        let mut slots = self.slots_mut();
        self.store.delete(&slot_key(slot))?;
        slots[slot] = None;
        Ok(())
    }

    /// Drops the cached keys without touching durable storage.
    pub fn clear_cache(&self) {
        *self.slots_mut() = empty_slots(self.max_slots);
    }

    fn slots(&self) -> RwLockReadGuard<'_, Vec<Option<SlotEntry>>> {
        self.slots.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn slots_mut(&self) -> RwLockWriteGuard<'_, Vec<Option<SlotEntry>>> {
        self.slots.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SettingsHandler for AccountKeyStore {
    fn subtree(&self) -> &str {
        ACCOUNT_KEY_SUBTREE
    }

    fn set(&self, name: &str, value: &[u8]) -> StorageResult<()> {
        let key = keys::join(ACCOUNT_KEY_SUBTREE, name);
        let slot: usize = name
            .parse()
            .map_err(|_| StorageError::invalid_record(&key, "not a slot index"))?;
        if slot >= self.max_slots {
            return Err(StorageError::invalid_record(
                &key,
                format!("slot beyond the configured {} slots", self.max_slots),
            ));
        }
        let record = SlotRecord::deserialize(&key, value)?;
        self.slots_mut()[slot] = Some(SlotEntry {
            key: AccountKey::new(record.key),
            sequence: record.sequence,
        });
        Ok(())
    }

    fn commit(&self) -> StorageResult<()> {
        debug!("account keys loaded: {}", self.count());
        Ok(())
    }
}

impl ResetModule for AccountKeyStore {
    fn name(&self) -> &str {
        MODULE_NAME
    }

    fn perform(&self) -> StorageResult<()> {
        for slot in 0..self.max_slots {
            self.delete(slot)?;
        }
        // Slots left over from a larger configuration.
        self.store.delete_subtree(ACCOUNT_KEY_SUBTREE)
    }
}

fn empty_slots(max_slots: usize) -> Vec<Option<SlotEntry>> {
    std::iter::repeat_with(|| None).take(max_slots).collect()
}

fn oldest_slot(slots: &[Option<SlotEntry>]) -> usize {
    slots
        .iter()
        .enumerate()
        .filter_map(|(slot, entry)| entry.as_ref().map(|entry| (slot, entry.sequence)))
        .min_by_key(|(_, sequence)| *sequence)
        .map_or(0, |(slot, _)| slot)
}

fn slot_key(slot: usize) -> String {
    keys::join(ACCOUNT_KEY_SUBTREE, &slot.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{replay, MemoryStore};

    fn key(byte: u8) -> AccountKey {
        AccountKey::new([byte; ACCOUNT_KEY_LEN])
    }

    fn setup(max_slots: usize) -> (Arc<MemoryStore>, AccountKeyStore) {
        let store = Arc::new(MemoryStore::new());
        let keys = AccountKeyStore::new(store.clone(), max_slots);
        (store, keys)
    }

    #[test]
    fn test_save_get_and_replay() {
        let (store, keys) = setup(5);
        keys.save(&key(1)).unwrap();
        keys.save(&key(2)).unwrap();
        assert_eq!(keys.get(), vec![key(1), key(2)]);

        keys.clear_cache();
        assert_eq!(keys.count(), 0);

        replay(store.as_ref(), &keys).unwrap();
        assert_eq!(keys.get(), vec![key(1), key(2)]);
    }

    #[test]
    fn test_duplicate_key_keeps_slot() {
        let (store, keys) = setup(3);
        assert_eq!(keys.save(&key(9)).unwrap(), 0);
        let writes = store.mutation_count();
        assert_eq!(keys.save(&key(9)).unwrap(), 0);
        assert_eq!(store.mutation_count(), writes);
        assert_eq!(keys.count(), 1);
    }

    #[test]
    fn test_full_store_replaces_oldest() {
        let (store, keys) = setup(2);
        keys.save(&key(1)).unwrap();
        keys.save(&key(2)).unwrap();
        assert_eq!(keys.save(&key(3)).unwrap(), 0);
        assert_eq!(keys.get(), vec![key(2), key(3)]);

        // Age order survives a reload.
        keys.clear_cache();
        replay(store.as_ref(), &keys).unwrap();
        assert_eq!(keys.save(&key(4)).unwrap(), 1);
        assert_eq!(keys.get(), vec![key(3), key(4)]);
    }

    #[test]
    fn test_find() {
        let (_store, keys) = setup(5);
        keys.save(&key(1)).unwrap();
        keys.save(&key(2)).unwrap();
        assert_eq!(keys.find(|k| k.as_bytes()[0] == 2), Some(key(2)));
        assert_eq!(keys.find(|k| k.as_bytes()[0] == 7), None);
    }

    #[test]
    fn test_failed_write_leaves_cache_untouched() {
        let (store, keys) = setup(5);
        keys.save(&key(1)).unwrap();
        store.fail_subtree(ACCOUNT_KEY_SUBTREE);
        assert!(keys.save(&key(2)).is_err());
        assert!(keys.delete(0).is_err());
        assert_eq!(keys.get(), vec![key(1)]);
    }

    #[test]
    fn test_delete_out_of_range_slot() {
        let (_store, keys) = setup(2);
        assert!(matches!(
            keys.delete(2),
            Err(StorageError::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_perform_is_idempotent() {
        let (store, keys) = setup(5);
        keys.save(&key(1)).unwrap();
        keys.save(&key(2)).unwrap();
        store.write("fp/ak/7", &[0]).unwrap();

        keys.perform().unwrap();
        assert_eq!(keys.count(), 0);
        assert!(store.is_empty());

        keys.perform().unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_replay_rejects_bad_records() {
        let (store, keys) = setup(2);
        store.write("fp/ak/0", &[0xFF, 0x00]).unwrap();
        store
            .write("fp/ak/5", &SlotRecord::new([1; 16], 1).serialize().unwrap())
            .unwrap();
        store.write("fp/ak/x", &[]).unwrap();

        let stats = replay(store.as_ref(), &keys).unwrap();
        assert_eq!(stats.loaded, 0);
        assert_eq!(stats.rejected, 3);
        assert_eq!(keys.count(), 0);
    }

    #[test]
    fn test_debug_is_redacted() {
        assert_eq!(format!("{:?}", key(0xAB)), "AccountKey(<redacted>)");
        assert!(AccountKey::from_slice(&[0; 15]).is_err());
        assert_eq!(AccountKey::from_slice(&[5; 16]).unwrap(), key(5));
    }
}
