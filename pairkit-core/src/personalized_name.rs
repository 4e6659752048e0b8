//! Personalized name storage.
//!
//! The personalized name is the user-chosen display name of the device. It
//! is stored raw as UTF-8 under `fp/pn/name`; an absent record reads as the
//! empty string.

use std::sync::{Arc, PoisonError, RwLock};

use log::debug;

use crate::reset::ResetModule;
use crate::store::keys::{self, PERSONALIZED_NAME_NAME, PERSONALIZED_NAME_SUBTREE};
use crate::store::{DurableStore, SettingsHandler};
use crate::{StorageError, StorageResult};

/// Registry name of the personalized name module.
pub const MODULE_NAME: &str = "personalized_name";

/// Store for the single personalized name record.
pub struct PersonalizedNameStore {
    store: Arc<dyn DurableStore>,
    max_len: usize,
    name: RwLock<String>,
}

impl std::fmt::Debug for PersonalizedNameStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersonalizedNameStore")
            .field("max_len", &self.max_len)
            .field("name", &self.get())
            .finish_non_exhaustive()
    }
}

impl PersonalizedNameStore {
    /// Creates a store accepting names of up to `max_len` bytes.
    #[must_use]
    pub fn new(store: Arc<dyn DurableStore>, max_len: usize) -> Self {
        Self {
            store,
            max_len,
            name: RwLock::new(String::new()),
        }
    }

    /// Persists `name`. Saving the empty string deletes the record.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidInput`] for names longer than the
    /// configured limit, or the store error if the write fails.
    pub fn save(&self, name: &str) -> StorageResult<()> {
        if name.len() > self.max_len {
            return Err(StorageError::invalid_input(
                "name",
                format!("{} bytes exceeds the {}-byte limit", name.len(), self.max_len),
            ));
        }
        if name.is_empty() {
            return self.delete();
        }

        let mut cached = self.name.write().unwrap_or_else(PoisonError::into_inner);
        self.store.write(&record_key(), name.as_bytes())?;
        name.clone_into(&mut cached);
        debug!("personalized name saved ({} bytes)", name.len());
        Ok(())
    }

    /// Returns the stored name, or `""` if none is stored.
    #[must_use]
    pub fn get(&self) -> String {
        self.name
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Deletes the stored name. Deleting an absent name succeeds.
    ///
    /// # Errors
    ///
    /// Returns the store error if the durable delete fails.
    pub fn delete(&self) -> StorageResult<()> {
        let mut cached = self.name.write().unwrap_or_else(PoisonError::into_inner);
        self.store.delete(&record_key())?;
        cached.clear();
        Ok(())
    }

    /// Drops the cached name without touching durable storage.
    pub fn clear_cache(&self) {
        self.name
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl SettingsHandler for PersonalizedNameStore {
    fn subtree(&self) -> &str {
        PERSONALIZED_NAME_SUBTREE
    }

    fn set(&self, name: &str, value: &[u8]) -> StorageResult<()> {
        let key = keys::join(PERSONALIZED_NAME_SUBTREE, name);
        if name != PERSONALIZED_NAME_NAME {
            return Err(StorageError::invalid_record(key, "unknown record"));
        }
        if value.len() > self.max_len {
            return Err(StorageError::invalid_record(
                key,
                format!("{} bytes exceeds the {}-byte limit", value.len(), self.max_len),
            ));
        }
        let text = std::str::from_utf8(value)
            .map_err(|err| StorageError::invalid_record(&key, err.to_string()))?;
        text.clone_into(&mut self.name.write().unwrap_or_else(PoisonError::into_inner));
        Ok(())
    }
}

impl ResetModule for PersonalizedNameStore {
    fn name(&self) -> &str {
        MODULE_NAME
    }

    fn perform(&self) -> StorageResult<()> {
        self.delete()?;
        self.store.delete_subtree(PERSONALIZED_NAME_SUBTREE)
    }
}

fn record_key() -> String {
    keys::join(PERSONALIZED_NAME_SUBTREE, PERSONALIZED_NAME_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{replay, MemoryStore};

    fn setup() -> (Arc<MemoryStore>, PersonalizedNameStore) {
        let store = Arc::new(MemoryStore::new());
        let names = PersonalizedNameStore::new(store.clone(), 64);
        (store, names)
    }

    #[test]
    fn test_save_get_and_replay() {
        let (store, names) = setup();
        assert_eq!(names.get(), "");

        names.save("Living room").unwrap();
        assert_eq!(names.get(), "Living room");
        assert_eq!(store.get("fp/pn/name").as_deref(), Some(&b"Living room"[..]));

        names.clear_cache();
        assert_eq!(names.get(), "");
        replay(store.as_ref(), &names).unwrap();
        assert_eq!(names.get(), "Living room");
    }

    #[test]
    fn test_name_length_limit() {
        let (store, names) = setup();
        names.save(&"a".repeat(64)).unwrap();
        let err = names.save(&"a".repeat(65)).unwrap_err();
        assert!(matches!(err, StorageError::InvalidInput { .. }));
        assert_eq!(names.get().len(), 64);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_empty_name_deletes_record() {
        let (store, names) = setup();
        names.save("x").unwrap();
        names.save("").unwrap();
        assert!(store.is_empty());
        assert_eq!(names.get(), "");
    }

    #[test]
    fn test_perform_is_idempotent() {
        let (store, names) = setup();
        names.save("Desk").unwrap();
        store.write("fp/pn/legacy", b"old").unwrap();
        names.perform().unwrap();
        names.perform().unwrap();
        assert!(store.is_empty());
        assert_eq!(names.get(), "");
    }

    #[test]
    fn test_replay_rejects_invalid_utf8() {
        let (store, names) = setup();
        store.write("fp/pn/name", &[0xC3, 0x28]).unwrap();
        let stats = replay(store.as_ref(), &names).unwrap();
        assert_eq!(stats.rejected, 1);
        assert_eq!(names.get(), "");
    }
}
