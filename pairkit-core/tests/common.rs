#![allow(dead_code, missing_docs)]

//! Common test utilities shared across integration tests.

use std::sync::{Arc, Mutex};

use pairkit_core::{
    AccountKey, MemoryStore, PairingStorage, ResetModule, StorageConfig, StorageResult,
};

pub const RESET_FLAG_KEY: &str = "fp_reset/reset_in_progress";

/// Deterministic account keys: key `i` of seed `s` is `s + i` followed by
/// the bytes 1..=15.
pub fn account_keys(seed: u8, count: usize) -> Vec<AccountKey> {
    (0..count)
        .map(|index| {
            let mut bytes = [0u8; 16];
            bytes[0] = seed.wrapping_add(u8::try_from(index).expect("small index"));
            for (offset, byte) in bytes.iter_mut().enumerate().skip(1) {
                *byte = u8::try_from(offset).expect("small offset");
            }
            AccountKey::new(bytes)
        })
        .collect()
}

/// Saves `count` keys of `seed` and the personalized name `name`.
pub fn populate(storage: &PairingStorage, seed: u8, count: usize, name: &str) {
    for key in account_keys(seed, count) {
        storage.account_keys().save(&key).expect("save account key");
    }
    storage
        .personalized_name()
        .expect("personalized name enabled")
        .save(name)
        .expect("save name");
}

/// Stored personalized name.
pub fn name(storage: &PairingStorage) -> String {
    storage
        .personalized_name()
        .expect("personalized name enabled")
        .get()
}

pub fn boot(store: &Arc<MemoryStore>) -> PairingStorage {
    PairingStorage::boot(store.clone(), StorageConfig::default()).expect("boot")
}

/// Restarts the device: a fresh store holding only committed data.
pub fn reboot(store: &MemoryStore) -> Arc<MemoryStore> {
    Arc::new(store.reboot())
}

/// Asserts that no pairing data survives, neither cached nor durable.
pub fn assert_wiped(storage: &PairingStorage, store: &MemoryStore) {
    assert_eq!(storage.account_keys().count(), 0);
    assert_eq!(name(storage), "");
    assert!(!storage.reset_in_progress());
    assert_eq!(store.keys(), vec![RESET_FLAG_KEY.to_string()]);
    assert_eq!(store.get(RESET_FLAG_KEY), Some(vec![0]));
}

/// Reset module that records what it saw during the reset.
pub struct Probe {
    name: &'static str,
    store: Arc<MemoryStore>,
    pub events: Mutex<Vec<String>>,
    /// Value of the reset flag observed by each `perform`.
    pub flag_seen: Mutex<Vec<Option<Vec<u8>>>>,
    /// Number of account key records present at each `perform`.
    pub keys_seen: Mutex<Vec<usize>>,
}

impl Probe {
    pub fn new(name: &'static str, store: &Arc<MemoryStore>) -> Arc<Self> {
        Arc::new(Self {
            name,
            store: Arc::clone(store),
            events: Mutex::new(Vec::new()),
            flag_seen: Mutex::new(Vec::new()),
            keys_seen: Mutex::new(Vec::new()),
        })
    }
}

impl ResetModule for Probe {
    fn name(&self) -> &str {
        self.name
    }

    fn prepare(&self) {
        self.events.lock().unwrap().push("prepare".to_string());
    }

    fn perform(&self) -> StorageResult<()> {
        self.events.lock().unwrap().push("perform".to_string());
        self.flag_seen
            .lock()
            .unwrap()
            .push(self.store.get(RESET_FLAG_KEY));
        let keys = self
            .store
            .keys()
            .iter()
            .filter(|key| key.starts_with("fp/ak/"))
            .count();
        self.keys_seen.lock().unwrap().push(keys);
        Ok(())
    }
}
