//! Boot flow: replay every module from the durable store, then finish any
//! interrupted factory reset before handing out the storage handle.

use std::sync::Arc;

use log::{info, warn};

use crate::reset::{FactoryReset, RegistryBuilder, ResetModule, ResetState};
use crate::store::{replay, DurableStore, ReplayStats};
use crate::{AccountKeyStore, PersonalizedNameStore, StorageConfig, StorageResult};

/// What the boot flow found in the durable store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BootReport {
    /// Records accepted during replay.
    pub records_loaded: usize,
    /// Records rejected as invalid and treated as absent.
    pub records_rejected: usize,
    /// Whether an interrupted factory reset was finished during boot.
    pub resumed_reset: bool,
}

/// Configures a boot with additional reset modules.
pub struct BootBuilder {
    store: Arc<dyn DurableStore>,
    config: StorageConfig,
    modules: Vec<Arc<dyn ResetModule>>,
}

impl BootBuilder {
    /// Starts a boot over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn DurableStore>, config: StorageConfig) -> Self {
        Self {
            store,
            config,
            modules: Vec::new(),
        }
    }

    /// Adds a module to the reset registry next to the built-in ones.
    #[must_use]
    pub fn register(mut self, module: Arc<dyn ResetModule>) -> Self {
        self.modules.push(module);
        self
    }

    /// Replays the store and resumes an interrupted reset.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidConfig`](crate::StorageError::InvalidConfig) for
    /// out-of-range limits, [`DuplicateModule`](crate::StorageError::DuplicateModule)
    /// if a registered module reuses a name, or the store error that stopped
    /// replay or resume. A failed resume leaves the reset flag set and is
    /// retried by the next boot.
    pub fn boot(self) -> StorageResult<PairingStorage> {
        let Self {
            store,
            config,
            modules,
        } = self;
        config.validate()?;

        let account_keys = Arc::new(AccountKeyStore::new(
            Arc::clone(&store),
            config.max_account_keys,
        ));
        let personalized_name = config.personalized_name.then(|| {
            Arc::new(PersonalizedNameStore::new(
                Arc::clone(&store),
                config.max_name_len,
            ))
        });

        let mut builder = RegistryBuilder::new().register(account_keys.clone());
        if let Some(names) = &personalized_name {
            builder = builder.register(names.clone());
        }
        let registry = modules
            .into_iter()
            .fold(builder, RegistryBuilder::register)
            .build()?;
        let reset = FactoryReset::new(Arc::clone(&store), registry);

        let storage = PairingStorage {
            store,
            config,
            account_keys,
            personalized_name,
            reset,
            report: BootReport::default(),
        };
        let report = storage.load()?;
        info!(
            "pairing storage ready: {} records, {} rejected",
            report.records_loaded, report.records_rejected
        );
        Ok(PairingStorage { report, ..storage })
    }
}

/// Handle to the pairing data stores after boot.
///
/// The per-module stores are only reachable through this handle, so no
/// caller sees data that an interrupted reset was about to delete.
pub struct PairingStorage {
    store: Arc<dyn DurableStore>,
    config: StorageConfig,
    account_keys: Arc<AccountKeyStore>,
    personalized_name: Option<Arc<PersonalizedNameStore>>,
    reset: FactoryReset,
    report: BootReport,
}

impl std::fmt::Debug for PairingStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairingStorage")
            .field("config", &self.config)
            .field("account_keys", &self.account_keys)
            .field("personalized_name", &self.personalized_name)
            .field("reset", &self.reset)
            .finish_non_exhaustive()
    }
}

impl PairingStorage {
    /// Boots with the built-in modules only.
    ///
    /// # Errors
    ///
    /// See [`BootBuilder::boot`].
    pub fn boot(store: Arc<dyn DurableStore>, config: StorageConfig) -> StorageResult<Self> {
        BootBuilder::new(store, config).boot()
    }

    /// Account key store.
    #[must_use]
    pub fn account_keys(&self) -> &AccountKeyStore {
        &self.account_keys
    }

    /// Personalized name store, `None` when disabled in [`StorageConfig`].
    #[must_use]
    pub fn personalized_name(&self) -> Option<&PersonalizedNameStore> {
        self.personalized_name.as_deref()
    }

    /// Configuration the stores were built with.
    #[must_use]
    pub const fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// What boot found.
    #[must_use]
    pub const fn boot_report(&self) -> BootReport {
        self.report
    }

    /// Returns `true` while a reset is started and not yet confirmed.
    #[must_use]
    pub fn reset_in_progress(&self) -> bool {
        self.reset.reset_in_progress()
    }

    /// Current factory reset state.
    #[must_use]
    pub fn reset_state(&self) -> ResetState {
        self.reset.state()
    }

    /// Registered module names in reset order.
    #[must_use]
    pub fn modules(&self) -> Vec<&str> {
        self.reset.registry().names()
    }

    /// Wipes every module. Retrying after a failure resumes the reset.
    ///
    /// # Errors
    ///
    /// See [`FactoryReset::factory_reset`].
    pub fn factory_reset(&self) -> StorageResult<()> {
        self.reset.factory_reset()
    }

    /// Drops every cache and replays the durable store again, finishing an
    /// interrupted reset if one is found.
    ///
    /// # Errors
    ///
    /// Returns the store error that stopped replay or resume.
    pub fn resync(&self) -> StorageResult<BootReport> {
        self.account_keys.clear_cache();
        if let Some(names) = &self.personalized_name {
            names.clear_cache();
        }
        self.load()
    }

    fn load(&self) -> StorageResult<BootReport> {
        let store = self.store.as_ref();
        let mut stats = replay(store, self.account_keys.as_ref())?;
        if let Some(names) = &self.personalized_name {
            stats = stats.merge(replay(store, names.as_ref())?);
        }
        stats = stats.merge(replay(store, &self.reset)?);

        let resumed_reset = self.reset.reset_in_progress();
        if resumed_reset {
            warn!("interrupted factory reset found at boot");
            self.reset.resume()?;
        }
        Ok(report(stats, resumed_reset))
    }
}

const fn report(stats: ReplayStats, resumed_reset: bool) -> BootReport {
    BootReport {
        records_loaded: stats.loaded,
        records_rejected: stats.rejected,
        resumed_reset,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reset::flag_key;
    use crate::{AccountKey, MemoryStore, StorageError};

    #[test]
    fn test_boot_empty_store() {
        let store = Arc::new(MemoryStore::new());
        let storage = PairingStorage::boot(store, StorageConfig::default()).unwrap();
        assert_eq!(storage.boot_report(), BootReport::default());
        assert_eq!(storage.reset_state(), ResetState::Idle);
        assert_eq!(storage.modules(), vec!["account_key", "personalized_name"]);
    }

    #[test]
    fn test_boot_loads_persisted_data() {
        let store = Arc::new(MemoryStore::new());
        {
            let storage = PairingStorage::boot(store.clone(), StorageConfig::default()).unwrap();
            storage.account_keys().save(&AccountKey::new([1; 16])).unwrap();
            storage.personalized_name().unwrap().save("Hall").unwrap();
        }

        let storage =
            PairingStorage::boot(Arc::new(store.reboot()), StorageConfig::default()).unwrap();
        assert_eq!(storage.account_keys().count(), 1);
        assert_eq!(storage.personalized_name().unwrap().get(), "Hall");
        assert_eq!(storage.boot_report().records_loaded, 2);
    }

    #[test]
    fn test_boot_resumes_interrupted_reset() {
        let store = Arc::new(MemoryStore::new());
        {
            let storage = PairingStorage::boot(store.clone(), StorageConfig::default()).unwrap();
            storage.account_keys().save(&AccountKey::new([2; 16])).unwrap();
        }
        store.write(&flag_key(), &[1]).unwrap();

        let storage = PairingStorage::boot(store.clone(), StorageConfig::default()).unwrap();
        assert!(storage.boot_report().resumed_reset);
        assert_eq!(storage.account_keys().count(), 0);
        assert_eq!(store.get(&flag_key()), Some(vec![0]));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_failed_resume_fails_boot() {
        let store = Arc::new(MemoryStore::new());
        store.write(&flag_key(), &[1]).unwrap();
        store.fail_subtree("fp/pn");

        let err = PairingStorage::boot(store.clone(), StorageConfig::default()).unwrap_err();
        assert!(matches!(err, StorageError::ResetIncomplete { .. }));
        assert_eq!(store.get(&flag_key()), Some(vec![1]));

        store.clear_faults();
        let storage = PairingStorage::boot(store.clone(), StorageConfig::default()).unwrap();
        assert!(storage.boot_report().resumed_reset);
        assert_eq!(store.get(&flag_key()), Some(vec![0]));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = StorageConfig {
            max_account_keys: 0,
            ..StorageConfig::default()
        };
        let err = PairingStorage::boot(Arc::new(MemoryStore::new()), config).unwrap_err();
        assert!(matches!(err, StorageError::InvalidConfig(_)));
    }

    #[test]
    fn test_resync_reloads_caches() {
        let store = Arc::new(MemoryStore::new());
        let storage = PairingStorage::boot(store.clone(), StorageConfig::default()).unwrap();
        storage.personalized_name().unwrap().save("Den").unwrap();
        store.write("fp/pn/name", b"Attic").unwrap();

        let report = storage.resync().unwrap();
        assert_eq!(report.records_loaded, 1);
        assert_eq!(storage.personalized_name().unwrap().get(), "Attic");
    }

    #[test]
    fn test_disabled_personalized_name_is_left_alone() {
        let store = Arc::new(MemoryStore::new());
        store.write("fp/pn/name", b"Porch").unwrap();
        let config = StorageConfig {
            personalized_name: false,
            ..StorageConfig::default()
        };

        let storage = PairingStorage::boot(store.clone(), config).unwrap();
        assert!(storage.personalized_name().is_none());
        assert_eq!(storage.modules(), vec!["account_key"]);
        assert_eq!(storage.boot_report().records_loaded, 0);

        storage.factory_reset().unwrap();
        assert_eq!(store.get("fp/pn/name").as_deref(), Some(&b"Porch"[..]));
    }
}
