#![deny(clippy::all, clippy::pedantic, clippy::nursery)]
//! Crash-consistent storage for pairing data.
//!
//! `pairkit-core` keeps two kinds of records in a durable key-value store:
//! per-user account keys and a short personalized name. Every storage module
//! takes part in a factory reset that survives power loss at any point: the
//! reset is bracketed by a durable in-progress flag and every destructive
//! step is idempotent, so the boot flow can simply run it again.
//!
//! ```rust
//! use std::sync::Arc;
//! use pairkit_core::{AccountKey, MemoryStore, PairingStorage, StorageConfig};
//!
//! let store = Arc::new(MemoryStore::new());
//! let storage = PairingStorage::boot(store, StorageConfig::default()).unwrap();
//!
//! storage.account_keys().save(&AccountKey::new([0x04; 16])).unwrap();
//! storage.personalized_name().unwrap().save("Kitchen speaker").unwrap();
//!
//! storage.factory_reset().unwrap();
//! assert_eq!(storage.account_keys().count(), 0);
//! assert_eq!(storage.personalized_name().unwrap().get(), "");
//! ```

mod error;
pub use error::*;

mod config;
pub use config::*;

pub mod logger;

pub mod store;
pub use store::{DurableStore, FileStore, MemoryStore, SettingsHandler};

pub mod account_key;
pub use account_key::{AccountKey, AccountKeyStore};

mod personalized_name;
pub use personalized_name::PersonalizedNameStore;

pub mod reset;
pub use reset::{FactoryReset, ModuleRegistry, RegistryBuilder, ResetModule, ResetState};

mod boot;
pub use boot::{BootBuilder, BootReport, PairingStorage};

#[cfg(feature = "ffi")]
uniffi::setup_scaffolding!("pairkit_core");
