use serde::{Deserialize, Serialize};

use crate::{StorageError, StorageResult};

/// Default number of account key slots.
pub const DEFAULT_MAX_ACCOUNT_KEYS: usize = 5;

/// Upper bound accepted for `max_account_keys`.
pub const ACCOUNT_KEY_SLOT_LIMIT: usize = 10;

/// Default maximum personalized name length, in bytes.
pub const DEFAULT_MAX_NAME_LEN: usize = 64;

/// Upper bound accepted for `max_name_len`.
pub const NAME_LEN_LIMIT: usize = 255;

/// Sizing of the per-module stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Number of account key slots. When every slot is used, saving a new
    /// key overwrites the oldest one.
    pub max_account_keys: usize,
    /// Maximum personalized name length in bytes.
    pub max_name_len: usize,
    /// Whether the personalized name module is present. When disabled its
    /// records are neither loaded nor wiped by a factory reset.
    pub personalized_name: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_account_keys: DEFAULT_MAX_ACCOUNT_KEYS,
            max_name_len: DEFAULT_MAX_NAME_LEN,
            personalized_name: true,
        }
    }
}

impl StorageConfig {
    /// Checks that both limits are in range.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidConfig`] if a limit is zero or above
    /// its upper bound.
    pub fn validate(&self) -> StorageResult<()> {
        if !(1..=ACCOUNT_KEY_SLOT_LIMIT).contains(&self.max_account_keys) {
            return Err(StorageError::InvalidConfig(format!(
                "max_account_keys must be within 1..={ACCOUNT_KEY_SLOT_LIMIT}, got {}",
                self.max_account_keys
            )));
        }
        if !(1..=NAME_LEN_LIMIT).contains(&self.max_name_len) {
            return Err(StorageError::InvalidConfig(format!(
                "max_name_len must be within 1..={NAME_LEN_LIMIT}, got {}",
                self.max_name_len
            )));
        }
        Ok(())
    }
}
