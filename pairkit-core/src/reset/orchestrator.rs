//! Factory reset protocol.
//!
//! ```text
//! factory_reset()
//!   1. write fp_reset/reset_in_progress = 1      (abort on failure, nothing changed)
//!   2. prepare() every module                     (skipped when resuming)
//!   3. perform() every module in registry order   (stop at first failure, flag stays 1)
//!   4. write fp_reset/reset_in_progress = 0      (on failure flag stays 1)
//!
//! boot: replay restores the flag; if it is 1, resume() runs 3 and 4.
//! ```
//!
//! Every `perform` is idempotent, so repeating step 3 after a crash at any
//! point converges to empty storage with the flag cleared.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, error, info, warn};

use super::ModuleRegistry;
use crate::store::keys::{self, RESET_IN_PROGRESS_NAME, RESET_SUBTREE};
use crate::store::{DurableStore, SettingsHandler};
use crate::{StorageError, StorageResult};

/// Progress of the factory reset as seen by this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum ResetState {
    /// No reset is underway.
    Idle,
    /// A reset started and has not been confirmed complete.
    ResetStarted,
}

/// Drives the factory reset across every registered module.
///
/// Calls are expected to be serialized by the owner; starting a reset while
/// another one runs on a different thread is a caller error.
pub struct FactoryReset {
    store: Arc<dyn DurableStore>,
    registry: ModuleRegistry,
    in_progress: AtomicBool,
}

impl std::fmt::Debug for FactoryReset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactoryReset")
            .field("registry", &self.registry)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl FactoryReset {
    /// Creates an idle orchestrator over `registry`.
    #[must_use]
    pub const fn new(store: Arc<dyn DurableStore>, registry: ModuleRegistry) -> Self {
        Self {
            store,
            registry,
            in_progress: AtomicBool::new(false),
        }
    }

    /// Returns the registry in reset order.
    #[must_use]
    pub const fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    /// Returns `true` while a reset is started and not yet confirmed.
    #[must_use]
    pub fn reset_in_progress(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst)
    }

    /// Returns the current protocol state.
    #[must_use]
    pub fn state(&self) -> ResetState {
        if self.reset_in_progress() {
            ResetState::ResetStarted
        } else {
            ResetState::Idle
        }
    }

    /// Wipes every registered module.
    ///
    /// Calling it again after a failure resumes the interrupted reset without
    /// re-running `prepare`. Calling it after success succeeds trivially.
    ///
    /// # Errors
    ///
    /// Returns the store error if the progress flag cannot be written, or
    /// [`StorageError::ResetIncomplete`] naming the first module whose
    /// `perform` failed. In both failure cases after step 1 the flag stays
    /// set and the reset is resumed by a retry or at the next boot.
    pub fn factory_reset(&self) -> StorageResult<()> {
        let resuming = self.reset_in_progress();
        self.persist_flag(true)?;

        if resuming {
            warn!("factory reset already in progress, resuming without prepare");
        } else {
            info!("factory reset started");
            for module in self.registry.iter() {
                debug!("preparing {} for reset", module.name());
                module.prepare();
            }
        }

        self.perform_all()?;
        self.persist_flag(false)?;
        info!("factory reset complete");
        Ok(())
    }

    /// Finishes a reset that was interrupted, typically found at boot.
    ///
    /// Runs `perform` on every module and clears the flag. Does nothing when
    /// no reset is in progress.
    ///
    /// # Errors
    ///
    /// Same as the perform and final flag steps of
    /// [`factory_reset`](Self::factory_reset).
    pub fn resume(&self) -> StorageResult<()> {
        if !self.reset_in_progress() {
            return Ok(());
        }
        warn!("factory reset was interrupted, resuming");
        self.perform_all()?;
        self.persist_flag(false)?;
        info!("interrupted factory reset completed");
        Ok(())
    }

    fn perform_all(&self) -> StorageResult<()> {
        for module in self.registry.iter() {
            debug!("resetting {}", module.name());
            module.perform().map_err(|source| {
                error!("unable to reset {} ({source})", module.name());
                StorageError::ResetIncomplete {
                    module: module.name().to_string(),
                    source: Box::new(source),
                }
            })?;
        }
        Ok(())
    }

    fn persist_flag(&self, in_progress: bool) -> StorageResult<()> {
        self.store.write(&flag_key(), &[u8::from(in_progress)])?;
        self.in_progress.store(in_progress, Ordering::SeqCst);
        Ok(())
    }
}

impl SettingsHandler for FactoryReset {
    fn subtree(&self) -> &str {
        RESET_SUBTREE
    }

    fn set(&self, name: &str, value: &[u8]) -> StorageResult<()> {
        let key = keys::join(RESET_SUBTREE, name);
        if name != RESET_IN_PROGRESS_NAME {
            return Err(StorageError::invalid_record(key, "unknown record"));
        }
        let in_progress = match value {
            [0] => false,
            [1] => true,
            _ => {
                return Err(StorageError::invalid_record(
                    key,
                    format!("expected a single 0/1 byte, got 0x{}", hex::encode(value)),
                ))
            }
        };
        self.in_progress.store(in_progress, Ordering::SeqCst);
        Ok(())
    }

    fn commit(&self) -> StorageResult<()> {
        if self.reset_in_progress() {
            warn!("found unfinished factory reset");
        }
        Ok(())
    }
}

/// Full key of the reset progress flag.
pub(crate) fn flag_key() -> String {
    keys::join(RESET_SUBTREE, RESET_IN_PROGRESS_NAME)
}
