//! Ordered registry of the modules taking part in a factory reset.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::{StorageError, StorageResult};

/// A storage module that can be wiped by a factory reset.
///
/// `perform` must be idempotent: it is re-run after an interrupted reset,
/// possibly on data that is already gone, and deleting absent records must
/// succeed.
pub trait ResetModule: Send + Sync {
    /// Stable name. Modules run in ascending byte order of their names.
    fn name(&self) -> &str;

    /// Readies the module for deletion. Runs on every module before the first
    /// `perform`, and only when a reset starts fresh.
    fn prepare(&self) {}

    /// Deletes every record the module owns.
    ///
    /// # Errors
    ///
    /// Returns the store error that stopped the deletion.
    fn perform(&self) -> StorageResult<()>;
}

/// Collects modules before the registry is frozen.
#[derive(Default)]
pub struct RegistryBuilder {
    modules: Vec<Arc<dyn ResetModule>>,
}

impl RegistryBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a module.
    #[must_use]
    pub fn register(mut self, module: Arc<dyn ResetModule>) -> Self {
        self.modules.push(module);
        self
    }

    /// Freezes the registry, ordering modules by name.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::DuplicateModule`] if two modules share a name.
    pub fn build(self) -> StorageResult<ModuleRegistry> {
        let mut by_name: BTreeMap<String, Arc<dyn ResetModule>> = BTreeMap::new();
        for module in self.modules {
            let name = module.name().to_string();
            if by_name.contains_key(&name) {
                return Err(StorageError::DuplicateModule(name));
            }
            by_name.insert(name, module);
        }
        Ok(ModuleRegistry {
            modules: by_name.into_values().collect(),
        })
    }
}

/// Immutable, name-ordered list of reset modules.
#[derive(Clone)]
pub struct ModuleRegistry {
    modules: Vec<Arc<dyn ResetModule>>,
}

impl ModuleRegistry {
    /// Iterates modules in reset order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ResetModule>> {
        self.modules.iter()
    }

    /// Returns module names in reset order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.modules.iter().map(|module| module.name()).collect()
    }

    /// Returns the number of modules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Returns `true` if no module is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
