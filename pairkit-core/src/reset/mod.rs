//! Factory reset across every pairing storage module.
//!
//! Modules register with a [`RegistryBuilder`]; the frozen [`ModuleRegistry`]
//! runs them in ascending name order. [`FactoryReset`] brackets the wipe with
//! a durable in-progress flag so an interrupted reset is finished at the next
//! boot.

mod orchestrator;
mod registry;

#[cfg(test)]
pub(crate) use orchestrator::flag_key;
pub use orchestrator::{FactoryReset, ResetState};
pub use registry::{ModuleRegistry, RegistryBuilder, ResetModule};
