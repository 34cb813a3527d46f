//! Per-type definition cache.
//!
//! Machine and monitor declarations are built once per type and shared by
//! every instance across every iteration of a test run.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::DefinitionError;
use crate::machine::{MachineDefinition, StateMachine};
use crate::monitor::{Monitor, MonitorDefinition};

type Cached = Arc<dyn Any + Send + Sync>;

/// Cache of built machine and monitor definitions, keyed by Rust type.
#[derive(Default)]
pub struct DefinitionRegistry {
    machines: Mutex<HashMap<TypeId, Cached>>,
    monitors: Mutex<HashMap<TypeId, Cached>>,
}

impl DefinitionRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Definition of machine type `M`, building it on first use.
    ///
    /// # Errors
    ///
    /// Returns the declaration error if `M::definition()` is invalid. Failed
    /// builds are not cached.
    pub fn machine<M: StateMachine>(&self) -> Result<Arc<MachineDefinition<M>>, DefinitionError> {
        let mut machines = self.machines.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(cached) = machines.get(&TypeId::of::<M>()) {
            if let Ok(definition) = Arc::clone(cached).downcast::<MachineDefinition<M>>() {
                return Ok(definition);
            }
        }
        let definition = Arc::new(M::definition().build()?);
        tracing::debug!(machine = %definition.name(), "built machine definition");
        machines.insert(TypeId::of::<M>(), definition.clone());
        Ok(definition)
    }

    /// Definition of monitor type `M`, building it on first use.
    ///
    /// # Errors
    ///
    /// Returns the declaration error if `M::definition()` is invalid.
    pub fn monitor<M: Monitor>(&self) -> Result<Arc<MonitorDefinition<M>>, DefinitionError> {
        let mut monitors = self.monitors.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(cached) = monitors.get(&TypeId::of::<M>()) {
            if let Ok(definition) = Arc::clone(cached).downcast::<MonitorDefinition<M>>() {
                return Ok(definition);
            }
        }
        let definition = Arc::new(M::definition().build()?);
        tracing::debug!(monitor = %definition.name(), "built monitor definition");
        monitors.insert(TypeId::of::<M>(), definition.clone());
        Ok(definition)
    }

    /// Number of cached machine definitions.
    #[must_use]
    pub fn machine_count(&self) -> usize {
        self.machines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::{MachineBuilder, Transition};

    struct Echo;

    impl StateMachine for Echo {
        fn definition() -> MachineBuilder<Self> {
            MachineBuilder::new("Echo").state("Ready", |s| {
                s.start().on_event("Ping", |_, _, _| Ok(Transition::None))
            })
        }
    }

    #[test]
    fn test_definition_built_once() {
        let registry = DefinitionRegistry::new();
        let a = registry.machine::<Echo>().expect("valid");
        let b = registry.machine::<Echo>().expect("valid");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.machine_count(), 1);
    }
}
