//! System registry: the ordered list of systems a world runs.
//!
//! Registration order is execution order within every wave. There is no
//! unregister; a flush iterates a snapshot so systems registered from inside
//! a callback first run in the next wave.

use std::rc::Rc;

use crate::system::RegisteredSystem;

/// Append-only, ordered collection of registered systems.
#[derive(Debug, Default)]
pub(crate) struct SystemRegistry {
    systems: Vec<Rc<RegisteredSystem>>,
}

impl SystemRegistry {
    #[must_use]
    pub(crate) fn new() -> Self {
        Self {
            systems: Vec::new(),
        }
    }

    /// Append a system. Names need not be unique; [`get`](Self::get) returns
    /// the earliest registration.
    pub(crate) fn register(&mut self, system: RegisteredSystem) {
        self.systems.push(Rc::new(system));
    }

    /// Returns a system by name.
    #[must_use]
    pub(crate) fn get(&self, name: &str) -> Option<&Rc<RegisteredSystem>> {
        self.systems.iter().find(|system| system.name == name)
    }

    /// Cheap copy of the current order, safe to iterate while callbacks
    /// register more systems.
    #[must_use]
    pub(crate) fn snapshot(&self) -> Vec<Rc<RegisteredSystem>> {
        self.systems.clone()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Rc<RegisteredSystem>> {
        self.systems.iter()
    }

    #[must_use]
    pub(crate) fn len(&self) -> usize {
        self.systems.len()
    }
}

#[cfg(test)]
mod tests {
    use ripple_component::ComponentStore;

    use super::*;
    use crate::system::System;

    fn make_system(store: &mut ComponentStore, name: &str) -> RegisteredSystem {
        System::triggered(name)
            .on(crate::system::Trigger::new(
                "Node",
                crate::system::TriggerKind::Added,
            ))
            .run(|_, _| Ok(()))
            .resolve(store)
            .unwrap()
    }

    #[test]
    fn test_register_keeps_order() {
        let mut store = ComponentStore::new();
        let mut registry = SystemRegistry::new();
        registry.register(make_system(&mut store, "mount"));
        registry.register(make_system(&mut store, "layout"));

        let names: Vec<_> = registry.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["mount", "layout"]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_get_returns_first_registration() {
        let mut store = ComponentStore::new();
        let mut registry = SystemRegistry::new();
        registry.register(make_system(&mut store, "mount"));
        registry.register(make_system(&mut store, "mount"));

        let first = registry.get("mount").unwrap();
        assert!(Rc::ptr_eq(first, &registry.snapshot()[0]));
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut store = ComponentStore::new();
        let mut registry = SystemRegistry::new();
        registry.register(make_system(&mut store, "mount"));
        let snapshot = registry.snapshot();
        registry.register(make_system(&mut store, "late"));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(registry.len(), 2);
    }
}
