//! Type-keyed side storage that is not component data.
//!
//! - [`Externals`]: host collaborators supplied once at construction (a
//!   renderer handle, an asset cache). Opaque to the world.
//! - [`EntityLocals`]: per-entity runtime state owned by those
//!   collaborators, such as a native widget handle. Unlike components it is
//!   never recorded, never observed, and never triggers systems. It is
//!   dropped with its entity.

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use ripple_component::Entity;

/// Opaque bag of host values, one per Rust type.
#[derive(Clone, Default)]
pub struct Externals {
    items: HashMap<TypeId, (&'static str, Rc<dyn Any>)>,
}

impl Externals {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`insert`](Self::insert).
    #[must_use]
    pub fn with<T: Any>(mut self, value: T) -> Self {
        self.insert(value);
        self
    }

    /// Store `value`, replacing any earlier value of the same type.
    pub fn insert<T: Any>(&mut self, value: T) {
        self.items
            .insert(TypeId::of::<T>(), (type_name::<T>(), Rc::new(value)));
    }

    #[must_use]
    pub fn get<T: Any>(&self) -> Option<Rc<T>> {
        self.items
            .get(&TypeId::of::<T>())
            .and_then(|(_, value)| Rc::clone(value).downcast::<T>().ok())
    }

    #[must_use]
    pub fn contains<T: Any>(&self) -> bool {
        self.items.contains_key(&TypeId::of::<T>())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl fmt::Debug for Externals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.items.values().map(|(name, _)| *name).collect();
        names.sort_unstable();
        f.debug_struct("Externals").field("types", &names).finish()
    }
}

/// Per-entity, per-type runtime values.
#[derive(Default)]
pub(crate) struct EntityLocals {
    values: HashMap<Entity, HashMap<TypeId, Rc<dyn Any>>>,
}

impl EntityLocals {
    /// Store `value` for `entity`, returning the value it replaced.
    pub(crate) fn set<T: Any>(&mut self, entity: Entity, value: T) -> Option<Rc<T>> {
        self.values
            .entry(entity)
            .or_default()
            .insert(TypeId::of::<T>(), Rc::new(value))
            .and_then(|previous| previous.downcast::<T>().ok())
    }

    pub(crate) fn get<T: Any>(&self, entity: Entity) -> Option<Rc<T>> {
        self.values
            .get(&entity)
            .and_then(|slots| slots.get(&TypeId::of::<T>()))
            .and_then(|value| Rc::clone(value).downcast::<T>().ok())
    }

    pub(crate) fn take<T: Any>(&mut self, entity: Entity) -> Option<Rc<T>> {
        let slots = self.values.get_mut(&entity)?;
        let value = slots.remove(&TypeId::of::<T>());
        if slots.is_empty() {
            self.values.remove(&entity);
        }
        value.and_then(|value| value.downcast::<T>().ok())
    }

    pub(crate) fn clear(&mut self, entity: Entity) {
        self.values.remove(&entity);
    }

    pub(crate) fn entity_count(&self) -> usize {
        self.values.len()
    }
}

impl fmt::Debug for EntityLocals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityLocals")
            .field("entities", &self.entity_count())
            .finish()
    }
}
