//! Persistent query descriptors.
//!
//! A [`QueryDescriptor`] names the tags an entity must hold and the tags it
//! must not hold. Reactive query systems keep one of these for their whole
//! lifetime and re-evaluate it against entities touched by each wave.

use serde::{Deserialize, Serialize};

use crate::component::ComponentId;
use crate::entity::Entity;
use crate::store::ComponentStore;

/// Required and excluded tag sets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryDescriptor {
    /// Every one of these must be present.
    pub required: Vec<ComponentId>,
    /// None of these may be present.
    pub excluded: Vec<ComponentId>,
}

impl QueryDescriptor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Require a tag. Duplicates are ignored.
    #[must_use]
    pub fn with(mut self, id: ComponentId) -> Self {
        if !self.required.contains(&id) {
            self.required.push(id);
        }
        self
    }

    /// Exclude a tag. Duplicates are ignored.
    #[must_use]
    pub fn without(mut self, id: ComponentId) -> Self {
        if !self.excluded.contains(&id) {
            self.excluded.push(id);
        }
        self
    }

    /// Checks that the descriptor can ever match anything.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem when no tag is required or when a
    /// tag is both required and excluded.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.required.is_empty() {
            return Err("a query must require at least one component");
        }
        if self.required.iter().any(|id| self.excluded.contains(id)) {
            return Err("a component cannot be both required and excluded");
        }
        Ok(())
    }

    /// Evaluates the descriptor against the current contents of `store`.
    #[must_use]
    pub fn matches(&self, store: &ComponentStore, entity: Entity) -> bool {
        store.matches(entity, &self.required, &self.excluded)
    }
}
