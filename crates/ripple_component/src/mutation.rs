//! Mutation records and the drain-and-reset mutation log.

use serde::{Deserialize, Serialize};

use crate::component::ComponentId;
use crate::entity::Entity;

/// What happened to a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    Added,
    Removed,
    Replaced,
}

/// One recorded state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Mutation {
    pub entity: Entity,
    pub component: ComponentId,
    pub kind: MutationKind,
}

impl Mutation {
    #[must_use]
    pub const fn new(entity: Entity, component: ComponentId, kind: MutationKind) -> Self {
        Self {
            entity,
            component,
            kind,
        }
    }
}

/// Append-only queue of mutations, emptied one wave at a time.
#[derive(Debug, Default)]
pub struct MutationLog {
    entries: Vec<Mutation>,
}

impl MutationLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, mutation: Mutation) {
        self.entries.push(mutation);
    }

    /// Take every pending mutation, leaving the log empty.
    pub fn drain(&mut self) -> Vec<Mutation> {
        std::mem::take(&mut self.entries)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Mutation> {
        self.entries.iter()
    }
}
