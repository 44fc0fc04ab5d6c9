//! Entity handles and allocation.
//!
//! An [`Entity`] is an opaque `u64` handle. It carries no data itself; the
//! [`ComponentStore`](crate::store::ComponentStore) decides whether a handle is
//! live. Handles are never recycled, so a stale handle can never alias a newer
//! entity.

use serde::{Deserialize, Serialize};

/// An opaque entity handle, unique for the lifetime of its world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Entity(pub u64);

impl Entity {
    /// The null handle. Never returned by an allocator.
    pub const INVALID: Entity = Entity(0);

    /// Wrap a raw identifier.
    #[must_use]
    pub const fn from_raw(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw identifier.
    #[must_use]
    pub const fn id(self) -> u64 {
        self.0
    }

    /// Returns `true` unless this is [`Entity::INVALID`].
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Entity({})", self.0)
    }
}

/// Hands out strictly increasing entity handles, starting at 1.
#[derive(Debug)]
pub struct EntityAllocator {
    next_id: u64,
}

impl EntityAllocator {
    #[must_use]
    pub fn new() -> Self {
        Self { next_id: 1 }
    }

    /// Allocates the next handle.
    pub fn allocate(&mut self) -> Entity {
        let entity = Entity(self.next_id);
        self.next_id += 1;
        entity
    }

    /// Number of handles handed out so far, including destroyed ones.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.next_id - 1
    }
}

impl Default for EntityAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_allocation_is_one() {
        let mut alloc = EntityAllocator::new();
        assert_eq!(alloc.allocate(), Entity(1));
        assert_eq!(alloc.allocate(), Entity(2));
        assert_eq!(alloc.count(), 2);
    }

    #[test]
    fn test_invalid_sentinel() {
        assert!(!Entity::INVALID.is_valid());
        assert!(Entity::from_raw(7).is_valid());
    }

    #[test]
    fn test_display() {
        assert_eq!(Entity(12).to_string(), "Entity(12)");
    }

    #[test]
    fn test_serializes_as_plain_number() {
        let json = serde_json::to_string(&Entity(5)).unwrap();
        assert_eq!(json, "5");
    }
}
