//! Entity records, the reverse tag index, and the parent/child forest.
//!
//! ## Layout
//!
//! ```text
//! ComponentStore
//!   registry : tag name -> ComponentId
//!   records  : Entity -> { components: ComponentId -> ComponentData,
//!                          parent: Option<Entity>,
//!                          children: [Entity] }
//!   index    : ComponentId -> {Entity}
//! ```
//!
//! The store only knows about data. It does not record mutations or notify
//! anyone; the world wraps every write and does that itself.
//!
//! A parent is fixed when an entity is created and never reassigned, so the
//! parent links always form a forest.

use std::collections::{HashMap, HashSet};

use tracing::trace;

use crate::component::{ComponentData, ComponentId, ComponentRegistry};
use crate::entity::{Entity, EntityAllocator};
use crate::error::StoreError;
use crate::mutation::MutationKind;

/// How [`ComponentStore::insert`] treats an already-present tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertMode {
    /// Fail with [`StoreError::DuplicateComponent`].
    Add,
    /// Replace the existing value.
    Set,
}

/// Outcome of a successful insert.
#[derive(Debug, Clone)]
pub struct Inserted {
    /// [`MutationKind::Added`] or [`MutationKind::Replaced`].
    pub kind: MutationKind,
    /// The value that was replaced, if any.
    pub previous: Option<ComponentData>,
}

#[derive(Debug, Default)]
struct EntityRecord {
    components: HashMap<ComponentId, ComponentData>,
    parent: Option<Entity>,
    children: Vec<Entity>,
}

/// Per-world entity and component storage.
#[derive(Debug, Default)]
pub struct ComponentStore {
    registry: ComponentRegistry,
    allocator: EntityAllocator,
    records: HashMap<Entity, EntityRecord>,
    index: HashMap<ComponentId, HashSet<Entity>>,
}

impl ComponentStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ComponentRegistry {
        &mut self.registry
    }

    // -- Entities --

    /// Allocate a new entity, optionally as the last child of `parent`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidEntity`] if `parent` does not exist.
    pub fn create(&mut self, parent: Option<Entity>) -> Result<Entity, StoreError> {
        if let Some(parent) = parent
            && !self.records.contains_key(&parent)
        {
            return Err(StoreError::InvalidEntity(parent));
        }

        let entity = self.allocator.allocate();
        self.records.insert(
            entity,
            EntityRecord {
                parent,
                ..EntityRecord::default()
            },
        );
        if let Some(parent) = parent
            && let Some(record) = self.records.get_mut(&parent)
        {
            record.children.push(entity);
        }

        trace!(%entity, parent = ?parent, "entity created");
        Ok(entity)
    }

    #[must_use]
    pub fn contains(&self, entity: Entity) -> bool {
        self.records.contains_key(&entity)
    }

    /// All live entities, in creation order.
    #[must_use]
    pub fn entities(&self) -> Vec<Entity> {
        let mut entities: Vec<Entity> = self.records.keys().copied().collect();
        entities.sort_unstable();
        entities
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn parent(&self, entity: Entity) -> Option<Entity> {
        self.records.get(&entity).and_then(|record| record.parent)
    }

    /// Children in creation order. Empty for unknown entities.
    #[must_use]
    pub fn children(&self, entity: Entity) -> &[Entity] {
        self.records
            .get(&entity)
            .map(|record| record.children.as_slice())
            .unwrap_or(&[])
    }

    /// The parent chain, nearest ancestor first.
    #[must_use]
    pub fn ancestors(&self, entity: Entity) -> Vec<Entity> {
        let mut chain = Vec::new();
        let mut cursor = self.parent(entity);
        while let Some(ancestor) = cursor {
            chain.push(ancestor);
            cursor = self.parent(ancestor);
        }
        chain
    }

    /// Returns `true` if `entity` is `root` or lies somewhere below it.
    #[must_use]
    pub fn is_within(&self, entity: Entity, root: Entity) -> bool {
        if entity == root {
            return true;
        }
        let mut cursor = self.parent(entity);
        while let Some(ancestor) = cursor {
            if ancestor == root {
                return true;
            }
            cursor = self.parent(ancestor);
        }
        false
    }

    /// The subtree rooted at `entity` in post-order: every child's subtree
    /// (depth-first, in child order) before the node itself.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidEntity`] if `entity` does not exist.
    pub fn removal_order(&self, entity: Entity) -> Result<Vec<Entity>, StoreError> {
        if !self.contains(entity) {
            return Err(StoreError::InvalidEntity(entity));
        }

        let mut order = Vec::new();
        let mut stack = vec![(entity, false)];
        while let Some((current, expanded)) = stack.pop() {
            if expanded {
                order.push(current);
                continue;
            }
            stack.push((current, true));
            for &child in self.children(current).iter().rev() {
                stack.push((child, false));
            }
        }
        Ok(order)
    }

    /// Drop an entity record and unlink it from its parent.
    ///
    /// Any components or children still attached are discarded silently;
    /// callers that need removal mutations empty the subtree first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidEntity`] if `entity` does not exist.
    pub fn destroy(&mut self, entity: Entity) -> Result<(), StoreError> {
        let Some(record) = self.records.remove(&entity) else {
            return Err(StoreError::InvalidEntity(entity));
        };
        if let Some(parent) = record.parent
            && let Some(parent_record) = self.records.get_mut(&parent)
        {
            parent_record.children.retain(|&child| child != entity);
        }

        // Explicit stack: subtrees can be arbitrarily deep.
        let mut pending = vec![(entity, record)];
        let mut destroyed = 0usize;
        while let Some((current, record)) = pending.pop() {
            for id in record.components.keys() {
                if let Some(set) = self.index.get_mut(id) {
                    set.remove(&current);
                }
            }
            for child in record.children {
                if let Some(child_record) = self.records.remove(&child) {
                    pending.push((child, child_record));
                }
            }
            destroyed += 1;
        }

        trace!(%entity, destroyed, "entity destroyed");
        Ok(())
    }

    // -- Components --

    /// Attach `data` under `id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidEntity`] for an unknown entity,
    /// [`StoreError::UnknownComponent`] for a foreign id, and
    /// [`StoreError::DuplicateComponent`] when `mode` is [`InsertMode::Add`]
    /// and the tag is already present.
    pub fn insert(
        &mut self,
        entity: Entity,
        id: ComponentId,
        data: ComponentData,
        mode: InsertMode,
    ) -> Result<Inserted, StoreError> {
        if self.registry.info(id).is_none() {
            return Err(StoreError::UnknownComponent(id));
        }
        let record = self
            .records
            .get_mut(&entity)
            .ok_or(StoreError::InvalidEntity(entity))?;

        if mode == InsertMode::Add && record.components.contains_key(&id) {
            return Err(StoreError::DuplicateComponent {
                entity,
                tag: self.registry.name(id).to_string(),
            });
        }

        let previous = record.components.insert(id, data);
        self.index.entry(id).or_default().insert(entity);

        let kind = if previous.is_some() {
            MutationKind::Replaced
        } else {
            MutationKind::Added
        };
        Ok(Inserted { kind, previous })
    }

    /// Detach the component under `id`. Absent tags are a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidEntity`] for an unknown entity.
    pub fn remove(
        &mut self,
        entity: Entity,
        id: ComponentId,
    ) -> Result<Option<ComponentData>, StoreError> {
        let record = self
            .records
            .get_mut(&entity)
            .ok_or(StoreError::InvalidEntity(entity))?;

        let removed = record.components.remove(&id);
        if removed.is_some()
            && let Some(set) = self.index.get_mut(&id)
        {
            set.remove(&entity);
        }
        Ok(removed)
    }

    #[must_use]
    pub fn has(&self, entity: Entity, id: ComponentId) -> bool {
        self.records
            .get(&entity)
            .is_some_and(|record| record.components.contains_key(&id))
    }

    #[must_use]
    pub fn get(&self, entity: Entity, id: ComponentId) -> Option<&ComponentData> {
        self.records
            .get(&entity)
            .and_then(|record| record.components.get(&id))
    }

    /// Snapshot of every component on `entity`, ordered by tag id.
    #[must_use]
    pub fn components(&self, entity: Entity) -> Vec<(ComponentId, ComponentData)> {
        let mut components: Vec<(ComponentId, ComponentData)> = self
            .records
            .get(&entity)
            .map(|record| {
                record
                    .components
                    .iter()
                    .map(|(id, data)| (*id, data.clone()))
                    .collect()
            })
            .unwrap_or_default();
        components.sort_unstable_by_key(|(id, _)| *id);
        components
    }

    /// Tag ids on `entity`, ascending.
    #[must_use]
    pub fn component_ids(&self, entity: Entity) -> Vec<ComponentId> {
        let mut ids: Vec<ComponentId> = self
            .records
            .get(&entity)
            .map(|record| record.components.keys().copied().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }

    // -- Queries --

    /// Entities holding every tag in `ids`, ascending.
    ///
    /// Walks the smallest per-tag index and probes the others, so the cost is
    /// bounded by the rarest tag. An empty tag list matches nothing.
    #[must_use]
    pub fn query(&self, ids: &[ComponentId]) -> Vec<Entity> {
        let mut sets = Vec::with_capacity(ids.len());
        for id in ids {
            match self.index.get(id) {
                Some(set) if !set.is_empty() => sets.push(set),
                _ => return Vec::new(),
            }
        }
        sets.sort_by_key(|set| set.len());

        let Some((smallest, rest)) = sets.split_first() else {
            return Vec::new();
        };
        let mut matches: Vec<Entity> = smallest
            .iter()
            .copied()
            .filter(|entity| rest.iter().all(|set| set.contains(entity)))
            .collect();
        matches.sort_unstable();
        matches
    }

    /// Returns `true` if `entity` exists, holds every `required` tag, and none
    /// of the `excluded` ones.
    #[must_use]
    pub fn matches(&self, entity: Entity, required: &[ComponentId], excluded: &[ComponentId]) -> bool {
        let Some(record) = self.records.get(&entity) else {
            return false;
        };
        required.iter().all(|id| record.components.contains_key(id))
            && !excluded.iter().any(|id| record.components.contains_key(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_tags(names: &[&str]) -> (ComponentStore, Vec<ComponentId>) {
        let mut store = ComponentStore::new();
        let ids = names
            .iter()
            .map(|name| store.registry_mut().define(name).unwrap())
            .collect();
        (store, ids)
    }

    #[test]
    fn test_create_links_parent() {
        let mut store = ComponentStore::new();
        let root = store.create(None).unwrap();
        let a = store.create(Some(root)).unwrap();
        let b = store.create(Some(root)).unwrap();

        assert_eq!(root, Entity(1));
        assert_eq!(store.children(root), &[a, b]);
        assert_eq!(store.parent(b), Some(root));
        assert_eq!(store.parent(root), None);
    }

    #[test]
    fn test_create_under_missing_parent_fails() {
        let mut store = ComponentStore::new();
        assert_eq!(
            store.create(Some(Entity(9))),
            Err(StoreError::InvalidEntity(Entity(9)))
        );
        assert!(store.is_empty());
    }

    #[test]
    fn test_add_rejects_duplicates() {
        let (mut store, ids) = store_with_tags(&["Label"]);
        let e = store.create(None).unwrap();

        let first = store
            .insert(e, ids[0], ComponentData::new("a"), InsertMode::Add)
            .unwrap();
        assert_eq!(first.kind, MutationKind::Added);

        let err = store
            .insert(e, ids[0], ComponentData::new("b"), InsertMode::Add)
            .unwrap_err();
        assert_eq!(
            err,
            StoreError::DuplicateComponent {
                entity: e,
                tag: "Label".to_string()
            }
        );
        assert_eq!(store.get(e, ids[0]).unwrap().downcast_ref::<&str>(), Some(&"a"));
    }

    #[test]
    fn test_set_classifies_replacement() {
        let (mut store, ids) = store_with_tags(&["Label"]);
        let e = store.create(None).unwrap();

        let first = store
            .insert(e, ids[0], ComponentData::new(1_u32), InsertMode::Set)
            .unwrap();
        let second = store
            .insert(e, ids[0], ComponentData::new(2_u32), InsertMode::Set)
            .unwrap();

        assert_eq!(first.kind, MutationKind::Added);
        assert!(first.previous.is_none());
        assert_eq!(second.kind, MutationKind::Replaced);
        assert_eq!(second.previous.unwrap().downcast_ref::<u32>(), Some(&1));
    }

    #[test]
    fn test_insert_on_missing_entity() {
        let (mut store, ids) = store_with_tags(&["Label"]);
        let err = store
            .insert(Entity(4), ids[0], ComponentData::new(()), InsertMode::Set)
            .unwrap_err();
        assert_eq!(err, StoreError::InvalidEntity(Entity(4)));
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let (mut store, ids) = store_with_tags(&["Label"]);
        let e = store.create(None).unwrap();
        assert!(store.remove(e, ids[0]).unwrap().is_none());
        assert!(store.remove(Entity(40), ids[0]).is_err());
    }

    #[test]
    fn test_query_is_conjunctive() {
        let (mut store, ids) = store_with_tags(&["A", "B", "C"]);
        let (a, b, c) = (ids[0], ids[1], ids[2]);
        let e1 = store.create(None).unwrap();
        let e2 = store.create(None).unwrap();
        let e3 = store.create(None).unwrap();

        for (entity, tags) in [(e1, vec![a, b]), (e2, vec![a]), (e3, vec![a, b, c])] {
            for id in tags {
                store
                    .insert(entity, id, ComponentData::new(()), InsertMode::Add)
                    .unwrap();
            }
        }

        assert_eq!(store.query(&[a]), vec![e1, e2, e3]);
        assert_eq!(store.query(&[b, a]), vec![e1, e3]);
        assert_eq!(store.query(&[a, b, c]), vec![e3]);
        assert!(store.query(&[]).is_empty());

        store.remove(e3, c).unwrap();
        assert!(store.query(&[c]).is_empty());
    }

    #[test]
    fn test_matches_required_and_excluded() {
        let (mut store, ids) = store_with_tags(&["A", "B", "C"]);
        let e = store.create(None).unwrap();
        store
            .insert(e, ids[0], ComponentData::new(()), InsertMode::Add)
            .unwrap();
        store
            .insert(e, ids[1], ComponentData::new(()), InsertMode::Add)
            .unwrap();

        assert!(store.matches(e, &[ids[0], ids[1]], &[ids[2]]));
        store
            .insert(e, ids[2], ComponentData::new(()), InsertMode::Add)
            .unwrap();
        assert!(!store.matches(e, &[ids[0], ids[1]], &[ids[2]]));
        assert!(!store.matches(Entity(99), &[], &[]));
    }

    #[test]
    fn test_removal_order_is_post_order() {
        let mut store = ComponentStore::new();
        let root = store.create(None).unwrap();
        let a = store.create(Some(root)).unwrap();
        let a1 = store.create(Some(a)).unwrap();
        let b = store.create(Some(root)).unwrap();

        assert_eq!(store.removal_order(root).unwrap(), vec![a1, a, b, root]);
        assert_eq!(store.removal_order(b).unwrap(), vec![b]);
    }

    #[test]
    fn test_destroy_unlinks_from_parent() {
        let (mut store, ids) = store_with_tags(&["A"]);
        let root = store.create(None).unwrap();
        let child = store.create(Some(root)).unwrap();
        store
            .insert(child, ids[0], ComponentData::new(()), InsertMode::Add)
            .unwrap();

        store.destroy(child).unwrap();
        assert!(!store.contains(child));
        assert!(store.children(root).is_empty());
        assert!(store.query(&[ids[0]]).is_empty());
        assert!(store.destroy(child).is_err());
    }

    #[test]
    fn test_destroy_deep_chain() {
        let (mut store, ids) = store_with_tags(&["A"]);
        let root = store.create(None).unwrap();
        let mut tip = root;
        for _ in 0..50_000 {
            tip = store.create(Some(tip)).unwrap();
        }
        store
            .insert(tip, ids[0], ComponentData::new(()), InsertMode::Add)
            .unwrap();
        let sibling = store.create(None).unwrap();

        assert_eq!(store.removal_order(root).unwrap().len(), 50_001);
        store.destroy(root).unwrap();
        assert!(!store.contains(root));
        assert!(!store.contains(tip));
        assert!(store.query(&[ids[0]]).is_empty());
        assert_eq!(store.entities(), vec![sibling]);
    }

    #[test]
    fn test_ancestors_and_containment() {
        let mut store = ComponentStore::new();
        let root = store.create(None).unwrap();
        let mid = store.create(Some(root)).unwrap();
        let leaf = store.create(Some(mid)).unwrap();
        let other = store.create(None).unwrap();

        assert_eq!(store.ancestors(leaf), vec![mid, root]);
        assert!(store.is_within(leaf, root));
        assert!(store.is_within(root, root));
        assert!(!store.is_within(other, root));
    }
}
