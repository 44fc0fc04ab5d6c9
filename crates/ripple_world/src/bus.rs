//! Mutation subscription bus.
//!
//! Subscribers see every add, set and remove synchronously, as it happens,
//! before any flush is scheduled. This is the hook for devtools, undo
//! stacks and mirroring into other stores; reactive logic belongs in
//! systems.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::fmt;
use std::rc::{Rc, Weak};

use ripple_component::{
    Component, ComponentData, ComponentId, ComponentRef, ComponentRegistry, ComponentStore,
    Entity, MutationKind, StoreError, tag,
};

/// One store write, as delivered to subscribers.
#[derive(Debug, Clone)]
pub struct MutationEvent {
    pub entity: Entity,
    pub component: ComponentId,
    /// The tag name of `component`.
    pub tag: Rc<str>,
    pub kind: MutationKind,
    /// Value before the write. `None` for [`MutationKind::Added`].
    pub previous: Option<ComponentData>,
    /// Value after the write. `None` for [`MutationKind::Removed`].
    pub next: Option<ComponentData>,
}

/// Which mutations a subscriber wants. Every criterion is optional; set
/// criteria are combined with AND.
#[derive(Debug, Clone, Default)]
pub struct MutationFilter {
    entity: Option<Entity>,
    descendants: bool,
    components: Vec<ComponentRef>,
}

impl MutationFilter {
    /// Matches everything.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Only mutations on `entity`.
    #[must_use]
    pub fn entity(mut self, entity: Entity) -> Self {
        self.entity = Some(entity);
        self
    }

    /// Widen [`entity`](Self::entity) to its whole subtree.
    #[must_use]
    pub fn with_descendants(mut self) -> Self {
        self.descendants = true;
        self
    }

    /// Only mutations of `T`. May be called repeatedly; any listed tag
    /// matches.
    #[must_use]
    pub fn component<T: Component>(self) -> Self {
        self.component_ref(tag::<T>())
    }

    #[must_use]
    pub fn component_ref(mut self, component: impl Into<ComponentRef>) -> Self {
        self.components.push(component.into());
        self
    }

    #[must_use]
    pub fn components<I, R>(mut self, components: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<ComponentRef>,
    {
        self.components
            .extend(components.into_iter().map(Into::into));
        self
    }

    pub(crate) fn resolve(&self, registry: &mut ComponentRegistry) -> Result<ResolvedFilter, StoreError> {
        let components = if self.components.is_empty() {
            None
        } else {
            let mut ids = HashSet::with_capacity(self.components.len());
            for component in &self.components {
                ids.insert(registry.resolve(component)?);
            }
            Some(ids)
        };
        Ok(ResolvedFilter {
            entity: self.entity,
            descendants: self.descendants,
            components,
        })
    }
}

#[derive(Debug)]
pub(crate) struct ResolvedFilter {
    entity: Option<Entity>,
    descendants: bool,
    components: Option<HashSet<ComponentId>>,
}

impl ResolvedFilter {
    fn accepts(&self, store: &ComponentStore, entity: Entity, component: ComponentId) -> bool {
        if let Some(ids) = &self.components
            && !ids.contains(&component)
        {
            return false;
        }
        match self.entity {
            None => true,
            Some(root) if self.descendants => store.is_within(entity, root),
            Some(root) => root == entity,
        }
    }
}

pub(crate) type Listener = Rc<dyn Fn(&MutationEvent)>;

struct Subscriber {
    id: u64,
    filter: ResolvedFilter,
    listener: Listener,
}

type Subscribers = RefCell<Vec<Subscriber>>;

/// Handle returned by [`World::on_mutation`](crate::World::on_mutation).
///
/// Dropping the handle keeps the subscription alive; call
/// [`unsubscribe`](Self::unsubscribe) to end it.
pub struct Subscription {
    id: u64,
    subscribers: Weak<Subscribers>,
}

impl Subscription {
    /// Stop receiving events. A no-op once the world is gone.
    pub fn unsubscribe(self) {
        if let Some(subscribers) = self.subscribers.upgrade() {
            subscribers.borrow_mut().retain(|s| s.id != self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[derive(Default)]
pub(crate) struct MutationBus {
    subscribers: Rc<Subscribers>,
    next_id: Cell<u64>,
}

impl MutationBus {
    pub(crate) fn subscribe(&self, listener: Listener, filter: ResolvedFilter) -> Subscription {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.subscribers.borrow_mut().push(Subscriber {
            id,
            filter,
            listener,
        });
        Subscription {
            id,
            subscribers: Rc::downgrade(&self.subscribers),
        }
    }

    /// Snapshot of the listeners interested in a write of `component` on
    /// `entity`, in subscription order. Must be called while the write is
    /// still visible in `store` and before any listener runs.
    pub(crate) fn interested(
        &self,
        store: &ComponentStore,
        entity: Entity,
        component: ComponentId,
    ) -> Vec<Listener> {
        self.subscribers
            .borrow()
            .iter()
            .filter(|s| s.filter.accepts(store, entity, component))
            .map(|s| Rc::clone(&s.listener))
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.subscribers.borrow().len()
    }
}

impl fmt::Debug for MutationBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationBus")
            .field("subscribers", &self.len())
            .finish()
    }
}
