//! The [`World`] handle.
//!
//! A world owns one component store, one mutation log, its systems, its
//! subscribers and its scheduler. [`World`] is a cheap, cloneable handle
//! (`Rc` inside) so system callbacks and subscribers can capture it.
//!
//! ## Write path
//!
//! ```text
//! add / set / remove
//!   1. store write          (structural errors returned here)
//!   2. Mutation -> log
//!   3. subscribers notified (synchronously, with previous + next data)
//!   4. outside a batch: scheduler.schedule(flush)
//! ```
//!
//! No `RefCell` borrow is held while user code (systems, subscribers,
//! batch closures) runs, so callbacks may freely read and write the world.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use futures::FutureExt;
use ripple_component::{
    Component, ComponentData, ComponentId, ComponentRef, ComponentStore, Entity, InsertMode,
    Mutation, MutationKind, MutationLog, StoreError, tag,
};
use tracing::{debug, info, trace, warn};

use crate::bus::{Listener, MutationBus, MutationEvent, MutationFilter, Subscription};
use crate::config::WorldConfig;
use crate::error::WorldError;
use crate::externals::{EntityLocals, Externals};
use crate::inspect::{EntityInspection, SystemInfo, WorldSnapshot};
use crate::profiler::{FlushProfile, Profiler, SystemStats};
use crate::registry::SystemRegistry;
use crate::scheduler::{FlushFuture, Scheduler, settled};
use crate::system::System;

/// Data guarded by a single `RefCell`.
#[derive(Debug, Default)]
pub(crate) struct WorldState {
    pub(crate) store: ComponentStore,
    pub(crate) log: MutationLog,
    pub(crate) locals: EntityLocals,
}

pub(crate) struct WorldInner {
    pub(crate) state: RefCell<WorldState>,
    pub(crate) systems: RefCell<SystemRegistry>,
    pub(crate) bus: MutationBus,
    pub(crate) profiler: RefCell<Profiler>,
    pub(crate) flushing: Cell<bool>,
    pub(crate) config: WorldConfig,
    scheduler: Box<dyn Scheduler>,
    batch_depth: Cell<usize>,
    externals: Externals,
}

/// Components to attach to a new entity in one batch.
#[derive(Debug, Default)]
pub struct Bundle {
    components: Vec<(ComponentRef, ComponentData)>,
}

impl Bundle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with<T: Component>(mut self, value: T) -> Self {
        self.components.push((tag::<T>(), ComponentData::new(value)));
        self
    }

    /// Untyped entry, e.g. for a tag defined by name.
    #[must_use]
    pub fn with_data(mut self, component: impl Into<ComponentRef>, data: ComponentData) -> Self {
        self.components.push((component.into(), data));
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.components.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

/// Builds a [`World`] from a config, an optional custom scheduler and
/// host externals.
#[derive(Default)]
pub struct WorldBuilder {
    config: WorldConfig,
    scheduler: Option<Box<dyn Scheduler>>,
    externals: Externals,
}

impl WorldBuilder {
    #[must_use]
    pub fn config(mut self, config: WorldConfig) -> Self {
        self.config = config;
        self
    }

    /// Use `scheduler` instead of the one named by the config.
    #[must_use]
    pub fn scheduler(mut self, scheduler: impl Scheduler + 'static) -> Self {
        self.scheduler = Some(Box::new(scheduler));
        self
    }

    #[must_use]
    pub fn externals(mut self, externals: Externals) -> Self {
        self.externals = externals;
        self
    }

    #[must_use]
    pub fn build(mut self) -> World {
        if self.config.max_flush_waves == 0 {
            warn!("max_flush_waves of 0 would fail every flush; using 1");
            self.config.max_flush_waves = 1;
        }
        let scheduler = self
            .scheduler
            .unwrap_or_else(|| self.config.scheduler.build());
        let mut profiler = Profiler::default();
        profiler.set_enabled(self.config.profiling);

        info!(
            scheduler = scheduler.name(),
            max_flush_waves = self.config.max_flush_waves,
            profiling = self.config.profiling,
            externals = self.externals.len(),
            "world created"
        );

        World {
            inner: Rc::new(WorldInner {
                state: RefCell::new(WorldState::default()),
                systems: RefCell::new(SystemRegistry::new()),
                bus: MutationBus::default(),
                profiler: RefCell::new(profiler),
                flushing: Cell::new(false),
                config: self.config,
                scheduler,
                batch_depth: Cell::new(0),
                externals: self.externals,
            }),
        }
    }
}

impl fmt::Debug for WorldBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorldBuilder")
            .field("config", &self.config)
            .field("custom_scheduler", &self.scheduler.is_some())
            .field("externals", &self.externals)
            .finish()
    }
}

struct BatchScope<'a>(&'a Cell<usize>);

impl<'a> BatchScope<'a> {
    fn enter(depth: &'a Cell<usize>) -> Self {
        depth.set(depth.get() + 1);
        Self(depth)
    }
}

impl Drop for BatchScope<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get().saturating_sub(1));
    }
}

/// A reactive entity/component world.
#[derive(Clone)]
pub struct World {
    pub(crate) inner: Rc<WorldInner>,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    /// A world with the default config: immediate scheduler, 1000-wave cap.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    #[must_use]
    pub fn with_config(config: WorldConfig) -> Self {
        Self::builder().config(config).build()
    }

    #[must_use]
    pub fn builder() -> WorldBuilder {
        WorldBuilder::default()
    }

    #[must_use]
    pub fn config(&self) -> &WorldConfig {
        &self.inner.config
    }

    /// Host values supplied at construction.
    #[must_use]
    pub fn externals(&self) -> &Externals {
        &self.inner.externals
    }

    // -- Entities --

    /// Create an empty entity, optionally as the last child of `parent`.
    ///
    /// # Errors
    ///
    /// [`StoreError::InvalidEntity`] if `parent` does not exist.
    pub fn create_entity(&self, parent: Option<Entity>) -> Result<Entity, WorldError> {
        Ok(self.inner.state.borrow_mut().store.create(parent)?)
    }

    /// Create an entity and attach `bundle` in one batch, so systems see
    /// all initial components in the same wave.
    ///
    /// # Errors
    ///
    /// Structural errors from creation or any add, or the error of the flush
    /// that closes the batch.
    pub fn create_entity_with(
        &self,
        parent: Option<Entity>,
        bundle: Bundle,
    ) -> Result<Entity, WorldError> {
        self.batch(|| -> Result<Entity, WorldError> {
            let entity = self.create_entity(parent)?;
            for (component, data) in bundle.components {
                let id = self.resolve(&component)?;
                self.write(entity, id, data, InsertMode::Add)?;
            }
            Ok(entity)
        })?
    }

    #[must_use]
    pub fn exists(&self, entity: Entity) -> bool {
        self.inner.state.borrow().store.contains(entity)
    }

    #[must_use]
    pub fn parent(&self, entity: Entity) -> Option<Entity> {
        self.inner.state.borrow().store.parent(entity)
    }

    /// Children in creation order.
    #[must_use]
    pub fn children(&self, entity: Entity) -> Vec<Entity> {
        self.inner.state.borrow().store.children(entity).to_vec()
    }

    /// Every live entity, ascending.
    #[must_use]
    pub fn entities(&self) -> Vec<Entity> {
        self.inner.state.borrow().store.entities()
    }

    /// Remove `entity` and its whole subtree.
    ///
    /// Every component is removed first, as ordinary recorded mutations, in
    /// post-order (children before parents, tags ascending), so systems and
    /// subscribers see a child's removals before its parent's. The removals
    /// form one batch.
    ///
    /// # Errors
    ///
    /// [`StoreError::InvalidEntity`] if `entity` does not exist, or the error
    /// of the flush that closes the batch.
    pub fn remove_entity(&self, entity: Entity) -> Result<(), WorldError> {
        self.batch(|| -> Result<(), WorldError> {
            let order = self.inner.state.borrow().store.removal_order(entity)?;
            for &node in &order {
                let ids = self.inner.state.borrow().store.component_ids(node);
                for id in ids {
                    if !self.exists(node) {
                        break;
                    }
                    self.erase(node, id)?;
                }
            }

            let mut state = self.inner.state.borrow_mut();
            for &node in &order {
                state.locals.clear(node);
            }
            if state.store.contains(entity) {
                state.store.destroy(entity)?;
            }
            debug!(%entity, removed = order.len(), "entity subtree removed");
            Ok(())
        })?
    }

    // -- Tags --

    /// Id of `T`'s tag, registering and binding it on first use.
    ///
    /// # Errors
    ///
    /// [`StoreError::InvalidTag`] or [`StoreError::TypeMismatch`].
    pub fn component_id<T: Component>(&self) -> Result<ComponentId, WorldError> {
        self.resolve(&tag::<T>())
    }

    /// Define an untyped tag by name. Idempotent.
    ///
    /// # Errors
    ///
    /// [`StoreError::InvalidTag`] for an empty or whitespace name.
    pub fn define_component(&self, name: &str) -> Result<ComponentId, WorldError> {
        Ok(self
            .inner
            .state
            .borrow_mut()
            .store
            .registry_mut()
            .define(name)?)
    }

    #[must_use]
    pub fn component_name(&self, id: ComponentId) -> Option<Rc<str>> {
        self.inner
            .state
            .borrow()
            .store
            .registry()
            .info(id)
            .map(|info| Rc::clone(&info.name))
    }

    fn resolve(&self, component: &ComponentRef) -> Result<ComponentId, WorldError> {
        Ok(self
            .inner
            .state
            .borrow_mut()
            .store
            .registry_mut()
            .resolve(component)?)
    }

    fn lookup(&self, component: &ComponentRef) -> Option<ComponentId> {
        self.inner.state.borrow().store.registry().lookup(component)
    }

    // -- Typed components --

    /// Attach a new component.
    ///
    /// # Errors
    ///
    /// [`StoreError::InvalidEntity`], [`StoreError::DuplicateComponent`] if
    /// `T` is already present, [`StoreError::TypeMismatch`], or, under the
    /// immediate scheduler, the error of the flush this write triggered.
    pub fn add<T: Component>(&self, entity: Entity, value: T) -> Result<(), WorldError> {
        let id = self.component_id::<T>()?;
        self.write(entity, id, ComponentData::new(value), InsertMode::Add)
            .map(|_| ())
    }

    /// Attach or replace a component. Returns whether it was added or
    /// replaced.
    ///
    /// # Errors
    ///
    /// As [`add`](Self::add), minus `DuplicateComponent`.
    pub fn set<T: Component>(&self, entity: Entity, value: T) -> Result<MutationKind, WorldError> {
        let id = self.component_id::<T>()?;
        self.write(entity, id, ComponentData::new(value), InsertMode::Set)
    }

    /// Detach `T`. Returns `false` (and records nothing) if it was absent.
    ///
    /// # Errors
    ///
    /// [`StoreError::InvalidEntity`], or a flush error under the immediate
    /// scheduler.
    pub fn remove<T: Component>(&self, entity: Entity) -> Result<bool, WorldError> {
        match self.lookup(&tag::<T>()) {
            Some(id) => self.erase(entity, id),
            None if self.exists(entity) => Ok(false),
            None => Err(StoreError::InvalidEntity(entity).into()),
        }
    }

    #[must_use]
    pub fn has<T: Component>(&self, entity: Entity) -> bool {
        self.lookup(&tag::<T>())
            .is_some_and(|id| self.has_by_id(entity, id))
    }

    /// The current value of `T`, if present and stored as `T`.
    #[must_use]
    pub fn get<T: Component>(&self, entity: Entity) -> Option<Rc<T>> {
        let id = self.lookup(&tag::<T>())?;
        self.get_by_id(entity, id)?.downcast::<T>()
    }

    /// Every component on `entity`, ordered by tag id. Empty for unknown
    /// entities.
    #[must_use]
    pub fn get_all(&self, entity: Entity) -> Vec<(ComponentId, ComponentData)> {
        self.inner.state.borrow().store.components(entity)
    }

    // -- Components by id --

    /// # Errors
    ///
    /// As [`add`](Self::add), plus [`StoreError::UnknownComponent`].
    pub fn add_by_id(
        &self,
        entity: Entity,
        id: ComponentId,
        data: ComponentData,
    ) -> Result<(), WorldError> {
        self.write(entity, id, data, InsertMode::Add).map(|_| ())
    }

    /// # Errors
    ///
    /// As [`set`](Self::set), plus [`StoreError::UnknownComponent`].
    pub fn set_by_id(
        &self,
        entity: Entity,
        id: ComponentId,
        data: ComponentData,
    ) -> Result<MutationKind, WorldError> {
        self.write(entity, id, data, InsertMode::Set)
    }

    /// # Errors
    ///
    /// As [`remove`](Self::remove), plus [`StoreError::UnknownComponent`].
    pub fn remove_by_id(&self, entity: Entity, id: ComponentId) -> Result<bool, WorldError> {
        if self.inner.state.borrow().store.registry().info(id).is_none() {
            return Err(StoreError::UnknownComponent(id).into());
        }
        self.erase(entity, id)
    }

    #[must_use]
    pub fn has_by_id(&self, entity: Entity, id: ComponentId) -> bool {
        self.inner.state.borrow().store.has(entity, id)
    }

    #[must_use]
    pub fn get_by_id(&self, entity: Entity, id: ComponentId) -> Option<ComponentData> {
        self.inner.state.borrow().store.get(entity, id).cloned()
    }

    fn write(
        &self,
        entity: Entity,
        id: ComponentId,
        data: ComponentData,
        mode: InsertMode,
    ) -> Result<MutationKind, WorldError> {
        let (kind, listeners, event) = {
            let mut state = self.inner.state.borrow_mut();
            let inserted = state.store.insert(entity, id, data.clone(), mode)?;
            state.log.push(Mutation::new(entity, id, inserted.kind));
            trace!(%entity, component = id.0, kind = ?inserted.kind, "component written");

            let listeners = self.inner.bus.interested(&state.store, entity, id);
            let event = (!listeners.is_empty()).then(|| MutationEvent {
                entity,
                component: id,
                tag: state.store.registry().shared_name(id),
                kind: inserted.kind,
                previous: inserted.previous,
                next: Some(data),
            });
            (inserted.kind, listeners, event)
        };
        self.publish(&listeners, event);
        self.request_flush()?;
        Ok(kind)
    }

    fn erase(&self, entity: Entity, id: ComponentId) -> Result<bool, WorldError> {
        let (listeners, event) = {
            let mut state = self.inner.state.borrow_mut();
            let Some(previous) = state.store.remove(entity, id)? else {
                return Ok(false);
            };
            state
                .log
                .push(Mutation::new(entity, id, MutationKind::Removed));
            trace!(%entity, component = id.0, "component removed");

            let listeners = self.inner.bus.interested(&state.store, entity, id);
            let event = (!listeners.is_empty()).then(|| MutationEvent {
                entity,
                component: id,
                tag: state.store.registry().shared_name(id),
                kind: MutationKind::Removed,
                previous: Some(previous),
                next: None,
            });
            (listeners, event)
        };
        self.publish(&listeners, event);
        self.request_flush()?;
        Ok(true)
    }

    /// Notify `listeners` as one batch, so writes they make cannot start a
    /// flush before every listener has seen `event`.
    fn publish(&self, listeners: &[Listener], event: Option<MutationEvent>) {
        let Some(event) = event else {
            return;
        };
        let _scope = BatchScope::enter(&self.inner.batch_depth);
        for listener in listeners {
            listener(&event);
        }
    }

    // -- Queries & systems --

    /// Entities currently holding every listed tag, ascending. Unknown tags
    /// match nothing.
    #[must_use]
    pub fn query(&self, components: &[ComponentRef]) -> Vec<Entity> {
        let state = self.inner.state.borrow();
        let registry = state.store.registry();
        let mut ids = Vec::with_capacity(components.len());
        for component in components {
            match registry.lookup(component) {
                Some(id) => ids.push(id),
                None => return Vec::new(),
            }
        }
        state.store.query(&ids)
    }

    /// Validate and append a system. It takes part from the next wave on.
    ///
    /// # Errors
    ///
    /// [`WorldError::InvalidSystem`] for a malformed definition, or a store
    /// error while resolving its tags.
    pub fn register_system(&self, system: System) -> Result<(), WorldError> {
        let registered = system.resolve(&mut self.inner.state.borrow_mut().store)?;
        info!(
            system = %registered.name,
            position = self.inner.systems.borrow().len(),
            "system registered"
        );
        self.inner.systems.borrow_mut().register(registered);
        Ok(())
    }

    /// Descriptions of every registered system, in registration order.
    #[must_use]
    pub fn systems(&self) -> Vec<SystemInfo> {
        let state = self.inner.state.borrow();
        self.inner
            .systems
            .borrow()
            .iter()
            .map(|system| SystemInfo::describe(system, state.store.registry()))
            .collect()
    }

    /// Description of the earliest system registered under `name`.
    #[must_use]
    pub fn system(&self, name: &str) -> Option<SystemInfo> {
        let state = self.inner.state.borrow();
        self.inner
            .systems
            .borrow()
            .get(name)
            .map(|system| SystemInfo::describe(system, state.store.registry()))
    }

    // -- Flushing --

    /// Ask the scheduler for a flush now, regardless of batching.
    ///
    /// Inside a running flush this is absorbed and settles immediately; the
    /// running flush picks up pending mutations itself.
    pub fn flush(&self) -> FlushFuture {
        if self.inner.flushing.get() {
            return settled(Ok(()));
        }
        self.schedule_flush()
    }

    /// Run a flush synchronously on the calling stack, bypassing the
    /// scheduler.
    ///
    /// # Errors
    ///
    /// [`WorldError::SystemExecution`] or [`WorldError::UnboundedFlush`].
    pub fn flush_now(&self) -> Result<(), WorldError> {
        self.run_flush()
    }

    /// Settles once no scheduled flush is pending.
    pub fn when_flushed(&self) -> FlushFuture {
        self.inner.scheduler.when_idle()
    }

    /// Run `f` with flushing suspended. Mutations made inside are flushed
    /// together once the outermost batch closes. Nesting is allowed and the
    /// depth is restored even if `f` panics.
    ///
    /// # Errors
    ///
    /// Under the immediate scheduler, the error of the closing flush. `f`'s
    /// value is dropped in that case.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> Result<R, WorldError> {
        let value = {
            let _scope = BatchScope::enter(&self.inner.batch_depth);
            f()
        };
        if self.inner.batch_depth.get() == 0 && !self.inner.state.borrow().log.is_empty() {
            self.request_flush()?;
        }
        Ok(value)
    }

    /// Number of mutations recorded but not yet flushed.
    #[must_use]
    pub fn pending_mutations(&self) -> usize {
        self.inner.state.borrow().log.len()
    }

    fn schedule_flush(&self) -> FlushFuture {
        let world = Rc::downgrade(&self.inner);
        self.inner.scheduler.schedule(Box::new(move || match world.upgrade() {
            Some(inner) => World { inner }.run_flush(),
            None => Ok(()),
        }))
    }

    /// Auto-flush after a write. Settled errors (immediate scheduler) are
    /// returned to the writer; deferred outcomes travel via the future.
    fn request_flush(&self) -> Result<(), WorldError> {
        if self.inner.batch_depth.get() > 0 || self.inner.flushing.get() {
            return Ok(());
        }
        match self.schedule_flush().now_or_never() {
            Some(Err(err)) => Err(err),
            _ => Ok(()),
        }
    }

    // -- Subscriptions --

    /// Observe writes matching `filter`. The callback runs synchronously
    /// inside the mutating call, before any flush.
    ///
    /// # Errors
    ///
    /// A store error while resolving the filter's tags.
    pub fn on_mutation<F>(&self, callback: F, filter: MutationFilter) -> Result<Subscription, WorldError>
    where
        F: Fn(&MutationEvent) + 'static,
    {
        let resolved = filter.resolve(self.inner.state.borrow_mut().store.registry_mut())?;
        let listener: Listener = Rc::new(callback);
        Ok(self.inner.bus.subscribe(listener, resolved))
    }

    // -- Introspection --

    #[must_use]
    pub fn inspect(&self, entity: Entity) -> Option<EntityInspection> {
        EntityInspection::capture(&self.inner.state.borrow().store, entity)
    }

    #[must_use]
    pub fn snapshot(&self) -> WorldSnapshot {
        let systems = self.systems();
        let state = self.inner.state.borrow();
        WorldSnapshot {
            entities: state
                .store
                .entities()
                .into_iter()
                .filter_map(|entity| EntityInspection::capture(&state.store, entity))
                .collect(),
            systems,
            components: state
                .store
                .registry()
                .iter()
                .map(|info| info.name.to_string())
                .collect(),
            pending_mutations: state.log.len(),
            subscribers: self.inner.bus.len(),
        }
    }

    // -- Profiling --

    pub fn enable_profiling(&self) {
        self.inner.profiler.borrow_mut().set_enabled(true);
    }

    pub fn disable_profiling(&self) {
        self.inner.profiler.borrow_mut().set_enabled(false);
    }

    #[must_use]
    pub fn is_profiling(&self) -> bool {
        self.inner.profiler.borrow().is_enabled()
    }

    /// The most recent profiled flush.
    #[must_use]
    pub fn last_flush_profile(&self) -> Option<FlushProfile> {
        self.inner.profiler.borrow().last_flush().cloned()
    }

    /// Lifetime aggregates keyed by system name.
    #[must_use]
    pub fn profiling_stats(&self) -> BTreeMap<String, SystemStats> {
        self.inner.profiler.borrow().stats().clone()
    }

    pub fn reset_profiling_stats(&self) {
        self.inner.profiler.borrow_mut().reset_stats();
    }

    // -- Entity locals --

    /// Attach untracked runtime state of type `T` to `entity`, returning the
    /// value it replaced. Dropped when the entity is removed.
    ///
    /// # Errors
    ///
    /// [`StoreError::InvalidEntity`] if `entity` does not exist.
    pub fn set_local<T: Any>(&self, entity: Entity, value: T) -> Result<Option<Rc<T>>, WorldError> {
        let mut state = self.inner.state.borrow_mut();
        if !state.store.contains(entity) {
            return Err(StoreError::InvalidEntity(entity).into());
        }
        Ok(state.locals.set(entity, value))
    }

    #[must_use]
    pub fn local<T: Any>(&self, entity: Entity) -> Option<Rc<T>> {
        self.inner.state.borrow().locals.get(entity)
    }

    pub fn take_local<T: Any>(&self, entity: Entity) -> Option<Rc<T>> {
        self.inner.state.borrow_mut().locals.take(entity)
    }
}


impl fmt::Debug for World {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("World");
        match self.inner.state.try_borrow() {
            Ok(state) => out
                .field("entities", &state.store.len())
                .field("pending_mutations", &state.log.len()),
            Err(_) => out.field("state", &"<borrowed>"),
        };
        out.field("systems", &self.inner.systems.try_borrow().map(|s| s.len()).ok())
            .field("scheduler", &self.inner.scheduler.name())
            .field("batch_depth", &self.inner.batch_depth.get())
            .field("flushing", &self.inner.flushing.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::system::System;

    #[derive(Debug, Clone, PartialEq)]
    struct Position(f32, f32);
    impl Component for Position {
        fn type_name() -> &'static str {
            "Position"
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Label(&'static str);
    impl Component for Label {
        fn type_name() -> &'static str {
            "Label"
        }
    }

    #[derive(Debug)]
    struct Impostor;
    impl Component for Impostor {
        fn type_name() -> &'static str {
            "Position"
        }
    }

    #[test]
    fn test_add_set_remove_roundtrip() {
        let world = World::new();
        let e = world.create_entity(None).unwrap();

        world.add(e, Position(1.0, 2.0)).unwrap();
        assert!(world.has::<Position>(e));
        assert_eq!(*world.get::<Position>(e).unwrap(), Position(1.0, 2.0));

        assert_eq!(world.set(e, Position(3.0, 4.0)).unwrap(), MutationKind::Replaced);
        assert_eq!(world.set(e, Label("a")).unwrap(), MutationKind::Added);
        assert_eq!(world.get_all(e).len(), 2);

        assert!(world.remove::<Position>(e).unwrap());
        assert!(!world.remove::<Position>(e).unwrap());
        assert!(world.get::<Position>(e).is_none());
    }

    #[test]
    fn test_structural_errors() {
        let world = World::new();
        let e = world.create_entity(None).unwrap();
        world.add(e, Label("x")).unwrap();

        let err = world.add(e, Label("y")).unwrap_err();
        assert!(matches!(
            err.as_store(),
            Some(StoreError::DuplicateComponent { tag, .. }) if tag == "Label"
        ));
        assert!(matches!(
            world.add(Entity(99), Label("z")).unwrap_err().as_store(),
            Some(StoreError::InvalidEntity(Entity(99)))
        ));
        assert!(matches!(
            world.remove::<Position>(Entity(99)).unwrap_err().as_store(),
            Some(StoreError::InvalidEntity(_))
        ));
        assert!(matches!(
            world.define_component("  ").unwrap_err().as_store(),
            Some(StoreError::InvalidTag(_))
        ));
        assert!(matches!(
            world.create_entity(Some(Entity(42))).unwrap_err().as_store(),
            Some(StoreError::InvalidEntity(Entity(42)))
        ));

        world.add(e, Position(0.0, 0.0)).unwrap();
        assert!(matches!(
            world.add(e, Impostor).unwrap_err().as_store(),
            Some(StoreError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_by_id_operations() {
        let world = World::new();
        let e = world.create_entity(None).unwrap();
        let visible = world.define_component("Visible").unwrap();
        assert_eq!(world.define_component("Visible").unwrap(), visible);
        assert_eq!(world.component_name(visible).as_deref(), Some("Visible"));

        world.add_by_id(e, visible, ComponentData::new(true)).unwrap();
        assert!(world.has_by_id(e, visible));
        assert_eq!(
            world.get_by_id(e, visible).unwrap().downcast_ref::<bool>(),
            Some(&true)
        );
        assert_eq!(
            world.set_by_id(e, visible, ComponentData::new(false)).unwrap(),
            MutationKind::Replaced
        );
        assert!(world.remove_by_id(e, visible).unwrap());
        assert!(matches!(
            world.remove_by_id(e, ComponentId(77)).unwrap_err().as_store(),
            Some(StoreError::UnknownComponent(ComponentId(77)))
        ));
    }

    #[test]
    fn test_hierarchy_and_query() {
        let world = World::new();
        let root = world.create_entity(None).unwrap();
        let a = world
            .create_entity_with(Some(root), Bundle::new().with(Label("a")).with(Position(0.0, 0.0)))
            .unwrap();
        let b = world
            .create_entity_with(Some(root), Bundle::new().with(Label("b")))
            .unwrap();

        assert_eq!(world.children(root), vec![a, b]);
        assert_eq!(world.parent(a), Some(root));
        assert_eq!(world.query(&[tag::<Label>()]), vec![a, b]);
        assert_eq!(world.query(&[tag::<Label>(), tag::<Position>()]), vec![a]);
        assert!(world.query(&["Nope".into()]).is_empty());
        assert!(world.query(&[]).is_empty());
    }

    #[test]
    fn test_remove_entity_removes_subtree_and_locals() {
        let world = World::new();
        let root = world.create_entity(None).unwrap();
        let child = world.create_entity(Some(root)).unwrap();
        world.add(child, Label("c")).unwrap();
        world.set_local(child, String::from("widget")).unwrap();

        world.remove_entity(root).unwrap();
        assert!(!world.exists(root));
        assert!(!world.exists(child));
        assert!(world.local::<String>(child).is_none());
        assert!(world.get_all(child).is_empty());
        assert!(matches!(
            world.remove_entity(root).unwrap_err().as_store(),
            Some(StoreError::InvalidEntity(_))
        ));
    }

    #[test]
    fn test_batch_defers_flush_until_outermost_scope() {
        let world = World::new();
        let runs = Rc::new(Cell::new(0));
        let counter = Rc::clone(&runs);
        world
            .register_system(
                System::triggered("count")
                    .on_added_or_replaced::<Label>()
                    .run(move |_, _| {
                        counter.set(counter.get() + 1);
                        Ok(())
                    }),
            )
            .unwrap();
        let e = world.create_entity(None).unwrap();

        world
            .batch(|| {
                world.add(e, Label("a")).unwrap();
                world
                    .batch(|| world.set(e, Label("b")).unwrap())
                    .unwrap();
                assert_eq!(runs.get(), 0);
                assert_eq!(world.pending_mutations(), 2);
            })
            .unwrap();
        assert_eq!(runs.get(), 1);
        assert_eq!(world.pending_mutations(), 0);
    }

    #[test]
    fn test_batch_depth_survives_panic() {
        let world = World::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _: Result<(), _> = world.batch(|| panic!("inside batch"));
        }));
        assert!(result.is_err());
        assert_eq!(world.inner.batch_depth.get(), 0);
    }

    #[test]
    fn test_subscribers_all_notified_before_flush() {
        let world = World::new();
        let calls = Rc::new(RefCell::new(Vec::<&'static str>::new()));

        let log = Rc::clone(&calls);
        world
            .register_system(System::triggered("labels").on_added::<Label>().run(move |_, _| {
                log.borrow_mut().push("system");
                Ok(())
            }))
            .unwrap();

        let e = world.create_entity(None).unwrap();
        let mirror = world.create_entity(None).unwrap();
        let writer = world.clone();
        let _first = world
            .on_mutation(
                move |_| {
                    writer.set(mirror, Position(0.0, 0.0)).unwrap();
                },
                MutationFilter::all().component::<Label>(),
            )
            .unwrap();
        let log = Rc::clone(&calls);
        let _second = world
            .on_mutation(
                move |_| log.borrow_mut().push("second subscriber"),
                MutationFilter::all().component::<Label>(),
            )
            .unwrap();

        world.add(e, Label("x")).unwrap();
        assert_eq!(*calls.borrow(), vec!["second subscriber", "system"]);
        assert!(world.has::<Position>(mirror));
        assert_eq!(world.pending_mutations(), 0);
    }

    #[test]
    fn test_remove_entity_deep_chain() {
        let world = World::new();
        let root = world.create_entity(None).unwrap();
        let mut tip = root;
        for _ in 0..20_000 {
            tip = world.create_entity(Some(tip)).unwrap();
        }
        world.add(tip, Label("leaf")).unwrap();

        world.remove_entity(root).unwrap();
        assert!(!world.exists(root));
        assert!(!world.exists(tip));
        assert!(world.entities().is_empty());
        assert!(world.query(&[tag::<Label>()]).is_empty());
    }

    #[test]
    fn test_zero_wave_cap_is_raised_to_one() {
        let world = World::with_config(WorldConfig {
            max_flush_waves: 0,
            ..WorldConfig::default()
        });
        assert_eq!(world.config().max_flush_waves, 1);

        let e = world.create_entity(None).unwrap();
        world.add(e, Label("ok")).unwrap();
        assert_eq!(world.pending_mutations(), 0);
    }

    #[test]
    fn test_locals_require_live_entity() {
        let world = World::new();
        let e = world.create_entity(None).unwrap();
        assert!(world.set_local(e, 5_u32).unwrap().is_none());
        assert_eq!(*world.local::<u32>(e).unwrap(), 5);
        assert_eq!(*world.take_local::<u32>(e).unwrap(), 5);
        assert!(world.set_local(Entity(50), 1_u8).is_err());
    }

    #[test]
    fn test_externals_are_reachable_from_systems() {
        #[derive(Debug)]
        struct Sink(RefCell<Vec<Entity>>);

        let world = World::builder()
            .externals(Externals::new().with(Sink(RefCell::new(Vec::new()))))
            .build();
        world
            .register_system(
                System::triggered("sink")
                    .on_added::<Label>()
                    .run(|world, entities| {
                        if let Some(sink) = world.externals().get::<Sink>() {
                            sink.0.borrow_mut().extend_from_slice(entities);
                        }
                        Ok(())
                    }),
            )
            .unwrap();
        let e = world.create_entity(None).unwrap();
        world.add(e, Label("x")).unwrap();

        let sink = world.externals().get::<Sink>().unwrap();
        assert_eq!(*sink.0.borrow(), vec![e]);
    }

    #[test]
    fn test_snapshot_serializes() {
        let world = World::new();
        let e = world.create_entity(None).unwrap();
        world.add(e, Label("hi")).unwrap();
        world
            .register_system(System::query("labels").with::<Label>().on_enter(|_, _| Ok(())))
            .unwrap();

        let snapshot = world.snapshot();
        assert_eq!(snapshot.entities.len(), 1);
        assert_eq!(snapshot.systems[0].name, "labels");
        assert_eq!(world.system("labels").as_ref(), Some(&snapshot.systems[0]));
        assert!(world.system("missing").is_none());
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["entities"][0]["components"][0]["tag"], "Label");
        assert_eq!(json["systems"][0]["kind"], "query");
    }
}
