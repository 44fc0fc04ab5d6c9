//! Reactive system definitions.
//!
//! A [`System`] is a name, a matcher, and one or more handlers. There is a
//! single builder for both flavours:
//!
//! - **Triggered**: declares one or more [`Trigger`]s (tag + mutation kind)
//!   and a [`run`](System::run) handler. `with`/`without` act as a filter on
//!   the entity's *current* components.
//! - **Query**: declares no triggers, a required (`with`) and excluded
//!   (`without`) tag set, and any of [`on_enter`](System::on_enter),
//!   [`on_update`](System::on_update), [`on_exit`](System::on_exit).
//!
//! Both resolve to the same [`Matcher`] shape at registration; a trigger is
//! just a match on a single mutation kind instead of persistent membership.
//!
//! ```rust,no_run
//! use ripple_world::{System, World};
//! # use ripple_component::Component;
//! # #[derive(Debug)] struct Label(String);
//! # impl Component for Label { fn type_name() -> &'static str { "Label" } }
//! # #[derive(Debug)] struct Hidden;
//! # impl Component for Hidden { fn type_name() -> &'static str { "Hidden" } }
//!
//! let world = World::new();
//! world
//!     .register_system(
//!         System::query("mount")
//!             .with::<Label>()
//!             .without::<Hidden>()
//!             .on_enter(|_world, entities| {
//!                 println!("mounted {entities:?}");
//!                 Ok(())
//!             }),
//!     )
//!     .unwrap();
//! ```

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;

use ripple_component::{
    Component, ComponentId, ComponentRef, ComponentStore, Entity, MutationKind, QueryDescriptor,
    tag,
};
use serde::{Deserialize, Serialize};

use crate::error::WorldError;
use crate::world::World;

/// A system callback. Receives the world and the deduplicated entities of
/// one wave, in order of first appearance.
pub type SystemFn = Box<dyn Fn(&World, &[Entity]) -> anyhow::Result<()>>;

/// Which handler of a system is being invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// The single handler of a triggered system.
    Run,
    /// Entities that started matching a query.
    Enter,
    /// Entities that matched before and still do.
    Update,
    /// Entities that stopped matching a query.
    Exit,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Run => "run",
            Phase::Enter => "enter",
            Phase::Update => "update",
            Phase::Exit => "exit",
        })
    }
}

/// The mutation kinds a trigger reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Added,
    Removed,
    Replaced,
    AddedOrReplaced,
}

impl TriggerKind {
    #[must_use]
    pub fn accepts(self, kind: MutationKind) -> bool {
        matches!(
            (self, kind),
            (TriggerKind::Added, MutationKind::Added)
                | (TriggerKind::Removed, MutationKind::Removed)
                | (TriggerKind::Replaced, MutationKind::Replaced)
                | (
                    TriggerKind::AddedOrReplaced,
                    MutationKind::Added | MutationKind::Replaced
                )
        )
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TriggerKind::Added => "added",
            TriggerKind::Removed => "removed",
            TriggerKind::Replaced => "replaced",
            TriggerKind::AddedOrReplaced => "added_or_replaced",
        })
    }
}

/// A (tag, kind) pair a triggered system reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    pub component: ComponentRef,
    pub kind: TriggerKind,
}

impl Trigger {
    pub fn new(component: impl Into<ComponentRef>, kind: TriggerKind) -> Self {
        Self {
            component: component.into(),
            kind,
        }
    }
}

#[derive(Default)]
struct Handlers {
    run: Option<SystemFn>,
    enter: Option<SystemFn>,
    update: Option<SystemFn>,
    exit: Option<SystemFn>,
}

impl Handlers {
    fn get(&self, phase: Phase) -> Option<&SystemFn> {
        match phase {
            Phase::Run => self.run.as_ref(),
            Phase::Enter => self.enter.as_ref(),
            Phase::Update => self.update.as_ref(),
            Phase::Exit => self.exit.as_ref(),
        }
    }

    fn has_lifecycle(&self) -> bool {
        self.enter.is_some() || self.update.is_some() || self.exit.is_some()
    }
}

/// A system definition, built fluently and handed to
/// [`World::register_system`].
pub struct System {
    name: String,
    triggers: Vec<Trigger>,
    required: Vec<ComponentRef>,
    excluded: Vec<ComponentRef>,
    handlers: Handlers,
}

impl System {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            triggers: Vec::new(),
            required: Vec::new(),
            excluded: Vec::new(),
            handlers: Handlers::default(),
        }
    }

    /// Start a triggered system. Same as [`new`](Self::new); reads better
    /// at the call site.
    pub fn triggered(name: impl Into<String>) -> Self {
        Self::new(name)
    }

    /// Start a query system.
    pub fn query(name: impl Into<String>) -> Self {
        Self::new(name)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    // -- Matching --

    /// React to a mutation of the given kind.
    #[must_use]
    pub fn on(mut self, trigger: Trigger) -> Self {
        self.triggers.push(trigger);
        self
    }

    #[must_use]
    pub fn on_added<T: Component>(self) -> Self {
        self.on(Trigger::new(tag::<T>(), TriggerKind::Added))
    }

    #[must_use]
    pub fn on_removed<T: Component>(self) -> Self {
        self.on(Trigger::new(tag::<T>(), TriggerKind::Removed))
    }

    #[must_use]
    pub fn on_replaced<T: Component>(self) -> Self {
        self.on(Trigger::new(tag::<T>(), TriggerKind::Replaced))
    }

    #[must_use]
    pub fn on_added_or_replaced<T: Component>(self) -> Self {
        self.on(Trigger::new(tag::<T>(), TriggerKind::AddedOrReplaced))
    }

    /// Require a tag: the query's membership condition, or a trigger filter.
    #[must_use]
    pub fn with<T: Component>(self) -> Self {
        self.require(tag::<T>())
    }

    /// Exclude a tag.
    #[must_use]
    pub fn without<T: Component>(self) -> Self {
        self.exclude(tag::<T>())
    }

    /// Untyped form of [`with`](Self::with).
    #[must_use]
    pub fn require(mut self, component: impl Into<ComponentRef>) -> Self {
        self.required.push(component.into());
        self
    }

    /// Trigger filter: the entity must currently hold `component`.
    #[must_use]
    pub fn filter(self, component: impl Into<ComponentRef>) -> Self {
        self.require(component)
    }

    /// Untyped form of [`without`](Self::without).
    #[must_use]
    pub fn exclude(mut self, component: impl Into<ComponentRef>) -> Self {
        self.excluded.push(component.into());
        self
    }

    // -- Handlers --

    /// The handler of a triggered system.
    #[must_use]
    pub fn run<F>(mut self, handler: F) -> Self
    where
        F: Fn(&World, &[Entity]) -> anyhow::Result<()> + 'static,
    {
        self.handlers.run = Some(Box::new(handler));
        self
    }

    #[must_use]
    pub fn on_enter<F>(mut self, handler: F) -> Self
    where
        F: Fn(&World, &[Entity]) -> anyhow::Result<()> + 'static,
    {
        self.handlers.enter = Some(Box::new(handler));
        self
    }

    #[must_use]
    pub fn on_update<F>(mut self, handler: F) -> Self
    where
        F: Fn(&World, &[Entity]) -> anyhow::Result<()> + 'static,
    {
        self.handlers.update = Some(Box::new(handler));
        self
    }

    #[must_use]
    pub fn on_exit<F>(mut self, handler: F) -> Self
    where
        F: Fn(&World, &[Entity]) -> anyhow::Result<()> + 'static,
    {
        self.handlers.exit = Some(Box::new(handler));
        self
    }

    /// Validate the definition and resolve its tags against `store`.
    pub(crate) fn resolve(self, store: &mut ComponentStore) -> Result<RegisteredSystem, WorldError> {
        let invalid = |reason: &str| WorldError::InvalidSystem {
            name: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.name.trim().is_empty() {
            return Err(invalid("system names must not be blank"));
        }

        let registry = store.registry_mut();
        let mut query = QueryDescriptor::new();
        for component in &self.required {
            query = query.with(registry.resolve(component)?);
        }
        for component in &self.excluded {
            query = query.without(registry.resolve(component)?);
        }

        let matcher = if self.triggers.is_empty() {
            if self.handlers.run.is_some() {
                return Err(invalid("`run` needs at least one trigger"));
            }
            if !self.handlers.has_lifecycle() {
                return Err(invalid(
                    "a query system needs an enter, update or exit handler",
                ));
            }
            query.validate().map_err(invalid)?;
            Matcher::Query {
                query,
                members: RefCell::new(HashSet::new()),
            }
        } else {
            if self.handlers.has_lifecycle() {
                return Err(invalid(
                    "triggered systems use `run`, not enter/update/exit handlers",
                ));
            }
            if self.handlers.run.is_none() {
                return Err(invalid("a triggered system needs a `run` handler"));
            }
            if query.required.iter().any(|id| query.excluded.contains(id)) {
                return Err(invalid(
                    "a component cannot be both required and excluded",
                ));
            }
            let mut triggers = Vec::with_capacity(self.triggers.len());
            for trigger in &self.triggers {
                triggers.push((registry.resolve(&trigger.component)?, trigger.kind));
            }
            Matcher::Triggers {
                triggers,
                filter: query,
            }
        };

        Ok(RegisteredSystem {
            name: self.name,
            matcher,
            handlers: self.handlers,
        })
    }
}

impl fmt::Debug for System {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("System")
            .field("name", &self.name)
            .field("triggers", &self.triggers)
            .field("required", &self.required)
            .field("excluded", &self.excluded)
            .finish_non_exhaustive()
    }
}

/// Resolved matching criteria of a registered system.
#[derive(Debug)]
pub(crate) enum Matcher {
    /// Fires for entities with a matching mutation in the wave.
    Triggers {
        triggers: Vec<(ComponentId, TriggerKind)>,
        /// Current-state filter; empty means "no filter".
        filter: QueryDescriptor,
    },
    /// Persistent membership with enter/update/exit transitions.
    Query {
        query: QueryDescriptor,
        /// Entities currently considered matching.
        members: RefCell<HashSet<Entity>>,
    },
}

/// A system as stored by the world.
pub(crate) struct RegisteredSystem {
    pub(crate) name: String,
    pub(crate) matcher: Matcher,
    handlers: Handlers,
}

impl RegisteredSystem {
    pub(crate) fn handler(&self, phase: Phase) -> Option<&SystemFn> {
        self.handlers.get(phase)
    }
}

impl fmt::Debug for RegisteredSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredSystem")
            .field("name", &self.name)
            .field("matcher", &self.matcher)
            .finish_non_exhaustive()
    }
}
