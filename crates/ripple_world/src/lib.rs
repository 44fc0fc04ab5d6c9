//! # ripple_world
//!
//! A reactive entity/component world. Callers attach, replace and remove
//! component data on entities; registered systems are re-invoked whenever
//! the data they care about changes.
//!
//! ## Architecture
//!
//! ```text
//! caller ──add/set/remove──▶ ComponentStore ──▶ MutationLog
//!                                 │
//!                                 └──▶ MutationBus (subscribers, synchronous)
//!
//! outside a batch: Scheduler ──▶ flush
//!   loop { wave = log.drain(); for system in registry { matcher.evaluate(wave); invoke } }
//! ```
//!
//! Writes made by systems during a flush always land in a later wave. A flush
//! ends when a wave produces nothing, or fails once it exceeds the configured
//! wave cap.
//!
//! ## Crate layout
//!
//! - [`world`]: the [`World`] handle and its public operations
//! - [`system`]: system builders, triggers and phases
//! - `flush`: the wave loop
//! - [`scheduler`]: immediate, microtask and frame scheduling
//! - [`bus`]: mutation subscriptions
//! - [`profiler`]: opt-in flush timing
//! - [`inspect`]: debug views and error reports
//! - [`config`]: [`WorldConfig`] and its environment overrides
//! - [`externals`]: host values and per-entity runtime state

pub mod bus;
pub mod config;
pub mod error;
pub mod externals;
mod flush;
pub mod inspect;
mod matcher;
pub mod profiler;
mod registry;
pub mod scheduler;
pub mod system;
pub mod world;

pub use bus::{MutationEvent, MutationFilter, Subscription};
pub use config::{ConfigError, SchedulerKind, WorldConfig};
pub use error::{CallbackError, WorldError};
pub use externals::Externals;
pub use inspect::{ComponentView, EntityInspection, SystemInfo, SystemKind, WorldSnapshot};
pub use profiler::{FlushProfile, SystemProfile, SystemStats};
pub use scheduler::{
    FlushFuture, FlushTask, FrameJob, FrameScheduler, ImmediateScheduler, MicrotaskScheduler,
    Scheduler,
};
pub use system::{Phase, System, SystemFn, Trigger, TriggerKind};
pub use world::{Bundle, World, WorldBuilder};

pub use ripple_component::{
    Component, ComponentData, ComponentId, ComponentRef, Entity, MutationKind, StoreError, tag,
};
