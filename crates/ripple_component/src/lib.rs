//! # ripple_component
//!
//! Storage layer of the ripple reactive world: the "E" and the "C".
//!
//! This crate provides:
//!
//! - [`Entity`] / [`EntityAllocator`]: monotonically allocated handles.
//! - [`Component`], [`ComponentRegistry`]: nominal tags interned into
//!   small [`ComponentId`]s, optionally bound to a Rust type.
//! - [`ComponentData`]: shared, immutable component payloads.
//! - [`ComponentStore`]: per-entity component maps, a reverse tag index for
//!   conjunctive queries, and the parent/child forest.
//! - [`QueryDescriptor`]: required/excluded tag sets.
//! - [`MutationLog`]: the drain-and-reset queue of [`Mutation`] records.

pub mod component;
pub mod entity;
pub mod error;
pub mod mutation;
pub mod query;
pub mod store;

pub use component::{
    Component, ComponentData, ComponentId, ComponentInfo, ComponentKey, ComponentRef,
    ComponentRegistry, tag,
};
pub use entity::{Entity, EntityAllocator};
pub use error::StoreError;
pub use mutation::{Mutation, MutationKind, MutationLog};
pub use query::QueryDescriptor;
pub use store::{ComponentStore, InsertMode, Inserted};
