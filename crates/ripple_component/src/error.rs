//! Store-level error types.

use crate::component::ComponentId;
use crate::entity::Entity;

/// Structural violations raised by the registry and the store.
///
/// All of these are raised synchronously at the offending call and leave the
/// store untouched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The entity handle is not live.
    #[error("invalid entity: {0} does not exist")]
    InvalidEntity(Entity),

    /// `add` was called for a tag the entity already holds.
    #[error("{entity} already has component `{tag}`")]
    DuplicateComponent {
        /// The target entity.
        entity: Entity,
        /// The tag that was already present.
        tag: String,
    },

    /// A tag name was empty or whitespace.
    #[error("invalid component tag {0:?}: tags must not be blank")]
    InvalidTag(String),

    /// A tag already bound to one Rust type was used with another.
    #[error("component tag `{tag}` is bound to `{bound}`, not `{requested}`")]
    TypeMismatch {
        /// The tag name.
        tag: String,
        /// Rust type the tag was first registered with.
        bound: &'static str,
        /// Rust type of the rejected registration.
        requested: &'static str,
    },

    /// A raw [`ComponentId`] that this registry never issued.
    #[error("unknown component id {0:?}")]
    UnknownComponent(ComponentId),
}
