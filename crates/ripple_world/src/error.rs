//! World-level error types.

use std::error::Error as StdError;
use std::sync::Arc;

use ripple_component::{Entity, StoreError};

use crate::system::Phase;

/// A system callback's error, shared so [`WorldError`] can be cloned to every
/// awaiter of a flush.
pub type CallbackError = Arc<dyn StdError + Send + Sync + 'static>;

/// Errors raised by a [`World`](crate::World).
#[derive(Debug, Clone, thiserror::Error)]
pub enum WorldError {
    /// A structural violation: invalid entity, duplicate component, invalid
    /// tag, tag/type mismatch, or unknown component id.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A system definition was rejected at registration.
    #[error("invalid system `{name}`: {reason}")]
    InvalidSystem {
        /// The system's name as given.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A system callback returned an error. The flush stopped at that point.
    #[error(
        "system `{system}` failed during {phase} for {} entities: {source}\n{report}",
        .entities.len()
    )]
    SystemExecution {
        /// Name of the failing system.
        system: String,
        /// Which callback failed.
        phase: Phase,
        /// The entities the callback was invoked with.
        entities: Vec<Entity>,
        /// One line per entity: id, current components, parent chain.
        report: String,
        /// The callback's own error.
        #[source]
        source: CallbackError,
    },

    /// Systems kept producing mutations past the configured wave cap.
    #[error(
        "flush did not settle within {waves} waves; last system to produce mutations: `{last_system}`"
    )]
    UnboundedFlush {
        /// The wave cap that was hit.
        waves: usize,
        /// The system whose mutations were still pending.
        last_system: String,
    },
}

impl WorldError {
    /// Wrap a callback error for sharing.
    pub(crate) fn shared_source(err: anyhow::Error) -> CallbackError {
        Arc::from(Box::<dyn StdError + Send + Sync>::from(err))
    }

    /// The underlying store error, if this is a structural violation.
    #[must_use]
    pub fn as_store(&self) -> Option<&StoreError> {
        match self {
            WorldError::Store(err) => Some(err),
            _ => None,
        }
    }
}
