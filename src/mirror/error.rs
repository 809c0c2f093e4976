//! Error types for the sync engine.

use thiserror::Error;

use crate::catalog::CatalogError;

/// Per-item materialization failure. Catalog errors may be transient and
/// are retried within the run; disk errors are not.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("disk error: {0}")]
    Disk(#[from] std::io::Error),

    #[error(transparent)]
    State(#[from] crate::state::StateError),
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Catalog(e) => e.is_retryable(),
            FetchError::Disk(_) => false,
            FetchError::State(_) => false,
        }
    }
}

/// Failure while projecting the album/collection tree.
#[derive(Debug, Error)]
pub enum ProjectError {
    /// The remote collection graph revisited an ancestor — a malformed
    /// topology that would recurse forever if trusted as a tree.
    #[error("collection cycle detected: {id} is its own ancestor")]
    CollectionCycle { id: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
