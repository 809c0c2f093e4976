//! Pending-video registry.
//!
//! Some video originals cannot be fetched through the API and need a manual
//! operator download. This module remembers which videos have already been
//! flagged so the operator is prompted exactly once across runs.

mod db;
mod error;
mod schema;

pub use db::{PendingStore, SqlitePendingStore};
pub use error::StateError;
