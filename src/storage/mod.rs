//! Storage layer abstraction.
//!
//! Two backends implement both [`ItemRepository`] and [`CatalogRepository`]:
//! - **`MemoryStore`**: in-process, for tests and throwaway sessions
//! - **`SqliteStore`**: durable, the default for the CLI
//!
//! Keeping items and definitions in one store lets relation snapshots join
//! verdicts against the current filter fingerprints.

// Allow significant_drop_tightening - guards are scoped to single statements already.
#![allow(clippy::significant_drop_tightening)]
// Allow match_same_arms for explicit enum handling.
#![allow(clippy::match_same_arms)]

mod memory;
pub mod sqlite;
pub mod traits;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{CatalogRepository, FilterResult, ItemRepository};
