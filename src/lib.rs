//! # Feedsift
//!
//! Incremental relevance filtering and block execution for personalized feeds.
//!
//! Feedsift turns declarative item queries into lazily produced, deduplicated,
//! order-preserving item streams. Queries may depend on expensive relevance
//! filters (for example language-model classifiers); those are evaluated on
//! demand, at most once per item and filter version, and their verdicts are
//! persisted alongside the items.
//!
//! ## Features
//!
//! - Composable condition trees over item fields, authors and filter verdicts
//! - Pull-driven item streams with bounded buffering and cancellation
//! - Concurrent filter fan-out with per-evaluation timeouts
//! - Block graph execution with per-session memoization and cycle detection
//! - Pluggable filter and digester registries
//! - In-memory and `SQLite` stores
//!
//! ## Example
//!
//! ```rust,ignore
//! use feedsift::{BlockExecutor, EngineContext};
//!
//! let mut executor = BlockExecutor::new(context, "Morning");
//! let output = executor.execute("Climate news").await?;
//! if let Some(stream) = output.item_stream() {
//!     let items = feedsift::blocks::collect_items(stream).await?;
//! }
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

// Module declarations
pub mod blocks;
pub mod config;
pub mod filters;
pub mod models;
pub mod observability;
pub mod services;
pub mod storage;

// Re-exports for convenience
pub use blocks::{
    BlockExecutor, BlockOutput, BlockStream, ContentStream, Digester, DigesterRegistry,
    EngineContext, EngineSettings, ItemStream, ItemsIterator,
};
pub use config::FeedsiftConfig;
pub use filters::{FilterRegistry, ItemFilter};
pub use models::{
    BlockDefinition, BlockKind, BlockQuery, Catalog, Condition, DisplayItem, FeedDefinition,
    FilterDefinition, Item, ItemId, ItemQuery, NewItem, OrderBy,
};
pub use services::{CatalogService, FeedService, ImportService};
pub use storage::{CatalogRepository, ItemRepository, MemoryStore, SqliteStore};

/// Error type for feedsift operations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `InvalidInput` | Malformed conditions, missing `input_blocks`, bad catalog files |
/// | `OperationFailed` | Store queries or writes fail, spawned tasks die |
/// | `NotFound` | A block, feed or filter definition does not exist |
/// | `MissingImplementation` | A filter or digester name is not registered |
/// | `CycleDetected` | A digest block depends on itself |
///
/// Errors are `Clone` so a block output shared by several readers can replay
/// a failure to each of them.
#[derive(Debug, Clone, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An operation failed.
    ///
    /// Raised when:
    /// - `SQLite` statements fail
    /// - A candidate resolution task panics or is cancelled
    /// - Reading or parsing a file fails
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// A named record does not exist.
    #[error("{kind} '{name}' not found")]
    NotFound {
        /// Record kind ("block", "feed", "filter").
        kind: &'static str,
        /// The title that was looked up.
        name: String,
    },

    /// A block references an implementation that is not registered.
    #[error("block '{block}' uses unknown {kind} implementation '{implementation}'")]
    MissingImplementation {
        /// Title of the block being constructed.
        block: String,
        /// Registry kind ("filter" or "digester").
        kind: &'static str,
        /// The implementation key that was looked up.
        implementation: String,
    },

    /// The digest input graph contains a cycle.
    #[error("block dependency cycle: {}", .0.join(" -> "))]
    CycleDetected(Vec<String>),
}

/// Result type alias for feedsift operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidInput("test error".to_string());
        assert_eq!(err.to_string(), "invalid input: test error");

        let err = Error::OperationFailed {
            operation: "find_items".to_string(),
            cause: "disk I/O error".to_string(),
        };
        assert_eq!(err.to_string(), "operation 'find_items' failed: disk I/O error");

        let err = Error::MissingImplementation {
            block: "Briefing".to_string(),
            kind: "digester",
            implementation: "Nope".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "block 'Briefing' uses unknown digester implementation 'Nope'"
        );

        let err = Error::CycleDetected(vec!["A".to_string(), "B".to_string(), "A".to_string()]);
        assert_eq!(err.to_string(), "block dependency cycle: A -> B -> A");
    }
}
