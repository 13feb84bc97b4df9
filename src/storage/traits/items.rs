//! Item repository trait.
//!
//! The item repository owns items and their filter verdicts. The items
//! iterator reads candidate batches through it and writes verdicts back.
//!
//! # Available Implementations
//!
//! | Backend | Use Case |
//! |---------|----------|
//! | `MemoryStore` | Tests, ephemeral sessions |
//! | `SqliteStore` | Default; embedded and durable |
//!
//! # Relation snapshots
//!
//! Every returned [`Item`] carries `filters_checked` / `filters_passed`
//! computed against the filter definitions currently stored through
//! [`crate::CatalogRepository`]. A verdict recorded under an older argument
//! fingerprint is ignored, and a verdict for a title with no definition is
//! never reported.
//!
//! # Write guarantees
//!
//! [`ItemRepository::record_filter_results`] is idempotent and monotonic:
//! recording the same verdict twice changes nothing, and a recorded `passed`
//! is never downgraded for the same fingerprint. Concurrent writers can only
//! duplicate work, never corrupt state.

use crate::Result;
use crate::models::{Condition, Item, ItemId, ItemQuery, NewItem};
use async_trait::async_trait;

/// Verdict of one filter evaluation against one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterResult {
    /// Filter title.
    pub title: String,
    /// Argument fingerprint of the definition that produced the verdict.
    pub fingerprint: String,
    /// Whether the item passed.
    pub passed: bool,
}

/// Trait for item stores.
///
/// # Implementor Notes
///
/// - Methods use `&self` to enable sharing via `Arc<dyn ItemRepository>`
/// - Use interior mutability (e.g., `Mutex<Connection>`) for mutable state
/// - Never hold a lock across an `.await`
/// - Order results by the query's keys, then by ascending id, with absent
///   values first for ascending keys and last for descending keys
#[async_trait]
pub trait ItemRepository: Send + Sync {
    /// Returns the items matching the query, ordered and limited.
    async fn find_items(&self, query: &ItemQuery) -> Result<Vec<Item>>;

    /// Returns the item with `id` if it exists and satisfies `condition`.
    async fn find_item(&self, id: ItemId, condition: &Condition) -> Result<Option<Item>>;

    /// Records filter verdicts for an item in one atomic write.
    async fn record_filter_results(&self, id: ItemId, results: &[FilterResult]) -> Result<()>;

    /// Inserts an item, or updates the content of the item with the same link.
    ///
    /// Reader flags and recorded verdicts of an existing item are preserved.
    async fn insert_item(&self, item: NewItem) -> Result<ItemId>;

    /// Returns the items with the given ids, in the given order, skipping unknown ids.
    async fn get_items(&self, ids: &[ItemId]) -> Result<Vec<Item>>;

    /// Returns the item with `id`.
    async fn get_item(&self, id: ItemId) -> Result<Option<Item>> {
        Ok(self.get_items(&[id]).await?.into_iter().next())
    }
}
