//! Catalog repository trait.

use crate::Result;
use crate::models::{BlockDefinition, Catalog, FeedDefinition, FilterDefinition};
use async_trait::async_trait;

/// Trait for stores of filter, block and feed definitions.
///
/// Definitions are written in bulk by catalog loading and only read by the
/// engine.
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    /// Returns the definitions for the given filter titles, skipping unknown ones.
    async fn get_filters(&self, titles: &[String]) -> Result<Vec<FilterDefinition>>;

    /// Returns a block definition by title.
    async fn get_block(&self, title: &str) -> Result<Option<BlockDefinition>>;

    /// Returns a feed definition by title.
    async fn get_feed(&self, title: &str) -> Result<Option<FeedDefinition>>;

    /// Returns all feeds in display order.
    async fn list_feeds(&self) -> Result<Vec<FeedDefinition>>;

    /// Replaces the stored definitions with `catalog`.
    ///
    /// Filters, blocks and feeds in `catalog` are upserted by title and
    /// definitions it no longer declares are removed. Verdicts recorded for
    /// items are kept; a changed filter fingerprint simply stops them from
    /// counting.
    async fn replace_catalog(&self, catalog: &Catalog) -> Result<()>;
}
