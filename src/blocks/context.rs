//! Shared engine dependencies and tuning.

use super::DigesterRegistry;
use crate::filters::FilterRegistry;
use crate::storage::{CatalogRepository, ItemRepository};
use std::sync::Arc;
use std::time::Duration;

/// Default number of items per display page.
pub const DEFAULT_PAGE_SIZE: usize = 10;

/// Default bound on a single filter evaluation.
pub const DEFAULT_FILTER_TIMEOUT: Duration = Duration::from_millis(7000);

/// Pagination and evaluation tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Candidates fetched from the store per round.
    pub batch_size: usize,
    /// Items buffered ahead of the consumer.
    pub high_water_mark: usize,
    /// Bound on each filter evaluation; a timed-out filter counts as not evaluated.
    pub filter_timeout: Duration,
}

impl EngineSettings {
    /// Derives batch size (10x) and high-water mark (2x) from a page size.
    ///
    /// Both saturate at `usize::MAX` for absurdly large page sizes.
    #[must_use]
    pub const fn from_page_size(page_size: usize) -> Self {
        let page_size = if page_size == 0 { 1 } else { page_size };
        Self {
            batch_size: page_size.saturating_mul(10),
            high_water_mark: page_size.saturating_mul(2),
            filter_timeout: DEFAULT_FILTER_TIMEOUT,
        }
    }

    /// Sets the filter timeout.
    #[must_use]
    pub const fn with_filter_timeout(mut self, timeout: Duration) -> Self {
        self.filter_timeout = timeout;
        self
    }

    /// Sets the batch size.
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_page_size(DEFAULT_PAGE_SIZE)
    }
}

/// Everything block execution needs, cheap to clone.
///
/// One context is typically built per process; a fresh
/// [`super::BlockExecutor`] is built from it per rendering session.
#[derive(Clone)]
pub struct EngineContext {
    items: Arc<dyn ItemRepository>,
    catalog: Arc<dyn CatalogRepository>,
    filters: Arc<FilterRegistry>,
    digesters: Arc<DigesterRegistry>,
    settings: EngineSettings,
}

impl EngineContext {
    /// Creates a context with default settings.
    #[must_use]
    pub fn new(
        items: Arc<dyn ItemRepository>,
        catalog: Arc<dyn CatalogRepository>,
        filters: FilterRegistry,
        digesters: DigesterRegistry,
    ) -> Self {
        Self {
            items,
            catalog,
            filters: Arc::new(filters),
            digesters: Arc::new(digesters),
            settings: EngineSettings::default(),
        }
    }

    /// Creates a context over a store that holds both items and definitions.
    #[must_use]
    pub fn from_store<S>(store: Arc<S>, filters: FilterRegistry, digesters: DigesterRegistry) -> Self
    where
        S: ItemRepository + CatalogRepository + 'static,
    {
        let items: Arc<dyn ItemRepository> = Arc::clone(&store) as Arc<dyn ItemRepository>;
        let catalog: Arc<dyn CatalogRepository> = store;
        Self::new(items, catalog, filters, digesters)
    }

    /// Replaces the settings.
    #[must_use]
    pub const fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// The item store.
    #[must_use]
    pub fn items(&self) -> &Arc<dyn ItemRepository> {
        &self.items
    }

    /// The definition store.
    #[must_use]
    pub fn catalog(&self) -> &Arc<dyn CatalogRepository> {
        &self.catalog
    }

    /// The filter registry.
    #[must_use]
    pub fn filters(&self) -> &FilterRegistry {
        &self.filters
    }

    /// The digester registry.
    #[must_use]
    pub fn digesters(&self) -> &DigesterRegistry {
        &self.digesters
    }

    /// The tuning settings.
    #[must_use]
    pub const fn settings(&self) -> &EngineSettings {
        &self.settings
    }
}

impl std::fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineContext")
            .field("filters", &self.filters)
            .field("digesters", &self.digesters)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
