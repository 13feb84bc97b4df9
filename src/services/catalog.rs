//! Catalog loading service.

use crate::blocks::EngineContext;
use crate::config::CatalogFile;
use crate::models::{BlockKind, Catalog};
use crate::Result;
use std::path::Path;
use tracing::{info, instrument, warn};

/// Summary of a catalog load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogSummary {
    /// Filters stored.
    pub filters: usize,
    /// Blocks stored.
    pub blocks: usize,
    /// Feeds stored.
    pub feeds: usize,
}

/// Validates catalogs and writes them to the definition store.
#[derive(Debug, Clone)]
pub struct CatalogService {
    context: EngineContext,
}

impl CatalogService {
    /// Creates a catalog service.
    #[must_use]
    pub const fn new(context: EngineContext) -> Self {
        Self { context }
    }

    /// Loads the catalog file at `path` into the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated, or
    /// the store write fails. Nothing is written on validation failure.
    #[instrument(skip(self), fields(operation = "load_catalog"))]
    pub async fn load_file(&self, path: &Path) -> Result<CatalogSummary> {
        let catalog = CatalogFile::load(path)?.into_catalog()?;
        self.apply(&catalog).await
    }

    /// Validates `catalog` and replaces the stored definitions with it.
    ///
    /// Implementations missing from the registries are logged, not rejected:
    /// the process rendering feeds may register more than the one loading
    /// them. Execution reports them per block.
    ///
    /// # Errors
    ///
    /// Returns the validation or store error.
    pub async fn apply(&self, catalog: &Catalog) -> Result<CatalogSummary> {
        catalog.validate()?;
        self.warn_unregistered(catalog);
        self.context.catalog().replace_catalog(catalog).await?;

        let summary = CatalogSummary {
            filters: catalog.filters.len(),
            blocks: catalog.blocks.len(),
            feeds: catalog.feeds.len(),
        };
        info!(
            filters = summary.filters,
            blocks = summary.blocks,
            feeds = summary.feeds,
            "catalog loaded"
        );
        Ok(summary)
    }

    fn warn_unregistered(&self, catalog: &Catalog) {
        for filter in &catalog.filters {
            if !self.context.filters().contains(&filter.implementation) {
                warn!(
                    filter = %filter.title,
                    implementation = %filter.implementation,
                    "filter implementation is not registered"
                );
            }
        }
        for block in &catalog.blocks {
            if let BlockKind::Digest { implementation, .. } = &block.kind
                && !self.context.digesters().contains(implementation)
            {
                warn!(
                    block = %block.title,
                    implementation = %implementation,
                    "digester implementation is not registered"
                );
            }
        }
    }
}
