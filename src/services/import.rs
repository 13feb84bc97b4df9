//! Item import service.

use crate::models::NewItem;
use crate::storage::ItemRepository;
use crate::{Error, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, instrument};

/// Writes fetched items into the item store.
///
/// Items are upserted by link, so importing the same file twice leaves one
/// copy of each item and keeps recorded verdicts.
#[derive(Clone)]
pub struct ImportService {
    items: Arc<dyn ItemRepository>,
}

impl ImportService {
    /// Creates an import service.
    #[must_use]
    pub fn new(items: Arc<dyn ItemRepository>) -> Self {
        Self { items }
    }

    /// Imports a JSON array of items.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or a write fails.
    #[instrument(skip(self), fields(operation = "import_items"))]
    pub async fn import_file(&self, path: &Path) -> Result<usize> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::OperationFailed {
            operation: "read_items_file".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;
        let items: Vec<NewItem> = serde_json::from_str(&contents)
            .map_err(|e| Error::InvalidInput(format!("invalid items file: {e}")))?;
        self.import(items).await
    }

    /// Imports items in order, returning how many were written.
    ///
    /// # Errors
    ///
    /// Returns the first write error; earlier items stay imported.
    pub async fn import(&self, items: Vec<NewItem>) -> Result<usize> {
        let mut written = 0;
        for item in items {
            self.items.insert_item(item).await?;
            written += 1;
        }
        info!(items = written, "items imported");
        Ok(written)
    }
}

impl std::fmt::Debug for ImportService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportService").finish_non_exhaustive()
    }
}
