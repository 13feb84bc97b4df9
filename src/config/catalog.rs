//! Catalog file parsing.
//!
//! A catalog file declares every filter, block and feed in one TOML document:
//!
//! ```toml
//! [[filters]]
//! title = "Climate"
//! implementation = "KeywordMatch"
//! args = { keywords = ["climate", "emissions"] }
//!
//! [[blocks]]
//! title = "Climate news"
//! take = 10
//! stall_threshold = 200
//! order_by = [{ field = "date_published", direction = "desc" }]
//! where = { all = [
//!     { field = { name = "seen", op = "eq", value = false } },
//!     { filters_passed = { some = ["Climate"] } },
//! ] }
//!
//! [[blocks]]
//! title = "Briefing"
//! implementation = "Headlines"
//! args = { input_blocks = ["Climate news"], heading = "Climate" }
//!
//! [[feeds]]
//! title = "Morning"
//! blocks = ["Briefing", "Climate news"]
//! ```
//!
//! Blocks without an `implementation` (or with `"items"`) are items blocks;
//! any other implementation names a digester.

use crate::models::{
    BlockDefinition, BlockQuery, Catalog, Condition, FeedDefinition, FilterDefinition, OrderBy,
};
use crate::{Error, Result};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;

const ITEMS_IMPLEMENTATION: &str = "items";

/// Catalog file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct CatalogFile {
    /// Filter definitions.
    #[serde(default)]
    pub filters: Vec<FilterDefinition>,
    /// Block entries.
    #[serde(default)]
    pub blocks: Vec<CatalogFileBlock>,
    /// Feed definitions.
    #[serde(default)]
    pub feeds: Vec<FeedDefinition>,
}

/// A block entry in a catalog file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogFileBlock {
    /// Block title.
    pub title: String,
    /// `"items"` (default) or a digester name.
    pub implementation: Option<String>,
    /// Items condition.
    #[serde(rename = "where")]
    pub condition: Option<Condition>,
    /// Items ordering.
    pub order_by: Option<Vec<OrderBy>>,
    /// Items limit.
    pub take: Option<usize>,
    /// Items stall threshold.
    pub stall_threshold: Option<usize>,
    /// Digester arguments.
    pub args: Option<Value>,
}

impl CatalogFileBlock {
    fn into_definition(self) -> Result<BlockDefinition> {
        match self.implementation.as_deref() {
            None | Some(ITEMS_IMPLEMENTATION) => {
                if self.args.is_some() {
                    return Err(Error::InvalidInput(format!(
                        "items block '{}' does not take args",
                        self.title
                    )));
                }
                Ok(BlockDefinition::items(
                    self.title,
                    BlockQuery {
                        condition: self.condition.unwrap_or_default(),
                        order_by: self.order_by.unwrap_or_default(),
                        take: self.take,
                        stall_threshold: self.stall_threshold,
                    },
                ))
            },
            Some(implementation) => {
                let has_query = self.condition.is_some()
                    || self.order_by.is_some()
                    || self.take.is_some()
                    || self.stall_threshold.is_some();
                if has_query {
                    return Err(Error::InvalidInput(format!(
                        "digest block '{}' takes args, not an items query",
                        self.title
                    )));
                }
                let implementation = implementation.to_string();
                Ok(BlockDefinition::digest(
                    self.title,
                    implementation,
                    self.args.unwrap_or_else(|| Value::Object(serde_json::Map::new())),
                ))
            },
        }
    }
}

impl CatalogFile {
    /// Parses catalog TOML.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for malformed TOML or block entries.
    pub fn parse(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| Error::InvalidInput(format!("invalid catalog file: {e}")))
    }

    /// Reads and parses a catalog file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::OperationFailed {
            operation: "read_catalog_file".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;
        Self::parse(&contents)
    }

    /// Converts the file into a catalog.
    ///
    /// The result is not validated; see [`Catalog::validate`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for block entries that mix items and
    /// digest settings.
    pub fn into_catalog(self) -> Result<Catalog> {
        Ok(Catalog {
            filters: self.filters,
            blocks: self
                .blocks
                .into_iter()
                .map(CatalogFileBlock::into_definition)
                .collect::<Result<_>>()?,
            feeds: self.feeds,
        })
    }
}
