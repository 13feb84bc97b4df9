//! Business logic services.
//!
//! Services orchestrate the stores and the block engine and provide the
//! high-level operations the CLI exposes.

mod catalog;
mod feed;
mod import;

pub use catalog::{CatalogService, CatalogSummary};
pub use feed::{FeedService, RenderedBlock};
pub use import::ImportService;
