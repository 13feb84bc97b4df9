//! Storage backend traits.

mod catalog;
mod items;

pub use catalog::CatalogRepository;
pub use items::{FilterResult, ItemRepository};
