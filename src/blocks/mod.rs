//! Block execution engine.
//!
//! Blocks are the units a feed is made of:
//!
//! | Kind | Produces | Built by |
//! |------|----------|----------|
//! | items | [`ItemStream`] of display items | [`ItemsIterator`] |
//! | digest | [`ContentStream`] of text chunks | a registered [`Digester`] |
//!
//! A [`BlockExecutor`] resolves block titles within one rendering session,
//! executing digest inputs recursively and memoizing every output.

mod context;
pub mod digesters;
mod executor;
mod items_iterator;
mod output;

pub use context::{DEFAULT_FILTER_TIMEOUT, DEFAULT_PAGE_SIZE, EngineContext, EngineSettings};
pub use digesters::{Digester, DigesterRegistry, Headlines, collect_content, collect_items};
pub use executor::BlockExecutor;
pub use items_iterator::ItemsIterator;
pub use output::{
    BlockOutput, BlockStream, ContentStream, ItemStream, OutputKind, content_from_chunks,
};
