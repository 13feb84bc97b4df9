//! Data models for feedsift.
//!
//! Items and their display projection, condition trees, store queries and
//! catalog definitions.

mod block;
mod condition;
mod item;
mod query;

pub use block::{
    BlockDefinition, BlockKind, BlockQuery, Catalog, FeedDefinition, FilterDefinition,
    INPUT_BLOCKS_KEY,
};
pub use condition::{
    Condition, FieldCondition, FieldKind, FieldOp, FieldValue, ItemField, Operands,
    RelationMatch, Scalar,
};
pub use item::{DisplayItem, Item, ItemId, NewItem};
pub use query::{ItemQuery, OrderBy, SortDirection};
