//! Store queries: a condition plus ordering and paging.

use super::{Condition, ItemField};
use serde::{Deserialize, Serialize};

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    /// Smallest first. Absent values sort before present ones.
    #[default]
    Asc,
    /// Largest first. Absent values sort after present ones.
    Desc,
}

/// One ordering key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderBy {
    /// The field to sort on.
    pub field: ItemField,
    /// The direction.
    #[serde(default)]
    pub direction: SortDirection,
}

impl OrderBy {
    /// Ascending order on `field`.
    #[must_use]
    pub const fn asc(field: ItemField) -> Self {
        Self {
            field,
            direction: SortDirection::Asc,
        }
    }

    /// Descending order on `field`.
    #[must_use]
    pub const fn desc(field: ItemField) -> Self {
        Self {
            field,
            direction: SortDirection::Desc,
        }
    }
}

/// A query against an [`crate::ItemRepository`].
///
/// Results are sorted by `order_by` and then by ascending id, so every
/// ordering is total and repeated queries over unchanged data agree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemQuery {
    /// Filter condition.
    pub condition: Condition,
    /// Ordering keys, most significant first.
    pub order_by: Vec<OrderBy>,
    /// Maximum number of rows; `None` for no limit.
    pub take: Option<usize>,
}

impl ItemQuery {
    /// Creates a query for all items matching `condition`.
    #[must_use]
    pub fn new(condition: Condition) -> Self {
        Self {
            condition,
            ..Self::default()
        }
    }

    /// Sets the ordering.
    #[must_use]
    pub fn ordered_by(mut self, order_by: Vec<OrderBy>) -> Self {
        self.order_by = order_by;
        self
    }

    /// Sets the row limit.
    #[must_use]
    pub const fn take(mut self, take: usize) -> Self {
        self.take = Some(take);
        self
    }
}
