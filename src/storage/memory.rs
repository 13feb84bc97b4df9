//! In-process item and catalog store.
//!
//! Evaluates conditions with [`Condition::matches`] over snapshots of the
//! stored items. Ordering mirrors the `SQLite` store, so both backends return
//! identical results for identical data.

use super::sqlite::{acquire_lock, record_operation_metrics};
use super::traits::{CatalogRepository, FilterResult, ItemRepository};
use crate::models::{
    BlockDefinition, Catalog, Condition, FeedDefinition, FilterDefinition, Item, ItemId,
    ItemQuery, NewItem, OrderBy, SortDirection,
};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;
use std::time::Instant;
use tracing::instrument;

/// Item with every verdict ever recorded for it.
#[derive(Debug, Clone)]
struct StoredItem {
    /// Relation sets are left empty; snapshots fill them in.
    item: Item,
    /// `(title, fingerprint) -> passed`
    verdicts: HashMap<(String, String), bool>,
}

#[derive(Debug, Default)]
struct MemoryState {
    items: BTreeMap<ItemId, StoredItem>,
    links: HashMap<String, ItemId>,
    next_id: i64,
    filters: BTreeMap<String, FilterDefinition>,
    fingerprints: HashMap<String, String>,
    blocks: HashMap<String, BlockDefinition>,
    feeds: Vec<FeedDefinition>,
}

impl MemoryState {
    fn snapshot(&self, stored: &StoredItem) -> Item {
        let mut item = stored.item.clone();
        let (checked, passed): (BTreeSet<String>, BTreeSet<String>) = stored
            .verdicts
            .iter()
            .filter(|((title, fingerprint), _)| {
                self.fingerprints.get(title) == Some(fingerprint)
            })
            .fold(
                (BTreeSet::new(), BTreeSet::new()),
                |(mut checked, mut passed), ((title, _), ok)| {
                    checked.insert(title.clone());
                    if *ok {
                        passed.insert(title.clone());
                    }
                    (checked, passed)
                },
            );
        item.filters_checked = checked;
        item.filters_passed = passed;
        item
    }
}

/// Orders two items by `order_by`, then by ascending id.
fn compare_items(a: &Item, b: &Item, order_by: &[OrderBy]) -> Ordering {
    for key in order_by {
        let ordering = key.field.value_of(a).cmp(&key.field.value_of(b));
        let ordering = match key.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    a.id.cmp(&b.id)
}

/// In-memory store implementing both repository traits.
///
/// # Example
///
/// ```rust,ignore
/// use feedsift::{ItemRepository, MemoryStore, NewItem};
///
/// let store = MemoryStore::new();
/// let id = store.insert_item(NewItem::new("https://example.com/a", "Example", "A")).await?;
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored items.
    #[must_use]
    pub fn len(&self) -> usize {
        acquire_lock(&self.state).items.len()
    }

    /// Returns true if no items are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ItemRepository for MemoryStore {
    #[instrument(skip(self, query), fields(operation = "find_items", backend = "memory", take = ?query.take))]
    async fn find_items(&self, query: &ItemQuery) -> Result<Vec<Item>> {
        let start = Instant::now();
        let result = query.condition.validate().map(|()| {
            let state = acquire_lock(&self.state);
            let mut items: Vec<Item> = state
                .items
                .values()
                .map(|stored| state.snapshot(stored))
                .filter(|item| query.condition.matches(item))
                .collect();
            drop(state);
            items.sort_by(|a, b| compare_items(a, b, &query.order_by));
            if let Some(take) = query.take {
                items.truncate(take);
            }
            items
        });

        let status = if result.is_ok() { "success" } else { "error" };
        record_operation_metrics("memory", "find_items", start, status);
        result
    }

    #[instrument(skip(self, condition), fields(operation = "find_item", backend = "memory", item.id = %id))]
    async fn find_item(&self, id: ItemId, condition: &Condition) -> Result<Option<Item>> {
        condition.validate()?;
        let state = acquire_lock(&self.state);
        Ok(state
            .items
            .get(&id)
            .map(|stored| state.snapshot(stored))
            .filter(|item| condition.matches(item)))
    }

    #[instrument(skip(self, results), fields(operation = "record_filter_results", backend = "memory", item.id = %id, count = results.len()))]
    async fn record_filter_results(&self, id: ItemId, results: &[FilterResult]) -> Result<()> {
        let start = Instant::now();
        let result = {
            let mut state = acquire_lock(&self.state);
            match state.items.get_mut(&id) {
                Some(stored) => {
                    for verdict in results {
                        let entry = stored
                            .verdicts
                            .entry((verdict.title.clone(), verdict.fingerprint.clone()))
                            .or_insert(false);
                        *entry |= verdict.passed;
                    }
                    Ok(())
                },
                None => Err(Error::NotFound {
                    kind: "item",
                    name: id.to_string(),
                }),
            }
        };

        let status = if result.is_ok() { "success" } else { "error" };
        record_operation_metrics("memory", "record_filter_results", start, status);
        result
    }

    #[instrument(skip(self, item), fields(operation = "insert_item", backend = "memory", item.link = %item.link))]
    async fn insert_item(&self, item: NewItem) -> Result<ItemId> {
        if item.link.is_empty() {
            return Err(Error::InvalidInput("item link must not be empty".to_string()));
        }
        let mut state = acquire_lock(&self.state);

        if let Some(id) = state.links.get(&item.link).copied() {
            if let Some(stored) = state.items.get_mut(&id) {
                let existing = &mut stored.item;
                existing.item_type = item.item_type;
                existing.source_name = item.source_name;
                existing.title = item.title;
                existing.description = item.description;
                existing.content = item.content;
                existing.authors = item.authors;
                existing.date_published = item.date_published;
                existing.image_link = item.image_link;
                existing.number_of_words = item.number_of_words;
                existing.likes = item.likes;
                existing.comments_link = item.comments_link;
            }
            return Ok(id);
        }

        state.next_id += 1;
        let id = ItemId::new(state.next_id);
        let stored = StoredItem {
            item: Item {
                id,
                link: item.link.clone(),
                item_type: item.item_type,
                source_name: item.source_name,
                title: item.title,
                description: item.description,
                content: item.content,
                authors: item.authors,
                date_published: item.date_published,
                date_added: item.date_added.unwrap_or_else(Utc::now),
                image_link: item.image_link,
                number_of_words: item.number_of_words,
                likes: item.likes,
                comments_link: item.comments_link,
                seen: false,
                saved: false,
                read_later: false,
                filters_checked: BTreeSet::new(),
                filters_passed: BTreeSet::new(),
            },
            verdicts: HashMap::new(),
        };
        state.links.insert(item.link, id);
        state.items.insert(id, stored);
        Ok(id)
    }

    async fn get_items(&self, ids: &[ItemId]) -> Result<Vec<Item>> {
        let state = acquire_lock(&self.state);
        Ok(ids
            .iter()
            .filter_map(|id| state.items.get(id))
            .map(|stored| state.snapshot(stored))
            .collect())
    }
}

#[async_trait]
impl CatalogRepository for MemoryStore {
    async fn get_filters(&self, titles: &[String]) -> Result<Vec<FilterDefinition>> {
        let state = acquire_lock(&self.state);
        Ok(titles
            .iter()
            .filter_map(|title| state.filters.get(title).cloned())
            .collect())
    }

    async fn get_block(&self, title: &str) -> Result<Option<BlockDefinition>> {
        Ok(acquire_lock(&self.state).blocks.get(title).cloned())
    }

    async fn get_feed(&self, title: &str) -> Result<Option<FeedDefinition>> {
        Ok(acquire_lock(&self.state)
            .feeds
            .iter()
            .find(|feed| feed.title == title)
            .cloned())
    }

    async fn list_feeds(&self) -> Result<Vec<FeedDefinition>> {
        Ok(acquire_lock(&self.state).feeds.clone())
    }

    #[instrument(skip(self, catalog), fields(operation = "replace_catalog", backend = "memory", filters = catalog.filters.len(), blocks = catalog.blocks.len()))]
    async fn replace_catalog(&self, catalog: &Catalog) -> Result<()> {
        let mut state = acquire_lock(&self.state);
        state.fingerprints = catalog
            .filters
            .iter()
            .map(|filter| (filter.title.clone(), filter.fingerprint()))
            .collect();
        state.filters = catalog
            .filters
            .iter()
            .map(|filter| (filter.title.clone(), filter.clone()))
            .collect();
        state.blocks = catalog
            .blocks
            .iter()
            .map(|block| (block.title.clone(), block.clone()))
            .collect();
        state.feeds.clone_from(&catalog.feeds);
        Ok(())
    }
}
