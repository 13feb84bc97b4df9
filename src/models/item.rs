//! Item types and identifiers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Unique numeric identifier for a stored item.
///
/// Digest output references items by this number (`[42]`), so it must stay
/// stable for the lifetime of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(i64);

impl ItemId {
    /// Creates a new item ID.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ItemId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// A persisted content unit together with its filter relation snapshots.
///
/// `filters_checked` and `filters_passed` only contain titles whose recorded
/// verdict matches the filter's current argument fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    /// Store-assigned identifier.
    pub id: ItemId,
    /// Source link; unique across the store.
    pub link: String,
    /// Display type ("Link", "Article", ...).
    pub item_type: Option<String>,
    /// Name of the source the item was ingested from.
    pub source_name: String,
    /// Headline.
    pub title: String,
    /// Short description or dek.
    pub description: Option<String>,
    /// Full text when the source provides it.
    pub content: Option<String>,
    /// Author names in byline order.
    pub authors: Vec<String>,
    /// Publication time reported by the source.
    pub date_published: Option<DateTime<Utc>>,
    /// Ingestion time.
    pub date_added: DateTime<Utc>,
    /// Lead image.
    pub image_link: Option<String>,
    /// Word count of `content`.
    pub number_of_words: Option<i64>,
    /// Like count reported by the source.
    pub likes: Option<i64>,
    /// Discussion link.
    pub comments_link: Option<String>,
    /// Whether the reader has seen the item.
    pub seen: bool,
    /// Whether the reader saved the item.
    pub saved: bool,
    /// Whether the reader queued the item for later.
    pub read_later: bool,
    /// Titles of filters evaluated against this item.
    pub filters_checked: BTreeSet<String>,
    /// Titles of filters this item passed; always a subset of `filters_checked`.
    pub filters_passed: BTreeSet<String>,
}

/// Item payload accepted by [`crate::ItemRepository::insert_item`].
///
/// Deserializes from the JSON produced by source fetchers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewItem {
    /// Source link; re-inserting the same link updates the existing item.
    pub link: String,
    /// Display type.
    pub item_type: Option<String>,
    /// Source name.
    pub source_name: String,
    /// Headline.
    pub title: String,
    /// Short description.
    pub description: Option<String>,
    /// Full text.
    pub content: Option<String>,
    /// Author names.
    pub authors: Vec<String>,
    /// Publication time.
    pub date_published: Option<DateTime<Utc>>,
    /// Ingestion time; defaults to now when absent.
    pub date_added: Option<DateTime<Utc>>,
    /// Lead image.
    pub image_link: Option<String>,
    /// Word count.
    pub number_of_words: Option<i64>,
    /// Like count.
    pub likes: Option<i64>,
    /// Discussion link.
    pub comments_link: Option<String>,
}

impl NewItem {
    /// Creates a minimal item with the given link, source and title.
    #[must_use]
    pub fn new(
        link: impl Into<String>,
        source_name: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            link: link.into(),
            source_name: source_name.into(),
            title: title.into(),
            ..Default::default()
        }
    }

    /// Sets the publication time.
    #[must_use]
    pub const fn published_at(mut self, date: DateTime<Utc>) -> Self {
        self.date_published = Some(date);
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the authors.
    #[must_use]
    pub fn with_authors<I, S>(mut self, authors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.authors = authors.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the word count.
    #[must_use]
    pub const fn with_word_count(mut self, words: i64) -> Self {
        self.number_of_words = Some(words);
        self
    }
}

/// Read-only projection of an [`Item`] handed to the display layer.
///
/// Produced only once the query decision for the item is final.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplayItem {
    /// Item identifier.
    pub id: ItemId,
    /// Source link.
    pub link: String,
    /// Display type.
    pub item_type: Option<String>,
    /// Source name.
    pub source_name: String,
    /// Headline.
    pub title: String,
    /// Short description.
    pub description: Option<String>,
    /// Author names.
    pub authors: Vec<String>,
    /// Publication time.
    pub date_published: Option<DateTime<Utc>>,
    /// Ingestion time.
    pub date_added: DateTime<Utc>,
    /// Lead image.
    pub image_link: Option<String>,
    /// Word count.
    pub number_of_words: Option<i64>,
    /// Like count.
    pub likes: Option<i64>,
    /// Discussion link.
    pub comments_link: Option<String>,
    /// Seen flag.
    pub seen: bool,
    /// Saved flag.
    pub saved: bool,
    /// Read-later flag.
    pub read_later: bool,
    /// Title of the block that produced the item.
    pub block_title: String,
    /// Title of the feed being rendered (empty outside a feed).
    pub feed_title: String,
}

impl DisplayItem {
    /// Projects an item for display within a block and feed.
    #[must_use]
    pub fn from_item(item: Item, block_title: &str, feed_title: &str) -> Self {
        Self {
            id: item.id,
            link: item.link,
            item_type: item.item_type,
            source_name: item.source_name,
            title: item.title,
            description: item.description,
            authors: item.authors,
            date_published: item.date_published,
            date_added: item.date_added,
            image_link: item.image_link,
            number_of_words: item.number_of_words,
            likes: item.likes,
            comments_link: item.comments_link,
            seen: item.seen,
            saved: item.saved,
            read_later: item.read_later,
            block_title: block_title.to_string(),
            feed_title: feed_title.to_string(),
        }
    }

    /// Formats the authors as a byline ("A", "A and B", "A, B, and C").
    #[must_use]
    pub fn byline(&self) -> String {
        match self.authors.as_slice() {
            [] => String::new(),
            [one] => one.clone(),
            [first, second] => format!("{first} and {second}"),
            [rest @ .., last] => format!("{}, and {last}", rest.join(", ")),
        }
    }
}
