//! Row conversion for stored items.
//!
//! [`load_items`] selects item rows for a compiled condition and attaches
//! author lists and current filter verdicts with two batched lookups, so a
//! page of items costs three statements regardless of its size.

use super::connection::operation_failed;
use super::sql::{WhereClause, placeholders};
use crate::Result;
use crate::models::{Item, ItemId};
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{Connection, Row, params_from_iter};
use std::collections::{BTreeSet, HashMap};

/// Columns selected for every item row, in [`ItemRow::from_row`] order.
pub const ITEM_COLUMNS: &str = "items.id, items.link, items.item_type, items.source_name, \
     items.title, items.description, items.content, items.date_published, items.date_added, \
     items.image_link, items.number_of_words, items.likes, items.comments_link, items.seen, \
     items.saved, items.read_later";

/// Raw item columns.
#[derive(Debug)]
pub struct ItemRow {
    id: i64,
    link: String,
    item_type: Option<String>,
    source_name: String,
    title: String,
    description: Option<String>,
    content: Option<String>,
    date_published: Option<i64>,
    date_added: i64,
    image_link: Option<String>,
    number_of_words: Option<i64>,
    likes: Option<i64>,
    comments_link: Option<String>,
    seen: bool,
    saved: bool,
    read_later: bool,
}

impl ItemRow {
    /// Reads a row selected with [`ITEM_COLUMNS`].
    ///
    /// # Errors
    ///
    /// Returns the `rusqlite` error for a column of the wrong type.
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            link: row.get(1)?,
            item_type: row.get(2)?,
            source_name: row.get(3)?,
            title: row.get(4)?,
            description: row.get(5)?,
            content: row.get(6)?,
            date_published: row.get(7)?,
            date_added: row.get(8)?,
            image_link: row.get(9)?,
            number_of_words: row.get(10)?,
            likes: row.get(11)?,
            comments_link: row.get(12)?,
            seen: row.get(13)?,
            saved: row.get(14)?,
            read_later: row.get(15)?,
        })
    }

    fn into_item(self) -> Item {
        Item {
            id: ItemId::new(self.id),
            link: self.link,
            item_type: self.item_type,
            source_name: self.source_name,
            title: self.title,
            description: self.description,
            content: self.content,
            authors: Vec::new(),
            date_published: self.date_published.and_then(from_timestamp),
            date_added: from_timestamp(self.date_added).unwrap_or_default(),
            image_link: self.image_link,
            number_of_words: self.number_of_words,
            likes: self.likes,
            comments_link: self.comments_link,
            seen: self.seen,
            saved: self.saved,
            read_later: self.read_later,
            filters_checked: BTreeSet::new(),
            filters_passed: BTreeSet::new(),
        }
    }
}

fn from_timestamp(seconds: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(seconds, 0)
}

/// Selects items matching `clause`, ordered by `order` and optionally limited.
///
/// # Errors
///
/// Returns [`crate::Error::OperationFailed`] if a statement fails.
pub fn load_items(
    conn: &Connection,
    clause: &WhereClause,
    order: &str,
    limit: Option<usize>,
) -> Result<Vec<Item>> {
    let mut sql = format!(
        "SELECT {ITEM_COLUMNS} FROM items WHERE {} {order}",
        clause.sql
    );
    let mut params = clause.params.clone();
    if let Some(limit) = limit {
        sql.push_str(" LIMIT ?");
        params.push(Value::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
    }

    let mut stmt = conn
        .prepare_cached(&sql)
        .map_err(operation_failed("prepare_find_items"))?;
    let rows = stmt
        .query_map(params_from_iter(params.iter()), ItemRow::from_row)
        .map_err(operation_failed("find_items"))?;

    let mut items = Vec::new();
    for row in rows {
        items.push(row.map_err(operation_failed("find_items_row"))?.into_item());
    }
    attach_relations(conn, &mut items)?;
    Ok(items)
}

/// Fills in authors and current filter verdicts.
fn attach_relations(conn: &Connection, items: &mut [Item]) -> Result<()> {
    if items.is_empty() {
        return Ok(());
    }
    let index: HashMap<i64, usize> = items
        .iter()
        .enumerate()
        .map(|(i, item)| (item.id.get(), i))
        .collect();
    let ids: Vec<i64> = items.iter().map(|item| item.id.get()).collect();
    let marks = placeholders(ids.len());

    let mut stmt = conn
        .prepare(&format!(
            "SELECT item_id, name FROM item_authors WHERE item_id IN ({marks})
             ORDER BY item_id, position"
        ))
        .map_err(operation_failed("prepare_load_authors"))?;
    let authors = stmt
        .query_map(params_from_iter(ids.iter()), |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })
        .map_err(operation_failed("load_authors"))?;
    for author in authors {
        let (item_id, name) = author.map_err(operation_failed("load_authors_row"))?;
        if let Some(&i) = index.get(&item_id) {
            items[i].authors.push(name);
        }
    }

    let mut stmt = conn
        .prepare(&format!(
            "SELECT v.item_id, v.filter_title, v.passed FROM item_filters v
             JOIN filters f ON f.title = v.filter_title AND f.fingerprint = v.fingerprint
             WHERE v.item_id IN ({marks})"
        ))
        .map_err(operation_failed("prepare_load_verdicts"))?;
    let verdicts = stmt
        .query_map(params_from_iter(ids.iter()), |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, bool>(2)?,
            ))
        })
        .map_err(operation_failed("load_verdicts"))?;
    for verdict in verdicts {
        let (item_id, title, passed) = verdict.map_err(operation_failed("load_verdicts_row"))?;
        if let Some(&i) = index.get(&item_id) {
            if passed {
                items[i].filters_passed.insert(title.clone());
            }
            items[i].filters_checked.insert(title);
        }
    }
    Ok(())
}
