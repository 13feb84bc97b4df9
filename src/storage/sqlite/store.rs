//! `SQLite`-backed item and catalog store.

use super::connection::{acquire_lock, configure_connection, create_schema, operation_failed};
use super::item_row::load_items;
use super::metrics::record_operation_metrics;
use super::sql::{JSON_LIST, compile_condition, json_list, order_clause, placeholders};
use crate::models::{
    BlockDefinition, BlockKind, BlockQuery, Catalog, Condition, FeedDefinition,
    FilterDefinition, Item, ItemId, ItemQuery, NewItem, Scalar,
};
use crate::storage::traits::{CatalogRepository, FilterResult, ItemRepository};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Instant;
use tracing::instrument;

const BACKEND: &str = "sqlite";

/// `SQLite` store implementing both repository traits.
///
/// # Concurrency Model
///
/// Uses a `Mutex<Connection>` for thread-safe access. Statements run inline
/// on the calling task and the lock is released before the method returns,
/// so no guard is ever held across an `.await`. WAL mode and `busy_timeout`
/// let several processes share one database file.
pub struct SqliteStore {
    /// Protected by Mutex because `rusqlite::Connection` is not `Sync`.
    conn: Mutex<Connection>,
    /// Path to the database (None for in-memory).
    db_path: Option<PathBuf>,
}

impl SqliteStore {
    /// Opens (creating if needed) a store at `db_path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn new(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| Error::OperationFailed {
                operation: "create_data_dir".to_string(),
                cause: e.to_string(),
            })?;
        }
        let conn = Connection::open(&db_path).map_err(operation_failed("open_sqlite"))?;
        Self::initialize(conn, Some(db_path))
    }

    /// Creates an in-memory store (useful for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(operation_failed("open_sqlite_in_memory"))?;
        Self::initialize(conn, None)
    }

    fn initialize(conn: Connection, db_path: Option<PathBuf>) -> Result<Self> {
        configure_connection(&conn)?;
        create_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            db_path,
        })
    }

    /// Returns the database path (None for in-memory).
    #[must_use]
    pub const fn db_path(&self) -> Option<&PathBuf> {
        self.db_path.as_ref()
    }

    /// Runs `operation` under the connection lock and records its metrics.
    fn with_conn<T>(
        &self,
        name: &'static str,
        operation: impl FnOnce(&mut Connection) -> Result<T>,
    ) -> Result<T> {
        let start = Instant::now();
        let result = {
            let mut conn = acquire_lock(&self.conn);
            operation(&mut conn)
        };
        let status = if result.is_ok() { "success" } else { "error" };
        record_operation_metrics(BACKEND, name, start, status);
        result
    }
}

#[async_trait]
impl ItemRepository for SqliteStore {
    #[instrument(skip(self, query), fields(operation = "find_items", backend = BACKEND, take = ?query.take))]
    async fn find_items(&self, query: &ItemQuery) -> Result<Vec<Item>> {
        let clause = compile_condition(&query.condition)?;
        let order = order_clause(&query.order_by);
        self.with_conn("find_items", |conn| {
            load_items(conn, &clause, &order, query.take)
        })
    }

    #[instrument(skip(self, condition), fields(operation = "find_item", backend = BACKEND, item.id = %id))]
    async fn find_item(&self, id: ItemId, condition: &Condition) -> Result<Option<Item>> {
        let mut clause = compile_condition(condition)?;
        clause.sql = format!("items.id = ? AND {}", clause.sql);
        clause.params.insert(0, rusqlite::types::Value::Integer(id.get()));
        self.with_conn("find_item", |conn| {
            Ok(load_items(conn, &clause, "", Some(1))?.into_iter().next())
        })
    }

    #[instrument(skip(self, results), fields(operation = "record_filter_results", backend = BACKEND, item.id = %id, count = results.len()))]
    async fn record_filter_results(&self, id: ItemId, results: &[FilterResult]) -> Result<()> {
        self.with_conn("record_filter_results", |conn| {
            let tx = conn
                .transaction()
                .map_err(operation_failed("begin_transaction"))?;
            let exists = tx
                .query_row("SELECT 1 FROM items WHERE id = ?1", params![id.get()], |_| Ok(()))
                .optional()
                .map_err(operation_failed("check_item"))?
                .is_some();
            if !exists {
                return Err(Error::NotFound {
                    kind: "item",
                    name: id.to_string(),
                });
            }
            {
                let mut stmt = tx
                    .prepare_cached(
                        "INSERT INTO item_filters (item_id, filter_title, fingerprint, passed)
                         VALUES (?1, ?2, ?3, ?4)
                         ON CONFLICT(item_id, filter_title, fingerprint)
                         DO UPDATE SET passed = MAX(passed, excluded.passed)",
                    )
                    .map_err(operation_failed("prepare_record_filter_results"))?;
                for verdict in results {
                    stmt.execute(params![
                        id.get(),
                        verdict.title,
                        verdict.fingerprint,
                        verdict.passed
                    ])
                    .map_err(operation_failed("record_filter_results"))?;
                }
            }
            tx.commit().map_err(operation_failed("commit_transaction"))
        })
    }

    #[instrument(skip(self, item), fields(operation = "insert_item", backend = BACKEND, item.link = %item.link))]
    async fn insert_item(&self, item: NewItem) -> Result<ItemId> {
        if item.link.is_empty() {
            return Err(Error::InvalidInput("item link must not be empty".to_string()));
        }
        self.with_conn("insert_item", |conn| {
            let tx = conn
                .transaction()
                .map_err(operation_failed("begin_transaction"))?;
            let id: i64 = tx
                .query_row(
                    "INSERT INTO items (link, item_type, source_name, title, description, content,
                        date_published, date_added, image_link, number_of_words, likes, comments_link)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                     ON CONFLICT(link) DO UPDATE SET
                        item_type = excluded.item_type,
                        source_name = excluded.source_name,
                        title = excluded.title,
                        description = excluded.description,
                        content = excluded.content,
                        date_published = excluded.date_published,
                        image_link = excluded.image_link,
                        number_of_words = excluded.number_of_words,
                        likes = excluded.likes,
                        comments_link = excluded.comments_link
                     RETURNING id",
                    params![
                        item.link,
                        item.item_type,
                        item.source_name,
                        item.title,
                        item.description,
                        item.content,
                        item.date_published.map(|d| d.timestamp()),
                        item.date_added.unwrap_or_else(Utc::now).timestamp(),
                        item.image_link,
                        item.number_of_words,
                        item.likes,
                        item.comments_link,
                    ],
                    |row| row.get(0),
                )
                .map_err(operation_failed("upsert_item"))?;

            tx.execute("DELETE FROM item_authors WHERE item_id = ?1", params![id])
                .map_err(operation_failed("clear_authors"))?;
            for (position, name) in item.authors.iter().enumerate() {
                tx.execute(
                    "INSERT INTO item_authors (item_id, position, name) VALUES (?1, ?2, ?3)",
                    params![id, i64::try_from(position).unwrap_or(i64::MAX), name],
                )
                .map_err(operation_failed("insert_author"))?;
            }
            tx.commit().map_err(operation_failed("commit_transaction"))?;
            Ok(ItemId::new(id))
        })
    }

    #[instrument(skip(self, ids), fields(operation = "get_items", backend = BACKEND, count = ids.len()))]
    async fn get_items(&self, ids: &[ItemId]) -> Result<Vec<Item>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let clause = super::sql::WhereClause {
            sql: format!("items.id IN {JSON_LIST}"),
            params: vec![json_list(ids.iter().map(|id| Scalar::Integer(id.get())))],
        };
        let mut found = self.with_conn("get_items", |conn| load_items(conn, &clause, "", None))?;

        // Return items in the same order as requested IDs
        Ok(ids
            .iter()
            .filter_map(|id| {
                found
                    .iter()
                    .position(|item| item.id == *id)
                    .map(|i| found.swap_remove(i))
            })
            .collect())
    }
}

#[async_trait]
impl CatalogRepository for SqliteStore {
    async fn get_filters(&self, titles: &[String]) -> Result<Vec<FilterDefinition>> {
        if titles.is_empty() {
            return Ok(Vec::new());
        }
        let mut found = self.with_conn("get_filters", |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT title, implementation, args FROM filters WHERE title IN ({})",
                    placeholders(titles.len())
                ))
                .map_err(operation_failed("prepare_get_filters"))?;
            let rows = stmt
                .query_map(params_from_iter(titles.iter()), |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })
                .map_err(operation_failed("get_filters"))?;
            let mut filters = Vec::new();
            for row in rows {
                let (title, implementation, args) = row.map_err(operation_failed("get_filters_row"))?;
                filters.push(FilterDefinition {
                    title,
                    implementation,
                    args: parse_json("filter args", &args)?,
                });
            }
            Ok(filters)
        })?;

        Ok(titles
            .iter()
            .filter_map(|title| {
                found
                    .iter()
                    .position(|filter| &filter.title == title)
                    .map(|i| found.swap_remove(i))
            })
            .collect())
    }

    async fn get_block(&self, title: &str) -> Result<Option<BlockDefinition>> {
        let row = self.with_conn("get_block", |conn| {
            conn.query_row(
                "SELECT implementation, definition FROM blocks WHERE title = ?1",
                params![title],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()
            .map_err(operation_failed("get_block"))
        })?;

        row.map(|(implementation, definition)| {
            let kind = if implementation == "items" {
                BlockKind::Items(parse_json::<BlockQuery>("block query", &definition)?)
            } else {
                BlockKind::Digest {
                    implementation,
                    args: parse_json("block args", &definition)?,
                }
            };
            Ok(BlockDefinition {
                title: title.to_string(),
                kind,
            })
        })
        .transpose()
    }

    async fn get_feed(&self, title: &str) -> Result<Option<FeedDefinition>> {
        Ok(self
            .list_feeds()
            .await?
            .into_iter()
            .find(|feed| feed.title == title))
    }

    async fn list_feeds(&self) -> Result<Vec<FeedDefinition>> {
        self.with_conn("list_feeds", |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT f.title, b.block_title FROM feeds f
                     LEFT JOIN feed_blocks b ON b.feed_title = f.title
                     ORDER BY f.position, b.position",
                )
                .map_err(operation_failed("prepare_list_feeds"))?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
                })
                .map_err(operation_failed("list_feeds"))?;

            let mut feeds: Vec<FeedDefinition> = Vec::new();
            for row in rows {
                let (title, block) = row.map_err(operation_failed("list_feeds_row"))?;
                if feeds.last().is_none_or(|feed| feed.title != title) {
                    feeds.push(FeedDefinition {
                        title,
                        blocks: Vec::new(),
                    });
                }
                if let (Some(feed), Some(block)) = (feeds.last_mut(), block) {
                    feed.blocks.push(block);
                }
            }
            Ok(feeds)
        })
    }

    #[instrument(skip(self, catalog), fields(operation = "replace_catalog", backend = BACKEND, filters = catalog.filters.len(), blocks = catalog.blocks.len()))]
    async fn replace_catalog(&self, catalog: &Catalog) -> Result<()> {
        self.with_conn("replace_catalog", |conn| {
            let tx = conn
                .transaction()
                .map_err(operation_failed("begin_transaction"))?;
            tx.execute_batch("DELETE FROM feed_blocks; DELETE FROM feeds; DELETE FROM blocks; DELETE FROM filters;")
                .map_err(operation_failed("clear_catalog"))?;

            for filter in &catalog.filters {
                tx.execute(
                    "INSERT INTO filters (title, implementation, args, fingerprint) VALUES (?1, ?2, ?3, ?4)",
                    params![
                        filter.title,
                        filter.implementation,
                        filter.args.to_string(),
                        filter.fingerprint()
                    ],
                )
                .map_err(operation_failed("insert_filter"))?;
            }

            for block in &catalog.blocks {
                let definition = match &block.kind {
                    BlockKind::Items(query) => to_json("block query", query)?,
                    BlockKind::Digest { args, .. } => args.to_string(),
                };
                tx.execute(
                    "INSERT INTO blocks (title, implementation, definition) VALUES (?1, ?2, ?3)",
                    params![block.title, block.implementation(), definition],
                )
                .map_err(operation_failed("insert_block"))?;
            }

            for (position, feed) in catalog.feeds.iter().enumerate() {
                tx.execute(
                    "INSERT INTO feeds (title, position) VALUES (?1, ?2)",
                    params![feed.title, i64::try_from(position).unwrap_or(i64::MAX)],
                )
                .map_err(operation_failed("insert_feed"))?;
                for (slot, block) in feed.blocks.iter().enumerate() {
                    tx.execute(
                        "INSERT INTO feed_blocks (feed_title, position, block_title) VALUES (?1, ?2, ?3)",
                        params![feed.title, i64::try_from(slot).unwrap_or(i64::MAX), block],
                    )
                    .map_err(operation_failed("insert_feed_block"))?;
                }
            }
            tx.commit().map_err(operation_failed("commit_transaction"))
        })
    }
}

fn parse_json<T: serde::de::DeserializeOwned>(what: &str, text: &str) -> Result<T> {
    serde_json::from_str(text).map_err(|e| Error::OperationFailed {
        operation: format!("parse {what}"),
        cause: e.to_string(),
    })
}

fn to_json<T: serde::Serialize>(what: &str, value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| Error::OperationFailed {
        operation: format!("serialize {what}"),
        cause: e.to_string(),
    })
}
