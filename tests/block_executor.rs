//! Integration tests for block graph execution and feed rendering.

// Integration tests use unwrap and panics for brevity
#![allow(clippy::unwrap_used, clippy::panic, clippy::expect_used)]

use async_trait::async_trait;
use feedsift::blocks::{collect_content, collect_items, content_from_chunks, digesters};
use feedsift::models::{ItemField, ItemQuery};
use feedsift::storage::FilterResult;
use feedsift::{
    BlockDefinition, BlockExecutor, BlockOutput, BlockQuery, Catalog, CatalogRepository,
    Condition, DigesterRegistry, EngineContext, Error, FeedDefinition, FeedService,
    FilterDefinition, FilterRegistry, Item, ItemId, ItemRepository, MemoryStore, NewItem,
    OrderBy, Result,
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Counts candidate fetches on top of a [`MemoryStore`].
struct CountingItems {
    inner: Arc<MemoryStore>,
    find_items: AtomicUsize,
}

#[async_trait]
impl ItemRepository for CountingItems {
    async fn find_items(&self, query: &ItemQuery) -> Result<Vec<Item>> {
        self.find_items.fetch_add(1, Ordering::SeqCst);
        self.inner.find_items(query).await
    }

    async fn find_item(&self, id: ItemId, condition: &Condition) -> Result<Option<Item>> {
        self.inner.find_item(id, condition).await
    }

    async fn record_filter_results(&self, id: ItemId, results: &[FilterResult]) -> Result<()> {
        self.inner.record_filter_results(id, results).await
    }

    async fn insert_item(&self, item: NewItem) -> Result<ItemId> {
        self.inner.insert_item(item).await
    }

    async fn get_items(&self, ids: &[ItemId]) -> Result<Vec<Item>> {
        self.inner.get_items(ids).await
    }
}

struct Fixture {
    items: Arc<CountingItems>,
    context: EngineContext,
    filter_calls: Arc<AtomicUsize>,
}

async fn fixture(blocks: Vec<BlockDefinition>, digesters: DigesterRegistry) -> Fixture {
    let store = Arc::new(MemoryStore::new());
    for n in 1..=3 {
        store
            .insert_item(NewItem::new(
                format!("https://example.com/{n}"),
                "Wire",
                format!("Story {n}"),
            ))
            .await
            .unwrap();
    }
    store
        .replace_catalog(&Catalog {
            filters: vec![FilterDefinition::new("Relevant", "Always", Value::Null)],
            blocks,
            feeds: vec![FeedDefinition {
                title: "Morning".to_string(),
                blocks: vec!["News".to_string(), "Brief".to_string()],
            }],
        })
        .await
        .unwrap();

    let filter_calls = Arc::new(AtomicUsize::new(0));
    let mut filters = FilterRegistry::new();
    {
        let filter_calls = Arc::clone(&filter_calls);
        filters.register("Always", move |_args| {
            let filter_calls = Arc::clone(&filter_calls);
            Ok(feedsift::filters::from_fn(move |_item| {
                filter_calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(true) }
            }))
        });
    }

    let items = Arc::new(CountingItems {
        inner: Arc::clone(&store),
        find_items: AtomicUsize::new(0),
    });
    let context = EngineContext::new(
        Arc::clone(&items) as Arc<dyn ItemRepository>,
        store as Arc<dyn CatalogRepository>,
        filters,
        digesters,
    );
    Fixture {
        items,
        context,
        filter_calls,
    }
}

fn news() -> BlockDefinition {
    BlockDefinition::items(
        "News",
        BlockQuery {
            condition: Condition::passed_some(["Relevant"]),
            order_by: vec![OrderBy::asc(ItemField::Id)],
            ..BlockQuery::default()
        },
    )
}

fn headlines(title: &str, inputs: &[&str]) -> BlockDefinition {
    BlockDefinition::digest(title, "Headlines", json!({ "input_blocks": inputs }))
}

const STORY_LINES: &str = "- [1] Story 1 (Wire)\n- [2] Story 2 (Wire)\n- [3] Story 3 (Wire)\n";

#[tokio::test]
async fn test_shared_dependency_runs_once() {
    let fixture = fixture(
        vec![
            news(),
            headlines("D1", &["News"]),
            headlines("D2", &["News"]),
            headlines("Top", &["D1", "D2"]),
        ],
        DigesterRegistry::with_builtins(),
    )
    .await;

    let mut executor = BlockExecutor::new(fixture.context.clone(), "Morning");
    let top = executor.execute("Top").await.unwrap();
    let text = collect_content(top.content_stream().unwrap()).await.unwrap();

    assert_eq!(text, format!("{STORY_LINES}\n\n{STORY_LINES}\n\n"));
    // One productive round and one empty round, for both digests together.
    assert_eq!(fixture.items.find_items.load(Ordering::SeqCst), 2);
    assert_eq!(fixture.filter_calls.load(Ordering::SeqCst), 3);
    for title in ["News", "D1", "D2", "Top"] {
        assert!(executor.is_cached(title), "{title} should be memoized");
    }
}

#[tokio::test]
async fn test_missing_digester_does_not_execute_inputs() {
    let fixture = fixture(
        vec![
            news(),
            BlockDefinition::digest("Brief", "Nope", json!({ "input_blocks": ["News"] })),
        ],
        DigesterRegistry::with_builtins(),
    )
    .await;

    let mut executor = BlockExecutor::new(fixture.context.clone(), "Morning");
    let err = executor.execute("Brief").await.unwrap_err();
    match err {
        Error::MissingImplementation {
            block,
            kind,
            implementation,
        } => {
            assert_eq!(block, "Brief");
            assert_eq!(kind, "digester");
            assert_eq!(implementation, "Nope");
        },
        other => panic!("unexpected error: {other}"),
    }
    assert!(!executor.is_cached("News"));
    assert!(!executor.is_cached("Brief"));
}

#[tokio::test]
async fn test_digest_block_without_inputs_is_invalid() {
    let fixture = fixture(
        vec![news(), BlockDefinition::digest("Brief", "Headlines", json!({}))],
        DigesterRegistry::with_builtins(),
    )
    .await;

    let mut executor = BlockExecutor::new(fixture.context.clone(), "Morning");
    let err = executor.execute("Brief").await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(ref message) if message.contains("'Brief'")));
}

#[tokio::test]
async fn test_failed_digest_is_not_cached() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let mut registry = DigesterRegistry::new();
    {
        let attempts = Arc::clone(&attempts);
        registry.register("Flaky", move |_args| {
            let attempts = Arc::clone(&attempts);
            Ok(digesters::from_fn(move |_inputs: Vec<BlockOutput>| {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt == 0 {
                        Err(Error::OperationFailed {
                            operation: "summarize".to_string(),
                            cause: "rate limited".to_string(),
                        })
                    } else {
                        Ok(content_from_chunks(["recovered"]))
                    }
                }
            }))
        });
    }
    let fixture = fixture(
        vec![
            news(),
            BlockDefinition::digest("Brief", "Flaky", json!({ "input_blocks": ["News"] })),
        ],
        registry,
    )
    .await;

    let mut executor = BlockExecutor::new(fixture.context.clone(), "Morning");
    assert!(executor.execute("Brief").await.is_err());
    assert!(!executor.is_cached("Brief"));
    assert!(executor.is_cached("News"));

    let output = executor.execute("Brief").await.unwrap();
    assert_eq!(
        collect_content(output.content_stream().unwrap()).await.unwrap(),
        "recovered"
    );
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_render_feed_end_to_end() {
    let fixture = fixture(
        vec![news(), headlines("Brief", &["News"])],
        DigesterRegistry::with_builtins(),
    )
    .await;

    let rendered = FeedService::new(fixture.context.clone())
        .render("Morning")
        .await
        .unwrap();
    let titles: Vec<&str> = rendered.iter().map(|block| block.title.as_str()).collect();
    assert_eq!(titles, vec!["News", "Brief"]);

    let items = collect_items(rendered[0].output.item_stream().unwrap())
        .await
        .unwrap();
    let ids: Vec<i64> = items.iter().map(|item| item.id.get()).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert!(items.iter().all(|item| item.block_title == "News"));
    assert!(items.iter().all(|item| item.feed_title == "Morning"));

    let text = collect_content(rendered[1].output.content_stream().unwrap())
        .await
        .unwrap();
    assert_eq!(text, STORY_LINES);
    assert_eq!(fixture.filter_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_render_unknown_feed() {
    let fixture = fixture(vec![news()], DigesterRegistry::with_builtins()).await;
    let err = FeedService::new(fixture.context.clone())
        .render("Evening")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound { kind: "feed", ref name } if name == "Evening"));
}
