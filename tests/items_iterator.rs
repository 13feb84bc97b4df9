//! Integration tests for incremental filter evaluation.
//!
//! Most tests drive an [`ItemsIterator`] over a [`MemoryStore`] with a
//! scripted filter registered as `"X"`, recording which items the
//! filter was invoked for.

// Integration tests use unwrap and panics for brevity
#![allow(clippy::unwrap_used, clippy::panic, clippy::expect_used)]

use async_trait::async_trait;
use feedsift::models::{FieldOp, ItemField, ItemQuery, OrderBy};
use feedsift::storage::FilterResult;
use feedsift::{
    BlockQuery, Catalog, CatalogRepository, Condition, DigesterRegistry, EngineContext,
    EngineSettings, Error, FilterDefinition, FilterRegistry, Item, ItemFilter, ItemId,
    ItemRepository, ItemsIterator, MemoryStore, NewItem, Result, SqliteStore,
};
use futures::StreamExt;
use proptest::prelude::*;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What the scripted filter does for one item.
#[derive(Debug, Clone, Copy)]
enum Verdict {
    Pass,
    Reject,
    Fail,
    Hang,
    Panic,
    Delay(u64, bool),
}

type Script = Arc<dyn Fn(&Item) -> Verdict + Send + Sync>;

struct Scripted {
    calls: Arc<Mutex<Vec<i64>>>,
    script: Script,
}

#[async_trait]
impl ItemFilter for Scripted {
    async fn evaluate(&self, item: &Item) -> Result<bool> {
        self.calls.lock().unwrap().push(item.id.get());
        match (self.script)(item) {
            Verdict::Pass => Ok(true),
            Verdict::Reject => Ok(false),
            Verdict::Fail => Err(Error::OperationFailed {
                operation: "classify".to_string(),
                cause: "model unavailable".to_string(),
            }),
            Verdict::Hang => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(true)
            },
            Verdict::Panic => panic!("scripted filter panicked"),
            Verdict::Delay(ms, passed) => {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(passed)
            },
        }
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    context: EngineContext,
    calls: Arc<Mutex<Vec<i64>>>,
    constructed: Arc<AtomicUsize>,
}

impl Harness {
    async fn new(script: impl Fn(&Item) -> Verdict + Send + Sync + 'static) -> Self {
        Self::with_settings(script, EngineSettings::default()).await
    }

    async fn with_settings(
        script: impl Fn(&Item) -> Verdict + Send + Sync + 'static,
        settings: EngineSettings,
    ) -> Self {
        let store = Arc::new(MemoryStore::new());
        store
            .replace_catalog(&Catalog {
                filters: vec![definition()],
                ..Catalog::default()
            })
            .await
            .unwrap();

        let calls = Arc::new(Mutex::new(Vec::new()));
        let constructed = Arc::new(AtomicUsize::new(0));
        let script: Script = Arc::new(script);
        let mut filters = FilterRegistry::new();
        {
            let calls = Arc::clone(&calls);
            let constructed = Arc::clone(&constructed);
            filters.register("Scripted", move |_args| {
                constructed.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(Scripted {
                    calls: Arc::clone(&calls),
                    script: Arc::clone(&script),
                }) as Arc<dyn ItemFilter>)
            });
        }
        let context = EngineContext::from_store(Arc::clone(&store), filters, DigesterRegistry::new())
            .with_settings(settings);

        Self {
            store,
            context,
            calls,
            constructed,
        }
    }

    async fn seed(&self, sources: &[&str]) {
        for (n, source) in sources.iter().enumerate() {
            self.store
                .insert_item(NewItem::new(
                    format!("https://example.com/{n}"),
                    *source,
                    format!("Item {}", n + 1),
                ))
                .await
                .unwrap();
        }
    }

    async fn record(&self, id: i64, passed: bool) {
        self.store
            .record_filter_results(
                ItemId::new(id),
                &[FilterResult {
                    title: "X".to_string(),
                    fingerprint: definition().fingerprint(),
                    passed,
                }],
            )
            .await
            .unwrap();
    }

    async fn run(&self, query: &BlockQuery) -> Vec<i64> {
        ItemsIterator::new(&self.context, "Block", "Feed", query)
            .await
            .unwrap()
            .into_stream()
            .map(|item| item.unwrap().id.get())
            .collect()
            .await
    }

    fn calls(&self) -> Vec<i64> {
        let mut calls = self.calls.lock().unwrap().clone();
        calls.sort_unstable();
        calls
    }

    async fn checked(&self, id: i64) -> bool {
        self.store
            .get_item(ItemId::new(id))
            .await
            .unwrap()
            .unwrap()
            .filters_checked
            .contains("X")
    }
}

fn definition() -> FilterDefinition {
    FilterDefinition::new("X", "Scripted", Value::Null)
}

fn query(condition: Condition) -> BlockQuery {
    BlockQuery {
        condition,
        order_by: vec![OrderBy::asc(ItemField::Id)],
        ..BlockQuery::default()
    }
}

#[tokio::test]
async fn test_limit_with_two_unresolved_items() {
    let harness = Harness::with_settings(
        |item| match item.id.get() {
            4 => Verdict::Pass,
            _ => Verdict::Reject,
        },
        EngineSettings::default().with_batch_size(20),
    )
    .await;

    // 25 items over three sources; items 3, 6, 9, ... come from "C".
    let sources: Vec<&str> = (1..=25)
        .map(|id| match id % 3 {
            0 => "C",
            1 => "A",
            _ => "B",
        })
        .collect();
    harness.seed(&sources).await;
    for id in (1..=25).filter(|id| *id != 4 && *id != 5) {
        harness.record(id, id <= 2).await;
    }

    let mut block = query(Condition::all(vec![
        Condition::field(ItemField::SourceName, FieldOp::In, vec!["A", "B"]),
        Condition::passed_none(["X"]),
    ]));
    block.take = Some(2);

    assert_eq!(harness.run(&block).await, vec![5, 7]);
    assert_eq!(harness.calls(), vec![4, 5]);
    assert!(harness.checked(4).await && harness.checked(5).await);
}

#[tokio::test]
async fn test_empty_repository() {
    let harness = Harness::new(|_| Verdict::Pass).await;
    let items = harness.run(&query(Condition::passed_some(["X"]))).await;
    assert!(items.is_empty());
    assert!(harness.calls().is_empty());
}

#[tokio::test]
async fn test_filter_free_query_is_plain_retrieval() {
    let harness = Harness::with_settings(
        |_| Verdict::Pass,
        EngineSettings::default().with_batch_size(3),
    )
    .await;
    harness.seed(&["A", "B", "A", "B", "A", "B", "A"]).await;

    let block = BlockQuery {
        condition: Condition::field(ItemField::SourceName, FieldOp::Eq, "A"),
        order_by: vec![OrderBy::desc(ItemField::Id)],
        ..BlockQuery::default()
    };
    assert_eq!(harness.run(&block).await, vec![7, 5, 3, 1]);
    assert_eq!(harness.constructed.load(Ordering::SeqCst), 0);
    assert!(harness.calls().is_empty());
}

#[tokio::test]
async fn test_failures_and_timeouts_are_not_recorded() {
    let harness = Harness::with_settings(
        |item| match item.id.get() {
            1 => Verdict::Fail,
            2 => Verdict::Hang,
            3 => Verdict::Panic,
            _ => Verdict::Pass,
        },
        EngineSettings::default().with_filter_timeout(Duration::from_millis(50)),
    )
    .await;
    harness.seed(&["A", "A", "A", "A"]).await;

    let block = query(Condition::passed_some(["X"]));
    assert_eq!(harness.run(&block).await, vec![4]);
    for id in 1..=3 {
        assert!(!harness.checked(id).await, "item {id} must stay unchecked");
    }
    assert!(harness.checked(4).await);

    // A later iterator retries the unresolved items only.
    assert_eq!(harness.run(&block).await, vec![4]);
    assert_eq!(harness.calls(), vec![1, 1, 2, 2, 3, 3, 4]);
}

#[tokio::test]
async fn test_slow_filters_do_not_reorder_output() {
    let harness = Harness::new(|item| {
        let delay = 80 - 20 * u64::try_from(item.id.get()).unwrap();
        Verdict::Delay(delay, true)
    })
    .await;
    harness.seed(&["A", "A", "A", "A"]).await;

    let items = harness.run(&query(Condition::passed_some(["X"]))).await;
    assert_eq!(items, vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn test_dropping_stream_stops_batches_and_keeps_verdicts() {
    let mut settings = EngineSettings::default().with_batch_size(5);
    settings.high_water_mark = 1;
    let harness = Harness::with_settings(|_| Verdict::Delay(20, true), settings).await;
    harness.seed(&["A"; 10]).await;

    let iterator = ItemsIterator::new(
        &harness.context,
        "Block",
        "Feed",
        &query(Condition::passed_some(["X"])),
    )
    .await
    .unwrap();
    let mut stream = iterator.into_stream();
    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first.id, ItemId::new(1));
    drop(stream);

    tokio::time::sleep(Duration::from_millis(200)).await;
    for id in 1..=5 {
        assert!(harness.checked(id).await, "item {id} was evaluated");
    }
    for id in 6..=10 {
        assert!(!harness.checked(id).await, "item {id} belongs to an unfetched batch");
    }
    assert_eq!(harness.calls(), vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn test_stall_threshold_ends_sequence_early() {
    let harness = Harness::with_settings(
        |_| Verdict::Reject,
        EngineSettings::default().with_batch_size(5),
    )
    .await;
    harness.seed(&["A"; 20]).await;

    let mut block = query(Condition::passed_some(["X"]));
    block.stall_threshold = Some(5);
    assert!(harness.run(&block).await.is_empty());
    assert_eq!(harness.calls(), vec![1, 2, 3, 4, 5]);
    assert!(!harness.checked(6).await);

    // Without the threshold every candidate is explored.
    block.stall_threshold = None;
    assert!(harness.run(&block).await.is_empty());
    assert_eq!(harness.calls().len(), 20);
}

#[tokio::test]
async fn test_stall_counter_resets_on_yield() {
    let harness = Harness::with_settings(
        |item| {
            if item.id.get() % 4 == 0 {
                Verdict::Pass
            } else {
                Verdict::Reject
            }
        },
        EngineSettings::default().with_batch_size(4),
    )
    .await;
    harness.seed(&["A"; 12]).await;

    let mut block = query(Condition::passed_some(["X"]));
    block.stall_threshold = Some(4);
    assert_eq!(harness.run(&block).await, vec![4, 8, 12]);
}

#[tokio::test]
async fn test_each_pair_is_evaluated_at_most_once() {
    let harness = Harness::with_settings(
        |item| {
            if item.id.get() % 2 == 0 {
                Verdict::Pass
            } else {
                Verdict::Reject
            }
        },
        EngineSettings::default().with_batch_size(3),
    )
    .await;
    harness.seed(&["A"; 9]).await;

    let block = query(Condition::passed_some(["X"]));
    let first = harness.run(&block).await;
    let calls_after_first = harness.calls();
    let second = harness.run(&block).await;

    assert_eq!(first, vec![2, 4, 6, 8]);
    assert_eq!(first, second);
    assert_eq!(calls_after_first, (1..=9).collect::<Vec<_>>());
    assert_eq!(harness.calls(), calls_after_first);
}

#[tokio::test]
async fn test_changed_filter_arguments_invalidate_verdicts() {
    let harness = Harness::new(|_| Verdict::Pass).await;
    harness.seed(&["A", "A"]).await;
    let block = query(Condition::passed_some(["X"]));
    assert_eq!(harness.run(&block).await, vec![1, 2]);

    harness
        .store
        .replace_catalog(&Catalog {
            filters: vec![FilterDefinition::new(
                "X",
                "Scripted",
                serde_json::json!({ "threshold": 0.9 }),
            )],
            ..Catalog::default()
        })
        .await
        .unwrap();
    assert_eq!(harness.run(&block).await, vec![1, 2]);
    assert_eq!(harness.calls(), vec![1, 1, 2, 2]);
}

#[tokio::test]
async fn test_next_batch_never_returns_empty_before_exhaustion() {
    let harness = Harness::with_settings(
        |item| {
            if item.id.get() == 9 {
                Verdict::Pass
            } else {
                Verdict::Reject
            }
        },
        EngineSettings::default().with_batch_size(2),
    )
    .await;
    harness.seed(&["A"; 10]).await;

    let mut iterator = ItemsIterator::new(
        &harness.context,
        "Block",
        "Feed",
        &query(Condition::passed_some(["X"])),
    )
    .await
    .unwrap();
    let batch = iterator.next_batch().await.unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].id, ItemId::new(9));
    assert_eq!(batch[0].block_title, "Block");
    assert!(!iterator.is_exhausted());

    assert!(iterator.next_batch().await.unwrap().is_empty());
    assert!(iterator.is_exhausted());
}

/// Delegates to a [`MemoryStore`], failing selected calls.
struct Unreliable {
    inner: Arc<MemoryStore>,
    find_calls: AtomicUsize,
    /// 1-based `find_items` call that fails.
    fail_find_call: Option<usize>,
    /// Item whose verdicts cannot be written.
    fail_record_for: Option<i64>,
}

impl Unreliable {
    fn new(inner: &Arc<MemoryStore>) -> Self {
        Self {
            inner: Arc::clone(inner),
            find_calls: AtomicUsize::new(0),
            fail_find_call: None,
            fail_record_for: None,
        }
    }

    fn offline(operation: &str) -> Error {
        Error::OperationFailed {
            operation: operation.to_string(),
            cause: "store offline".to_string(),
        }
    }
}

#[async_trait]
impl ItemRepository for Unreliable {
    async fn find_items(&self, query: &ItemQuery) -> Result<Vec<Item>> {
        let call = self.find_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_find_call == Some(call) {
            return Err(Self::offline("find_items"));
        }
        self.inner.find_items(query).await
    }

    async fn find_item(&self, id: ItemId, condition: &Condition) -> Result<Option<Item>> {
        self.inner.find_item(id, condition).await
    }

    async fn record_filter_results(&self, id: ItemId, results: &[FilterResult]) -> Result<()> {
        if self.fail_record_for == Some(id.get()) {
            return Err(Self::offline("record_filter_results"));
        }
        self.inner.record_filter_results(id, results).await
    }

    async fn insert_item(&self, item: NewItem) -> Result<ItemId> {
        self.inner.insert_item(item).await
    }

    async fn get_items(&self, ids: &[ItemId]) -> Result<Vec<Item>> {
        self.inner.get_items(ids).await
    }
}

impl Harness {
    /// A context reading items through `items` instead of the store.
    fn context_over(&self, items: Unreliable) -> EngineContext {
        EngineContext::new(
            Arc::new(items),
            Arc::clone(&self.store) as Arc<dyn CatalogRepository>,
            self.context.filters().clone(),
            DigesterRegistry::new(),
        )
        .with_settings(*self.context.settings())
    }
}

/// Drains a stream, rendering items as ids and errors as `"err"`.
async fn outcomes(iterator: ItemsIterator) -> Vec<String> {
    iterator
        .into_stream()
        .map(|item| match item {
            Ok(item) => item.id.to_string(),
            Err(_) => "err".to_string(),
        })
        .collect()
        .await
}

#[tokio::test]
async fn test_fetch_failure_ends_stream_after_earlier_items() {
    let harness = Harness::with_settings(
        |_| Verdict::Pass,
        EngineSettings::default().with_batch_size(2),
    )
    .await;
    harness.seed(&["A"; 5]).await;
    let block = query(Condition::passed_some(["X"]));

    let mut items = Unreliable::new(&harness.store);
    items.fail_find_call = Some(2);
    let context = harness.context_over(items);
    let iterator = ItemsIterator::new(&context, "Block", "Feed", &block)
        .await
        .unwrap();
    assert_eq!(outcomes(iterator).await, vec!["1", "2", "err"]);
    assert!(!harness.checked(3).await);

    let mut items = Unreliable::new(&harness.store);
    items.fail_find_call = Some(2);
    let context = harness.context_over(items);
    let mut iterator = ItemsIterator::new(&context, "Block", "Feed", &block)
        .await
        .unwrap();
    let first = iterator.next_batch().await.unwrap();
    assert_eq!(first.len(), 2);
    assert!(matches!(
        iterator.next_batch().await,
        Err(Error::OperationFailed { ref operation, .. }) if operation == "find_items"
    ));
    assert!(iterator.is_exhausted());
    assert!(iterator.next_batch().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_write_failure_keeps_items_resolved_before_it() {
    let harness = Harness::with_settings(
        |_| Verdict::Pass,
        EngineSettings::default().with_batch_size(3),
    )
    .await;
    harness.seed(&["A"; 4]).await;
    let block = query(Condition::passed_some(["X"]));

    let mut items = Unreliable::new(&harness.store);
    items.fail_record_for = Some(2);
    let context = harness.context_over(items);
    let iterator = ItemsIterator::new(&context, "Block", "Feed", &block)
        .await
        .unwrap();
    assert_eq!(outcomes(iterator).await, vec!["1", "err"]);
    assert!(harness.checked(1).await);
    assert!(!harness.checked(2).await);
    assert!(!harness.checked(4).await, "no round after the failing one");

    // The pull API drops the failing round, including item 1.
    let mut items = Unreliable::new(&harness.store);
    items.fail_record_for = Some(2);
    let context = harness.context_over(items);
    let mut iterator = ItemsIterator::new(&context, "Block", "Feed", &block)
        .await
        .unwrap();
    assert!(iterator.next_batch().await.is_err());
    assert!(iterator.is_exhausted());
    assert!(iterator.next_batch().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_sqlite_walk_beyond_variable_limit() {
    // More candidates than SQLite allows bound variables in one statement.
    const ITEMS: usize = 16_500;

    let store = Arc::new(SqliteStore::in_memory().unwrap());
    for n in 0..ITEMS {
        store
            .insert_item(NewItem::new(format!("https://example.com/{n}"), "A", format!("Item {n}")))
            .await
            .unwrap();
    }
    store
        .replace_catalog(&Catalog {
            filters: vec![definition()],
            ..Catalog::default()
        })
        .await
        .unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let mut filters = FilterRegistry::new();
    {
        let calls = Arc::clone(&calls);
        filters.register("Scripted", move |_args| {
            let calls = Arc::clone(&calls);
            Ok(feedsift::filters::from_fn(move |_item| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(false) }
            }))
        });
    }
    let context = EngineContext::from_store(Arc::clone(&store), filters, DigesterRegistry::new())
        .with_settings(EngineSettings::default().with_batch_size(1000));

    let iterator = ItemsIterator::new(&context, "Block", "Feed", &query(Condition::passed_none(["X"])))
        .await
        .unwrap();
    let ids: Vec<i64> = iterator
        .into_stream()
        .map(|item| item.unwrap().id.get())
        .collect()
        .await;

    assert_eq!(ids.len(), ITEMS);
    assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
    assert_eq!(calls.load(Ordering::SeqCst), ITEMS);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Property: output is ascending, duplicate-free and exactly min(take, eligible).
    #[test]
    fn prop_pagination_limits_and_uniqueness(
        count in 0usize..30,
        modulus in 1i64..5,
        take in proptest::option::of(0usize..12),
        batch in 1usize..8,
    ) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let (items, eligible) = runtime.block_on(async move {
            let harness = Harness::with_settings(
                move |item| {
                    if item.id.get() % modulus == 0 { Verdict::Pass } else { Verdict::Reject }
                },
                EngineSettings::default().with_batch_size(batch),
            )
            .await;
            harness.seed(&vec!["A"; count]).await;
            let mut block = query(Condition::passed_some(["X"]));
            block.take = take;
            let eligible = (1..=i64::try_from(count).unwrap())
                .filter(|id| id % modulus == 0)
                .count();
            (harness.run(&block).await, eligible)
        });

        let unique: HashSet<i64> = items.iter().copied().collect();
        prop_assert_eq!(unique.len(), items.len());
        prop_assert!(items.windows(2).all(|pair| pair[0] < pair[1]));
        prop_assert_eq!(items.len(), take.map_or(eligible, |take| take.min(eligible)));
    }
}
