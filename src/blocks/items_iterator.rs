//! Incremental filter evaluation over paginated item queries.
//!
//! An [`ItemsIterator`] turns one items block into a lazy, duplicate-free,
//! order-preserving sequence of [`DisplayItem`]s. Each round it fetches a
//! candidate batch from the store, evaluates the relevant filters that have
//! not been checked yet for each candidate, persists the verdicts and
//! re-tests the candidate against the block's condition.
//!
//! # Candidate query
//!
//! A round fetches items matching
//!
//! ```text
//! (condition OR (relaxed AND (unchecked f1 OR unchecked f2 ...)))
//!   AND id NOT IN processed
//! ```
//!
//! where `relaxed` treats every `filters_passed` node as satisfied. The second
//! branch keeps items that only an unevaluated filter excludes in play.
//!
//! # Evaluation
//!
//! Each unresolved candidate is resolved on its own tokio task, so evaluations
//! for one batch fan out while output stays in fetch order. Every filter call
//! runs under [`EngineSettings::filter_timeout`]; errors, timeouts and panics
//! leave the filter unchecked for that item, which is then withheld and picked
//! up again by a later iterator. A resolution task that is already running
//! when the consumer goes away still persists its verdicts.

use super::{EngineContext, EngineSettings, ItemStream};
use crate::filters::ItemFilter;
use crate::models::{BlockQuery, Condition, DisplayItem, Item, ItemId, ItemQuery, OrderBy};
use crate::storage::{FilterResult, ItemRepository};
use crate::{Error, Result};
use futures::FutureExt;
use futures::future::join_all;
use futures::stream;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

/// A filter instance bound to the definition it was built from.
#[derive(Clone)]
struct BoundFilter {
    title: String,
    fingerprint: String,
    filter: Arc<dyn ItemFilter>,
}

/// Lazily produces the items of one items block.
///
/// # Stall threshold
///
/// When the block sets `stall_threshold` to `K`, the iterator gives up once
/// `K` or more consecutive candidates produced no item, even if unexplored
/// candidates remain. Whole rounds are counted: a round that yields nothing
/// adds the number of candidates it fetched to the counter and a round that yields anything
/// resets it. This keeps a display responsive over a highly selective filter;
/// it is a heuristic and can end a sequence that still had matches.
pub struct ItemsIterator {
    block_title: String,
    feed_title: String,
    condition: Arc<Condition>,
    relaxed: Condition,
    order_by: Vec<OrderBy>,
    remaining: Option<usize>,
    stall_threshold: Option<usize>,
    settings: EngineSettings,
    filters: Vec<BoundFilter>,
    repository: Arc<dyn ItemRepository>,
    processed: Vec<ItemId>,
    stalled: usize,
    exhausted: bool,
}

/// One candidate of a round, in fetch order.
enum Pending {
    /// Already resolved and matched by the store.
    Ready(Item),
    /// Being resolved on its own task.
    Resolving(JoinHandle<Result<Option<Item>>>),
}

impl ItemsIterator {
    /// Prepares an iterator for `block_title`.
    ///
    /// Loads the definitions of the relevant filters and builds them through
    /// the registry. Nothing is fetched until the first pull.
    ///
    /// # Errors
    ///
    /// Returns an error if the condition is invalid, a relevant filter has no
    /// definition, or a definition names an unregistered implementation.
    #[instrument(skip(context, query), fields(operation = "prepare_iterator"))]
    pub async fn new(
        context: &EngineContext,
        block_title: &str,
        feed_title: &str,
        query: &BlockQuery,
    ) -> Result<Self> {
        query.condition.validate()?;

        let relevant = query.condition.relevant_filters();
        let mut filters = Vec::with_capacity(relevant.len());
        if !relevant.is_empty() {
            let definitions = context.catalog().get_filters(&relevant).await?;
            for title in &relevant {
                let definition = definitions
                    .iter()
                    .find(|definition| &definition.title == title)
                    .ok_or_else(|| {
                        Error::InvalidInput(format!(
                            "block '{block_title}' references undefined filter '{title}'"
                        ))
                    })?;
                filters.push(BoundFilter {
                    title: title.clone(),
                    fingerprint: definition.fingerprint(),
                    filter: context.filters().build(definition, block_title)?,
                });
            }
        }
        debug!(filters = filters.len(), "prepared items iterator");

        Ok(Self {
            block_title: block_title.to_string(),
            feed_title: feed_title.to_string(),
            relaxed: query.condition.relaxed(),
            condition: Arc::new(query.condition.clone()),
            order_by: query.order_by.clone(),
            remaining: query.take,
            stall_threshold: query.stall_threshold,
            settings: *context.settings(),
            filters,
            repository: Arc::clone(context.items()),
            processed: Vec::new(),
            stalled: 0,
            exhausted: query.take == Some(0),
        })
    }

    /// Returns true once no further items will be produced.
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Title of the block this iterator serves.
    #[must_use]
    pub fn block_title(&self) -> &str {
        &self.block_title
    }

    /// Performs one pull.
    ///
    /// Runs rounds until at least one item is produced or the iterator is
    /// exhausted. An empty result therefore always means end of sequence.
    ///
    /// # Errors
    ///
    /// Returns a store or task error; the iterator is exhausted afterwards and
    /// items resolved earlier in the failing round are discarded. Use
    /// [`ItemsIterator::into_stream`] to receive them before the error.
    pub async fn next_batch(&mut self) -> Result<Vec<DisplayItem>> {
        let mut items = Vec::new();
        self.pull(&mut items).await?;
        Ok(items)
    }

    /// Converts the iterator into a stream.
    ///
    /// The producer task starts on first poll and stays at most
    /// `high_water_mark` items ahead of the consumer. Dropping the stream
    /// stops it from fetching further batches.
    #[must_use]
    pub fn into_stream(self) -> ItemStream {
        enum State {
            Idle(Box<ItemsIterator>),
            Running(mpsc::Receiver<Result<DisplayItem>>),
        }

        let stream = stream::unfold(State::Idle(Box::new(self)), |state| async move {
            let mut receiver = match state {
                State::Idle(iterator) => {
                    let capacity = iterator
                        .settings
                        .high_water_mark
                        .clamp(1, Semaphore::MAX_PERMITS);
                    let (tx, rx) = mpsc::channel(capacity);
                    tokio::spawn(iterator.produce(tx));
                    rx
                },
                State::Running(receiver) => receiver,
            };
            let next = receiver.recv().await?;
            Some((next, State::Running(receiver)))
        });
        ItemStream::new(stream)
    }

    async fn produce(mut self: Box<Self>, tx: mpsc::Sender<Result<DisplayItem>>) {
        while !self.exhausted {
            if tx.is_closed() {
                debug!(block = %self.block_title, "consumer dropped, stopping");
                return;
            }
            let mut items = Vec::new();
            let outcome = self.pull(&mut items).await;
            for item in items {
                if tx.send(Ok(item)).await.is_err() {
                    return;
                }
            }
            if let Err(e) = outcome {
                let _ = tx.send(Err(e)).await;
                return;
            }
        }
    }

    /// Runs rounds until `sink` receives items or the iterator is exhausted.
    async fn pull(&mut self, sink: &mut Vec<DisplayItem>) -> Result<()> {
        while !self.exhausted && sink.is_empty() {
            if let Err(e) = self.round(sink).await {
                self.exhausted = true;
                return Err(e);
            }
        }
        Ok(())
    }

    async fn round(&mut self, sink: &mut Vec<DisplayItem>) -> Result<()> {
        let query = ItemQuery::new(self.candidate_condition())
            .ordered_by(self.order_by.clone())
            .take(self.settings.batch_size.max(1));
        let candidates = self.repository.find_items(&query).await?;
        if candidates.is_empty() {
            debug!(block = %self.block_title, "no candidates left");
            self.exhausted = true;
            return Ok(());
        }

        let fetched = candidates.len();
        self.processed.extend(candidates.iter().map(|item| item.id));
        let pending: Vec<Pending> = candidates
            .into_iter()
            .map(|item| self.dispatch(item))
            .collect();

        let mut yielded = 0_usize;
        for candidate in pending {
            if self.remaining == Some(0) {
                break;
            }
            let resolved = match candidate {
                Pending::Ready(item) => Some(item),
                Pending::Resolving(handle) => handle.await.map_err(|e| Error::OperationFailed {
                    operation: "resolve_candidate".to_string(),
                    cause: e.to_string(),
                })??,
            };
            let Some(item) = resolved else { continue };
            sink.push(DisplayItem::from_item(item, &self.block_title, &self.feed_title));
            yielded += 1;
            if let Some(remaining) = self.remaining.as_mut() {
                *remaining -= 1;
            }
        }

        if yielded > 0 {
            metrics::counter!("items_yielded_total", "block" => self.block_title.clone())
                .increment(yielded as u64);
        }
        debug!(block = %self.block_title, fetched, yielded, "round complete");

        if self.remaining == Some(0) {
            self.exhausted = true;
        } else if yielded == 0 {
            self.stalled += fetched;
            if let Some(threshold) = self.stall_threshold
                && self.stalled >= threshold
            {
                debug!(
                    block = %self.block_title,
                    stalled = self.stalled,
                    threshold,
                    "stall threshold reached"
                );
                self.exhausted = true;
            }
        } else {
            self.stalled = 0;
        }
        Ok(())
    }

    /// Starts resolving a candidate, or passes it through if already resolved.
    fn dispatch(&self, item: Item) -> Pending {
        let unchecked: Vec<BoundFilter> = self
            .filters
            .iter()
            .filter(|bound| !item.filters_checked.contains(&bound.title))
            .cloned()
            .collect();
        if unchecked.is_empty() {
            return Pending::Ready(item);
        }
        Pending::Resolving(tokio::spawn(resolve_candidate(
            item,
            unchecked,
            Arc::clone(&self.repository),
            Arc::clone(&self.condition),
            self.settings.filter_timeout,
            self.block_title.clone(),
        )))
    }

    fn candidate_condition(&self) -> Condition {
        let unseen = Condition::exclude_ids(&self.processed);
        if self.filters.is_empty() {
            return Condition::all(vec![self.condition.as_ref().clone(), unseen]);
        }
        let unresolved = Condition::any(
            self.filters
                .iter()
                .map(|bound| Condition::checked_none([bound.title.as_str()]))
                .collect(),
        );
        Condition::all(vec![
            Condition::any(vec![
                self.condition.as_ref().clone(),
                Condition::all(vec![self.relaxed.clone(), unresolved]),
            ]),
            unseen,
        ])
    }
}

impl std::fmt::Debug for ItemsIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemsIterator")
            .field("block_title", &self.block_title)
            .field("remaining", &self.remaining)
            .field("processed", &self.processed.len())
            .field("exhausted", &self.exhausted)
            .finish_non_exhaustive()
    }
}

/// Evaluates the unchecked filters of one item, records the verdicts and
/// re-tests the item.
///
/// Returns `None` when the item does not match or a filter stayed unchecked.
async fn resolve_candidate(
    item: Item,
    filters: Vec<BoundFilter>,
    repository: Arc<dyn ItemRepository>,
    condition: Arc<Condition>,
    timeout: Duration,
    block: String,
) -> Result<Option<Item>> {
    let verdicts = join_all(
        filters
            .iter()
            .map(|bound| evaluate(bound, &item, timeout, &block)),
    )
    .await;

    let results: Vec<FilterResult> = verdicts.iter().flatten().cloned().collect();
    if !results.is_empty() {
        repository.record_filter_results(item.id, &results).await?;
    }
    if results.len() < filters.len() {
        return Ok(None);
    }
    repository.find_item(item.id, &condition).await
}

/// Runs one filter under the timeout, catching errors and panics.
async fn evaluate(
    bound: &BoundFilter,
    item: &Item,
    timeout: Duration,
    block: &str,
) -> Option<FilterResult> {
    let call = AssertUnwindSafe(bound.filter.evaluate(item)).catch_unwind();
    let (outcome, verdict) = match tokio::time::timeout(timeout, call).await {
        Ok(Ok(Ok(passed))) => (if passed { "passed" } else { "rejected" }, Some(passed)),
        Ok(Ok(Err(e))) => {
            warn!(block, filter = %bound.title, item = %item.id, error = %e, "filter evaluation failed");
            ("error", None)
        },
        Ok(Err(_)) => {
            warn!(block, filter = %bound.title, item = %item.id, "filter evaluation panicked");
            ("panic", None)
        },
        Err(_) => {
            warn!(
                block,
                filter = %bound.title,
                item = %item.id,
                timeout_ms = timeout.as_millis(),
                "filter evaluation timed out"
            );
            ("timeout", None)
        },
    };
    metrics::counter!("filter_evaluations_total", "outcome" => outcome).increment(1);
    verdict.map(|passed| FilterResult {
        title: bound.title.clone(),
        fingerprint: bound.fingerprint.clone(),
        passed,
    })
}
