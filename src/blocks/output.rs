//! Block outputs and the streams they hand out.
//!
//! A [`BlockOutput`] is the memoized result of executing one block. It wraps
//! a single underlying stream and replays it: every call to
//! [`BlockOutput::stream`] returns an independent single-pass reader, while
//! the underlying stream is driven at most once, by whichever reader is
//! furthest ahead. Two digesters sharing an input therefore share its fetches
//! and filter evaluations.
//!
//! Replay needs memory: while any handle to an output is alive, everything
//! produced so far is kept for readers yet to be created. Consume the last
//! handle with [`BlockOutput::into_stream`] to read without retaining.

use crate::models::DisplayItem;
use crate::Result;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{Mutex, OnceCell};

/// A lazy sequence of text chunks.
pub type ContentStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Builds a content stream from ready chunks.
pub fn content_from_chunks<I, S>(chunks: I) -> ContentStream
where
    I: IntoIterator<Item = S>,
    I::IntoIter: Send + 'static,
    S: Into<String>,
{
    Box::pin(stream::iter(chunks.into_iter().map(|chunk| Ok(chunk.into()))))
}

/// A lazy, single-pass sequence of display items.
///
/// After an `Err` item the sequence ends; items already received stay valid.
pub struct ItemStream {
    inner: BoxStream<'static, Result<DisplayItem>>,
}

impl ItemStream {
    /// Wraps an arbitrary item stream.
    pub fn new(stream: impl Stream<Item = Result<DisplayItem>> + Send + 'static) -> Self {
        Self {
            inner: stream.boxed(),
        }
    }

    /// A stream over ready items.
    #[must_use]
    pub fn from_items(items: Vec<DisplayItem>) -> Self {
        Self::new(stream::iter(items.into_iter().map(Ok)))
    }
}

impl Stream for ItemStream {
    type Item = Result<DisplayItem>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl fmt::Debug for ItemStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ItemStream").finish_non_exhaustive()
    }
}

/// One reader over a block output.
pub enum BlockStream {
    /// Items produced by an items block.
    Items(ItemStream),
    /// Text produced by a digest block.
    Content(ContentStream),
}

impl fmt::Debug for BlockStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Items(_) => f.write_str("BlockStream::Items"),
            Self::Content(_) => f.write_str("BlockStream::Content"),
        }
    }
}

/// Which kind of stream a [`BlockOutput`] carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    /// Display items.
    Items,
    /// Text chunks.
    Content,
}

/// A cheap, clonable handle to a block's memoized output.
#[derive(Clone)]
pub struct BlockOutput {
    inner: Arc<OutputInner>,
}

struct OutputInner {
    block: String,
    source: OutputSource,
}

enum OutputSource {
    Items(Replay<Result<DisplayItem>>),
    Content(Replay<Result<String>>),
}

impl BlockOutput {
    /// Wraps the item stream of `block`.
    pub fn items(block: impl Into<String>, stream: ItemStream) -> Self {
        Self::with_source(block, OutputSource::Items(Replay::new(stream.boxed())))
    }

    /// Wraps the content stream of `block`.
    pub fn content(block: impl Into<String>, stream: ContentStream) -> Self {
        Self::with_source(block, OutputSource::Content(Replay::new(stream)))
    }

    fn with_source(block: impl Into<String>, source: OutputSource) -> Self {
        Self {
            inner: Arc::new(OutputInner {
                block: block.into(),
                source,
            }),
        }
    }

    /// Title of the block that produced this output.
    #[must_use]
    pub fn block_title(&self) -> &str {
        &self.inner.block
    }

    /// Returns the output kind.
    #[must_use]
    pub fn kind(&self) -> OutputKind {
        match self.inner.source {
            OutputSource::Items(_) => OutputKind::Items,
            OutputSource::Content(_) => OutputKind::Content,
        }
    }

    /// Returns true if both handles refer to the same output.
    #[must_use]
    pub fn same_handle(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Returns a new reader positioned at the start of the output.
    #[must_use]
    pub fn stream(&self) -> BlockStream {
        match &self.inner.source {
            OutputSource::Items(replay) => BlockStream::Items(ItemStream {
                inner: replay.reader(),
            }),
            OutputSource::Content(replay) => BlockStream::Content(replay.reader()),
        }
    }

    /// Turns this handle into a reader.
    ///
    /// When this was the last handle, the output stops retaining elements
    /// and the reader frees each one once read.
    #[must_use]
    pub fn into_stream(self) -> BlockStream {
        self.stream()
    }

    /// Returns a new item reader, or `None` for content outputs.
    #[must_use]
    pub fn item_stream(&self) -> Option<ItemStream> {
        match self.stream() {
            BlockStream::Items(items) => Some(items),
            BlockStream::Content(_) => None,
        }
    }

    /// Returns a new content reader, or `None` for item outputs.
    #[must_use]
    pub fn content_stream(&self) -> Option<ContentStream> {
        match self.stream() {
            BlockStream::Content(content) => Some(content),
            BlockStream::Items(_) => None,
        }
    }
}

impl fmt::Debug for BlockOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockOutput")
            .field("block", &self.inner.block)
            .field("kind", &self.kind())
            .finish()
    }
}

/// Drives a source stream once and replays it to any number of readers.
///
/// Elements live in a chain of slots. The replay itself pins the head of the
/// chain, so a reader created while any [`BlockOutput`] handle is alive starts
/// from the first element. Each reader pins only its own position; once the
/// last handle is gone, elements every live reader has passed are freed.
struct Replay<T> {
    head: Arc<Slot<T>>,
    source: Arc<Mutex<Option<BoxStream<'static, T>>>>,
}

/// One position in the replayed sequence, filled at most once.
struct Slot<T> {
    /// `None` once filled means the source ended.
    cell: OnceCell<Option<(T, Arc<Slot<T>>)>>,
}

impl<T> Slot<T> {
    fn empty() -> Arc<Self> {
        Arc::new(Self {
            cell: OnceCell::new(),
        })
    }
}

impl<T> Drop for Slot<T> {
    // Unlink iteratively; dropping a long chain recursively overflows the stack.
    fn drop(&mut self) {
        let mut link = self.cell.take();
        while let Some(Some((_value, next))) = link {
            match Arc::try_unwrap(next) {
                Ok(mut slot) => link = slot.cell.take(),
                Err(_) => break,
            }
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Replay<T> {
    fn new(source: BoxStream<'static, T>) -> Self {
        Self {
            head: Slot::empty(),
            source: Arc::new(Mutex::new(Some(source))),
        }
    }

    fn reader(&self) -> BoxStream<'static, T> {
        let source = Arc::clone(&self.source);
        stream::unfold(Arc::clone(&self.head), move |slot| {
            let source = Arc::clone(&source);
            async move {
                let filled = slot.cell.get_or_init(|| pull(&source)).await;
                let (value, next) = filled.as_ref()?;
                Some((value.clone(), Arc::clone(next)))
            }
        })
        .boxed()
    }
}

/// Pulls the next source element into a fresh tail slot.
async fn pull<T>(source: &Mutex<Option<BoxStream<'static, T>>>) -> Option<(T, Arc<Slot<T>>)> {
    let mut source = source.lock().await;
    let next = source.as_mut()?.next().await;
    if next.is_none() {
        *source = None;
    }
    next.map(|value| (value, Slot::empty()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::collect_items;
    use crate::models::{Item, ItemId};
    use chrono::Utc;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn display(id: i64) -> DisplayItem {
        let item = Item {
            id: ItemId::new(id),
            link: format!("https://example.com/{id}"),
            item_type: None,
            source_name: "Example".to_string(),
            title: format!("Item {id}"),
            description: None,
            content: None,
            authors: Vec::new(),
            date_published: None,
            date_added: Utc::now(),
            image_link: None,
            number_of_words: None,
            likes: None,
            comments_link: None,
            seen: false,
            saved: false,
            read_later: false,
            filters_checked: BTreeSet::new(),
            filters_passed: BTreeSet::new(),
        };
        DisplayItem::from_item(item, "Block", "")
    }

    #[tokio::test]
    async fn test_readers_replay_one_source() {
        let polled = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&polled);
        let source = stream::iter(1..=3).map(move |id| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(display(id))
        });
        let output = BlockOutput::items("Block", ItemStream::new(source));

        let first: Vec<ItemId> = output
            .item_stream()
            .unwrap()
            .map(|item| item.unwrap().id)
            .collect()
            .await;
        let second: Vec<ItemId> = output
            .item_stream()
            .unwrap()
            .map(|item| item.unwrap().id)
            .collect()
            .await;

        assert_eq!(first, vec![ItemId::new(1), ItemId::new(2), ItemId::new(3)]);
        assert_eq!(first, second);
        assert_eq!(polled.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_interleaved_readers() {
        let output = BlockOutput::items("Block", ItemStream::from_items(vec![display(1), display(2)]));
        let mut a = output.item_stream().unwrap();
        let mut b = output.item_stream().unwrap();

        assert_eq!(a.next().await.unwrap().unwrap().id, ItemId::new(1));
        assert_eq!(b.next().await.unwrap().unwrap().id, ItemId::new(1));
        assert_eq!(b.next().await.unwrap().unwrap().id, ItemId::new(2));
        assert_eq!(a.next().await.unwrap().unwrap().id, ItemId::new(2));
        assert!(a.next().await.is_none());
        assert!(b.next().await.is_none());
    }

    #[tokio::test]
    async fn test_handles_and_kinds() {
        let output = BlockOutput::content("Digest", content_from_chunks(["a", "b"]));
        let clone = output.clone();
        let other = BlockOutput::content("Digest", content_from_chunks(["a", "b"]));

        assert!(output.same_handle(&clone));
        assert!(!output.same_handle(&other));
        assert_eq!(output.kind(), OutputKind::Content);
        assert_eq!(output.block_title(), "Digest");
        assert!(output.item_stream().is_none());

        let text: Vec<String> = clone
            .content_stream()
            .unwrap()
            .map(|chunk| chunk.unwrap())
            .collect()
            .await;
        assert_eq!(text.concat(), "ab");
    }

    fn tokens(token: &Arc<()>, count: usize) -> BoxStream<'static, Arc<()>> {
        let token = Arc::clone(token);
        stream::repeat_with(move || Arc::clone(&token)).take(count).boxed()
    }

    #[tokio::test]
    async fn test_replay_retains_while_handle_lives() {
        let token = Arc::new(());
        let replay = Replay::new(tokens(&token, 100));

        let read = replay.reader().count().await;
        assert_eq!(read, 100);
        assert_eq!(Arc::strong_count(&token), 101);
        assert_eq!(replay.reader().count().await, 100);

        drop(replay);
        assert_eq!(Arc::strong_count(&token), 1);
    }

    #[tokio::test]
    async fn test_replay_frees_read_elements_without_handle() {
        let token = Arc::new(());
        let replay = Replay::new(tokens(&token, 100));
        let mut leader = replay.reader();
        let mut trailer = replay.reader();
        drop(replay);

        for _ in 0..50 {
            leader.next().await.unwrap();
        }
        // The trailer has read nothing, so all 50 stay buffered for it. The
        // unfinished source holds one more copy.
        assert_eq!(Arc::strong_count(&token), 52);

        for _ in 0..50 {
            trailer.next().await.unwrap();
        }
        assert_eq!(Arc::strong_count(&token), 2);

        drop(trailer);
        assert_eq!(leader.count().await, 50);
        assert_eq!(Arc::strong_count(&token), 1);
    }

    #[tokio::test]
    async fn test_long_chain_drops_without_overflow() {
        let token = Arc::new(());
        let replay = Replay::new(tokens(&token, 200_000));
        assert_eq!(replay.reader().count().await, 200_000);
        drop(replay);
        assert_eq!(Arc::strong_count(&token), 1);
    }

    #[tokio::test]
    async fn test_into_stream_reads_without_retaining() {
        let output = BlockOutput::items(
            "Block",
            ItemStream::from_items((1..=3).map(display).collect()),
        );
        let kept = output.clone();
        let BlockStream::Items(items) = output.into_stream() else {
            panic!("expected an item stream");
        };
        assert_eq!(collect_items(items).await.unwrap().len(), 3);
        // A surviving handle still replays from the start.
        assert_eq!(collect_items(kept.item_stream().unwrap()).await.unwrap().len(), 3);
    }
}
