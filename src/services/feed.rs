//! Feed rendering service.

use crate::blocks::{BlockExecutor, BlockOutput, EngineContext};
use crate::models::FeedDefinition;
use crate::{Error, Result};
use tracing::{info, instrument};

/// One block of a rendered feed.
#[derive(Debug, Clone)]
pub struct RenderedBlock {
    /// Block title.
    pub title: String,
    /// The block's output.
    pub output: BlockOutput,
}

/// Renders feeds into block outputs.
///
/// Every call runs a fresh [`BlockExecutor`], so outputs are shared within
/// one render and never across renders.
#[derive(Debug, Clone)]
pub struct FeedService {
    context: EngineContext,
}

impl FeedService {
    /// Creates a feed service.
    #[must_use]
    pub const fn new(context: EngineContext) -> Self {
        Self { context }
    }

    /// Returns all feeds in display order.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn list_feeds(&self) -> Result<Vec<FeedDefinition>> {
        self.context.catalog().list_feeds().await
    }

    /// Executes every block of `feed_title` in display order.
    ///
    /// Item streams are lazy: nothing is fetched for an items block until its
    /// output is read.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown feed, or the first block
    /// execution error.
    #[instrument(skip(self), fields(operation = "render_feed"))]
    pub async fn render(&self, feed_title: &str) -> Result<Vec<RenderedBlock>> {
        let feed = self
            .context
            .catalog()
            .get_feed(feed_title)
            .await?
            .ok_or_else(|| Error::NotFound {
                kind: "feed",
                name: feed_title.to_string(),
            })?;

        let mut executor = BlockExecutor::new(self.context.clone(), &feed.title);
        let mut rendered = Vec::with_capacity(feed.blocks.len());
        for title in &feed.blocks {
            let output = executor.execute(title).await?;
            rendered.push(RenderedBlock {
                title: title.clone(),
                output,
            });
        }
        info!(feed = %feed.title, blocks = rendered.len(), "feed rendered");
        Ok(rendered)
    }

    /// Executes a single block outside any feed.
    ///
    /// # Errors
    ///
    /// Returns the block execution error.
    pub async fn render_block(&self, block_title: &str) -> Result<BlockOutput> {
        BlockExecutor::new(self.context.clone(), "")
            .execute(block_title)
            .await
    }
}
