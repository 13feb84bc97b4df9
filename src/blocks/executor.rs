//! Block graph execution.
//!
//! A [`BlockExecutor`] resolves block titles to [`BlockOutput`]s for one
//! rendering session. Outputs are memoized by title, so a block shared by
//! several digest blocks is built once and its output replayed to each.
//! Build a fresh executor per session; the cache never expires on its own.

use super::{BlockOutput, EngineContext, ItemsIterator};
use crate::models::{BlockDefinition, BlockKind};
use crate::{Error, Result};
use futures::FutureExt;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::time::Instant;
use tracing::{Instrument, debug, info_span};

/// Resolves blocks to outputs, memoized per session.
#[derive(Debug)]
pub struct BlockExecutor {
    context: EngineContext,
    feed_title: String,
    cache: HashMap<String, BlockOutput>,
}

impl BlockExecutor {
    /// Creates an executor for a session rendering `feed_title`.
    ///
    /// Pass an empty title when executing blocks outside any feed.
    pub fn new(context: EngineContext, feed_title: impl Into<String>) -> Self {
        Self {
            context,
            feed_title: feed_title.into(),
            cache: HashMap::new(),
        }
    }

    /// Title of the feed this session renders.
    #[must_use]
    pub fn feed_title(&self) -> &str {
        &self.feed_title
    }

    /// Returns true if `title` has a cached output.
    #[must_use]
    pub fn is_cached(&self, title: &str) -> bool {
        self.cache.contains_key(title)
    }

    /// Drops every cached output.
    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    /// Resolves `title` to its output.
    ///
    /// Repeated calls within the session return the same handle. Only
    /// successful executions are cached; a failed block is retried on the
    /// next call.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if the block (or one of its inputs) is not defined
    /// - [`Error::CycleDetected`] if the block depends on itself
    /// - [`Error::MissingImplementation`] for an unregistered filter or digester
    /// - [`Error::InvalidInput`] for a digest block without `input_blocks`
    /// - any store or digester error raised while building the output
    pub fn execute<'a>(&'a mut self, title: &'a str) -> BoxFuture<'a, Result<BlockOutput>> {
        self.resolve(title, Vec::new())
    }

    /// Resolves `title` below the chain of blocks in `path`, outermost first.
    ///
    /// The chain travels with the call rather than living on the executor, so
    /// an abandoned execution leaves no stale entries behind.
    fn resolve<'a>(
        &'a mut self,
        title: &'a str,
        path: Vec<String>,
    ) -> BoxFuture<'a, Result<BlockOutput>> {
        async move {
            if let Some(output) = self.cache.get(title) {
                debug!(block = title, "block output cache hit");
                return Ok(output.clone());
            }
            if let Some(start) = path.iter().position(|open| open == title) {
                let mut cycle = path[start..].to_vec();
                cycle.push(title.to_string());
                return Err(Error::CycleDetected(cycle));
            }

            let definition = self
                .context
                .catalog()
                .get_block(title)
                .await?
                .ok_or_else(|| Error::NotFound {
                    kind: "block",
                    name: title.to_string(),
                })?;

            let started = Instant::now();
            let mut path = path;
            path.push(title.to_string());
            let built = self
                .build(&definition, &path)
                .instrument(info_span!(
                    "execute_block",
                    block = title,
                    implementation = definition.implementation()
                ))
                .await;

            let output = built?;
            debug!(
                block = title,
                elapsed_ms = started.elapsed().as_millis(),
                "block executed"
            );
            self.cache.insert(title.to_string(), output.clone());
            Ok(output)
        }
        .boxed()
    }

    async fn build(&mut self, definition: &BlockDefinition, path: &[String]) -> Result<BlockOutput> {
        match &definition.kind {
            BlockKind::Items(query) => {
                let iterator =
                    ItemsIterator::new(&self.context, &definition.title, &self.feed_title, query)
                        .await?;
                Ok(BlockOutput::items(&definition.title, iterator.into_stream()))
            },
            BlockKind::Digest {
                implementation,
                args,
            } => {
                let input_titles = definition.input_blocks()?;
                if !self.context.digesters().contains(implementation) {
                    return Err(Error::MissingImplementation {
                        block: definition.title.clone(),
                        kind: "digester",
                        implementation: implementation.clone(),
                    });
                }

                let mut inputs = Vec::with_capacity(input_titles.len());
                for input in &input_titles {
                    inputs.push(self.resolve(input, path.to_vec()).await?);
                }

                let digester =
                    self.context
                        .digesters()
                        .build(implementation, args, &definition.title)?;
                let content = digester.digest(inputs).await?;
                Ok(BlockOutput::content(&definition.title, content))
            },
        }
    }
}
