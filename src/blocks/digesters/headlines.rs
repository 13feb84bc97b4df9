//! Built-in markdown headline digester.

use super::{Digester, collect_content, collect_items};
use crate::blocks::{BlockOutput, BlockStream, ContentStream, ItemStream};
use crate::models::DisplayItem;
use crate::{Error, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use std::fmt::Write as _;

/// Renders a markdown list of headlines from its inputs.
///
/// Content inputs are passed through as preceding paragraphs; item inputs
/// become `- [id] title (source)` lines. The `[id]` marker lets a display
/// layer link the line back to the item.
///
/// ```toml
/// [[blocks]]
/// title = "Briefing"
/// implementation = "Headlines"
/// args = { input_blocks = ["Climate news"], heading = "Today", max_items = 5 }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Headlines {
    #[serde(default)]
    heading: Option<String>,
    /// Per item input.
    #[serde(default)]
    max_items: Option<usize>,
}

impl Headlines {
    /// Registry key.
    pub const NAME: &'static str = "Headlines";

    /// Parses `{ heading?, max_items? }`; other keys are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if a known key has the wrong type.
    pub fn from_args(args: &Value) -> Result<Self> {
        if args.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(args.clone())
            .map_err(|e| Error::InvalidInput(format!("invalid Headlines arguments: {e}")))
    }

    async fn render(&self, inputs: Vec<BlockOutput>) -> Result<String> {
        let mut text = String::new();
        if let Some(heading) = &self.heading {
            text.push_str("## ");
            text.push_str(heading);
            text.push_str("\n\n");
        }
        for input in inputs {
            match input.stream() {
                BlockStream::Content(content) => {
                    text.push_str(&collect_content(content).await?);
                    text.push_str("\n\n");
                },
                BlockStream::Items(items) => {
                    let items = match self.max_items {
                        Some(max) => collect_items_prefix(items, max).await?,
                        None => collect_items(items).await?,
                    };
                    for item in items {
                        let _ = writeln!(text, "- [{}] {} ({})", item.id, item.title, item.source_name);
                    }
                },
            }
        }
        Ok(text)
    }
}

/// Reads at most `max` items without pulling further.
async fn collect_items_prefix(items: ItemStream, max: usize) -> Result<Vec<DisplayItem>> {
    collect_items(ItemStream::new(items.take(max))).await
}

#[async_trait]
impl Digester for Headlines {
    async fn digest(&self, inputs: Vec<BlockOutput>) -> Result<ContentStream> {
        let text = self.render(inputs).await?;
        Ok(Box::pin(stream::once(async move { Ok(text) })))
    }
}
