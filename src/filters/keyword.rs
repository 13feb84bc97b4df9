//! Built-in keyword filter.

use super::ItemFilter;
use crate::models::Item;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

/// Item text a [`KeywordMatch`] searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeywordField {
    /// Headline.
    Title,
    /// Description.
    Description,
    /// Full text.
    Content,
}

fn default_fields() -> Vec<KeywordField> {
    vec![KeywordField::Title, KeywordField::Description]
}

/// Passes items whose text contains any of the keywords, ignoring case.
///
/// ```toml
/// [[filters]]
/// title = "Climate"
/// implementation = "KeywordMatch"
/// args = { keywords = ["heat wave", "drought"], fields = ["title"] }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct KeywordMatch {
    keywords: Vec<String>,
    #[serde(default = "default_fields")]
    fields: Vec<KeywordField>,
}

impl KeywordMatch {
    /// Registry key.
    pub const NAME: &'static str = "KeywordMatch";

    /// Parses `{ keywords, fields? }`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for malformed arguments or an empty
    /// keyword list.
    pub fn from_args(args: &Value) -> Result<Self> {
        let mut filter: Self = serde_json::from_value(args.clone())
            .map_err(|e| Error::InvalidInput(format!("invalid KeywordMatch arguments: {e}")))?;
        filter.keywords = filter
            .keywords
            .iter()
            .map(|keyword| keyword.trim().to_lowercase())
            .filter(|keyword| !keyword.is_empty())
            .collect();
        if filter.keywords.is_empty() {
            return Err(Error::InvalidInput(
                "KeywordMatch needs at least one keyword".to_string(),
            ));
        }
        Ok(filter)
    }

    fn matches(&self, item: &Item) -> bool {
        self.fields.iter().any(|field| {
            let text = match field {
                KeywordField::Title => Some(item.title.as_str()),
                KeywordField::Description => item.description.as_deref(),
                KeywordField::Content => item.content.as_deref(),
            };
            text.is_some_and(|text| {
                let text = text.to_lowercase();
                self.keywords.iter().any(|keyword| text.contains(keyword.as_str()))
            })
        })
    }
}

#[async_trait]
impl ItemFilter for KeywordMatch {
    async fn evaluate(&self, item: &Item) -> Result<bool> {
        Ok(self.matches(item))
    }
}
