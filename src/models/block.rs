//! Filter, block and feed definitions.
//!
//! These records are written by catalog loading and are read-only to the
//! engine. A [`Catalog`] bundles one consistent set of them.

use super::{Condition, OrderBy};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};

/// Argument key listing the inputs of a digest block.
pub const INPUT_BLOCKS_KEY: &str = "input_blocks";

/// A named relevance predicate definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterDefinition {
    /// Unique title, referenced from `filters_passed` conditions.
    pub title: String,
    /// Registry key of the implementation.
    pub implementation: String,
    /// Implementation arguments.
    #[serde(default)]
    pub args: Value,
}

impl FilterDefinition {
    /// Creates a definition.
    #[must_use]
    pub fn new(title: impl Into<String>, implementation: impl Into<String>, args: Value) -> Self {
        Self {
            title: title.into(),
            implementation: implementation.into(),
            args,
        }
    }

    /// Returns the version fingerprint of this definition.
    ///
    /// SHA-256 over the implementation key and the canonical JSON arguments
    /// (object keys sorted). Recorded verdicts only count while the
    /// fingerprint they were recorded under is current.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.implementation.as_bytes());
        hasher.update([0_u8]);
        hasher.update(self.args.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// The query of an items block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockQuery {
    /// Item condition.
    #[serde(rename = "where", default)]
    pub condition: Condition,
    /// Ordering keys.
    #[serde(default)]
    pub order_by: Vec<OrderBy>,
    /// Maximum number of items to yield.
    #[serde(default)]
    pub take: Option<usize>,
    /// Give up after this many consecutive candidates produced nothing.
    #[serde(default)]
    pub stall_threshold: Option<usize>,
}

/// What a block produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockKind {
    /// Items matching a query.
    Items(BlockQuery),
    /// Text produced by a digester from other blocks.
    Digest {
        /// Digester registry key.
        implementation: String,
        /// Digester arguments, including `input_blocks`.
        args: Value,
    },
}

/// A named unit of retrieval or transformation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDefinition {
    /// Unique title.
    pub title: String,
    /// Items or digest.
    pub kind: BlockKind,
}

impl BlockDefinition {
    /// Creates an items block.
    #[must_use]
    pub fn items(title: impl Into<String>, query: BlockQuery) -> Self {
        Self {
            title: title.into(),
            kind: BlockKind::Items(query),
        }
    }

    /// Creates a digest block.
    #[must_use]
    pub fn digest(title: impl Into<String>, implementation: impl Into<String>, args: Value) -> Self {
        Self {
            title: title.into(),
            kind: BlockKind::Digest {
                implementation: implementation.into(),
                args,
            },
        }
    }

    /// Returns the registry key, `"items"` for items blocks.
    #[must_use]
    pub fn implementation(&self) -> &str {
        match &self.kind {
            BlockKind::Items(_) => "items",
            BlockKind::Digest { implementation, .. } => implementation,
        }
    }

    /// Returns the input block titles of a digest block.
    ///
    /// Items blocks have no inputs.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] naming the block when a digest block's
    /// `input_blocks` is absent, empty, or not a list of strings.
    pub fn input_blocks(&self) -> Result<Vec<String>> {
        let BlockKind::Digest { args, .. } = &self.kind else {
            return Ok(Vec::new());
        };
        let invalid = |detail: &str| {
            Error::InvalidInput(format!(
                "digest block '{}' {detail} '{INPUT_BLOCKS_KEY}'",
                self.title
            ))
        };
        let list = args
            .get(INPUT_BLOCKS_KEY)
            .and_then(Value::as_array)
            .ok_or_else(|| invalid("is missing"))?;
        if list.is_empty() {
            return Err(invalid("has an empty"));
        }
        list.iter()
            .map(|value| {
                value
                    .as_str()
                    .map(ToString::to_string)
                    .ok_or_else(|| invalid("has a non-string entry in"))
            })
            .collect()
    }
}

/// An ordered list of blocks shown together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedDefinition {
    /// Unique title.
    pub title: String,
    /// Block titles in display order.
    pub blocks: Vec<String>,
}

/// A complete, consistent set of definitions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    /// Filter definitions.
    pub filters: Vec<FilterDefinition>,
    /// Block definitions.
    pub blocks: Vec<BlockDefinition>,
    /// Feed definitions, in display order.
    pub feeds: Vec<FeedDefinition>,
}

impl Catalog {
    /// Checks the catalog for internal consistency.
    ///
    /// Titles must be unique per kind, every referenced filter and block must
    /// be defined, conditions must be well typed and the digest input graph
    /// must be acyclic.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for inconsistencies and
    /// [`Error::CycleDetected`] with the offending path for cycles.
    pub fn validate(&self) -> Result<()> {
        ensure_unique("filter", self.filters.iter().map(|f| f.title.as_str()))?;
        ensure_unique("block", self.blocks.iter().map(|b| b.title.as_str()))?;
        ensure_unique("feed", self.feeds.iter().map(|f| f.title.as_str()))?;

        let filter_titles: HashSet<&str> = self.filters.iter().map(|f| f.title.as_str()).collect();
        let blocks: HashMap<&str, &BlockDefinition> =
            self.blocks.iter().map(|b| (b.title.as_str(), b)).collect();

        for block in &self.blocks {
            match &block.kind {
                BlockKind::Items(query) => {
                    query.condition.validate().map_err(|e| {
                        Error::InvalidInput(format!("block '{}': {e}", block.title))
                    })?;
                    if let Some(missing) = query
                        .condition
                        .relevant_filters()
                        .into_iter()
                        .find(|title| !filter_titles.contains(title.as_str()))
                    {
                        return Err(Error::InvalidInput(format!(
                            "block '{}' references undefined filter '{missing}'",
                            block.title
                        )));
                    }
                },
                BlockKind::Digest { .. } => {
                    for input in block.input_blocks()? {
                        if !blocks.contains_key(input.as_str()) {
                            return Err(Error::InvalidInput(format!(
                                "block '{}' references undefined input block '{input}'",
                                block.title
                            )));
                        }
                    }
                },
            }
        }

        for feed in &self.feeds {
            if let Some(missing) = feed.blocks.iter().find(|t| !blocks.contains_key(t.as_str())) {
                return Err(Error::InvalidInput(format!(
                    "feed '{}' references undefined block '{missing}'",
                    feed.title
                )));
            }
        }

        let mut finished = HashSet::new();
        for block in &self.blocks {
            visit(block.title.as_str(), &blocks, &mut Vec::new(), &mut finished)?;
        }
        Ok(())
    }
}

fn ensure_unique<'a>(kind: &str, titles: impl Iterator<Item = &'a str>) -> Result<()> {
    let mut seen = HashSet::new();
    for title in titles {
        if !seen.insert(title) {
            return Err(Error::InvalidInput(format!("duplicate {kind} title '{title}'")));
        }
    }
    Ok(())
}

/// Depth-first walk over digest inputs; `path` holds the blocks being visited.
fn visit<'a>(
    title: &'a str,
    blocks: &HashMap<&'a str, &'a BlockDefinition>,
    path: &mut Vec<&'a str>,
    finished: &mut HashSet<&'a str>,
) -> Result<()> {
    if finished.contains(title) {
        return Ok(());
    }
    if let Some(start) = path.iter().position(|t| *t == title) {
        let mut cycle: Vec<String> = path[start..].iter().map(ToString::to_string).collect();
        cycle.push(title.to_string());
        return Err(Error::CycleDetected(cycle));
    }
    let Some(block) = blocks.get(title) else {
        return Ok(());
    };
    if let BlockKind::Digest { args, .. } = &block.kind {
        path.push(title);
        let inputs = args
            .get(INPUT_BLOCKS_KEY)
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_str);
        for input in inputs {
            let Some((key, _)) = blocks.get_key_value(input) else {
                continue;
            };
            visit(*key, blocks, path, finished)?;
        }
        path.pop();
    }
    finished.insert(title);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn items_block(title: &str, condition: Condition) -> BlockDefinition {
        BlockDefinition::items(
            title,
            BlockQuery {
                condition,
                ..BlockQuery::default()
            },
        )
    }

    fn digest_block(title: &str, inputs: &[&str]) -> BlockDefinition {
        BlockDefinition::digest(title, "Headlines", json!({ "input_blocks": inputs }))
    }

    #[test]
    fn test_fingerprint_ignores_key_order_and_tracks_args() {
        let a = FilterDefinition::new("X", "KeywordMatch", json!({"keywords": ["a"], "fields": ["title"]}));
        let b = FilterDefinition::new("X", "KeywordMatch", json!({"fields": ["title"], "keywords": ["a"]}));
        let c = FilterDefinition::new("X", "KeywordMatch", json!({"keywords": ["b"], "fields": ["title"]}));
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }

    #[test]
    fn test_input_blocks() {
        assert_eq!(
            digest_block("D", &["A", "B"]).input_blocks().unwrap(),
            vec!["A", "B"]
        );
        assert!(items_block("A", Condition::always()).input_blocks().unwrap().is_empty());

        let missing = BlockDefinition::digest("D", "Headlines", json!({}));
        let err = missing.input_blocks().unwrap_err().to_string();
        assert!(err.contains("'D'"), "{err}");

        let empty = BlockDefinition::digest("D", "Headlines", json!({"input_blocks": []}));
        assert!(empty.input_blocks().is_err());
    }

    #[test]
    fn test_validate_accepts_consistent_catalog() {
        let catalog = Catalog {
            filters: vec![FilterDefinition::new("X", "KeywordMatch", json!({"keywords": ["x"]}))],
            blocks: vec![
                items_block("A", Condition::passed_some(["X"])),
                items_block("B", Condition::always()),
                digest_block("D", &["A", "B"]),
                digest_block("E", &["D", "A"]),
            ],
            feeds: vec![FeedDefinition {
                title: "Main".to_string(),
                blocks: vec!["E".to_string(), "B".to_string()],
            }],
        };
        assert!(catalog.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_undefined_references() {
        let catalog = Catalog {
            blocks: vec![items_block("A", Condition::passed_some(["X"]))],
            ..Catalog::default()
        };
        assert!(catalog.validate().unwrap_err().to_string().contains("undefined filter 'X'"));

        let catalog = Catalog {
            blocks: vec![digest_block("D", &["Nope"])],
            ..Catalog::default()
        };
        assert!(catalog.validate().is_err());

        let catalog = Catalog {
            feeds: vec![FeedDefinition {
                title: "Main".to_string(),
                blocks: vec!["Nope".to_string()],
            }],
            ..Catalog::default()
        };
        assert!(catalog.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let catalog = Catalog {
            blocks: vec![
                items_block("A", Condition::always()),
                items_block("A", Condition::never()),
            ],
            ..Catalog::default()
        };
        assert!(catalog.validate().unwrap_err().to_string().contains("duplicate block"));
    }

    #[test]
    fn test_validate_detects_cycles() {
        let catalog = Catalog {
            blocks: vec![
                items_block("A", Condition::always()),
                digest_block("B", &["A", "C"]),
                digest_block("C", &["B"]),
            ],
            ..Catalog::default()
        };
        match catalog.validate() {
            Err(Error::CycleDetected(path)) => assert_eq!(path, vec!["B", "C", "B"]),
            other => panic!("expected cycle, got {other:?}"),
        }

        let self_loop = Catalog {
            blocks: vec![digest_block("S", &["S"])],
            ..Catalog::default()
        };
        assert!(matches!(self_loop.validate(), Err(Error::CycleDetected(_))));
    }
}
