//! Digesters turn block outputs into text.
//!
//! A digester receives the outputs of its block's `input_blocks`, in declared
//! order, and returns a lazy sequence of text chunks. Implementations are
//! registered by name in a [`DigesterRegistry`], mirroring
//! [`crate::filters::FilterRegistry`].

mod headlines;

pub use headlines::Headlines;

use super::{BlockOutput, ContentStream, ItemStream};
use crate::models::DisplayItem;
use crate::{Error, Result};
use async_trait::async_trait;
use futures::TryStreamExt;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Produces text from upstream block outputs.
///
/// Digesters may embed item identifiers in their text for the display layer
/// to resolve. They must not have side effects beyond producing output.
#[async_trait]
pub trait Digester: Send + Sync {
    /// Digests the inputs into a content stream.
    async fn digest(&self, inputs: Vec<BlockOutput>) -> Result<ContentStream>;
}

/// Builds a digester from its block arguments.
pub type DigesterConstructor = Arc<dyn Fn(&Value) -> Result<Arc<dyn Digester>> + Send + Sync>;

/// Named digester constructors.
#[derive(Clone, Default)]
pub struct DigesterRegistry {
    constructors: BTreeMap<String, DigesterConstructor>,
}

impl DigesterRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the built-in digesters (`Headlines`).
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Headlines::NAME, |args| {
            Ok(Arc::new(Headlines::from_args(args)?) as Arc<dyn Digester>)
        });
        registry
    }

    /// Registers a constructor under `name`, replacing any previous one.
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn(&Value) -> Result<Arc<dyn Digester>> + Send + Sync + 'static,
    {
        self.constructors.insert(name.into(), Arc::new(constructor));
    }

    /// Returns true if `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// Returns the registered names in sorted order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }

    /// Builds the digester `implementation` with `args` for `block`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingImplementation`] if the name is not registered,
    /// or the constructor's error for bad arguments.
    pub fn build(&self, implementation: &str, args: &Value, block: &str) -> Result<Arc<dyn Digester>> {
        let constructor = self
            .constructors
            .get(implementation)
            .ok_or_else(|| Error::MissingImplementation {
                block: block.to_string(),
                kind: "digester",
                implementation: implementation.to_string(),
            })?;
        constructor(args).map_err(|e| match e {
            Error::InvalidInput(detail) => {
                Error::InvalidInput(format!("digest block '{block}': {detail}"))
            },
            other => other,
        })
    }
}

impl fmt::Debug for DigesterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DigesterRegistry")
            .field("implementations", &self.names())
            .finish()
    }
}

/// Adapts an async closure into a [`Digester`].
pub fn from_fn<F, Fut>(f: F) -> Arc<dyn Digester>
where
    F: Fn(Vec<BlockOutput>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ContentStream>> + Send + 'static,
{
    Arc::new(FnDigester { f })
}

struct FnDigester<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> Digester for FnDigester<F>
where
    F: Fn(Vec<BlockOutput>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ContentStream>> + Send + 'static,
{
    async fn digest(&self, inputs: Vec<BlockOutput>) -> Result<ContentStream> {
        (self.f)(inputs).await
    }
}

/// Drains an item stream, stopping at the first error.
///
/// # Errors
///
/// Returns the first error the stream produced.
pub async fn collect_items(stream: ItemStream) -> Result<Vec<DisplayItem>> {
    stream.try_collect().await
}

/// Drains a content stream into one string, stopping at the first error.
///
/// # Errors
///
/// Returns the first error the stream produced.
pub async fn collect_content(stream: ContentStream) -> Result<String> {
    let chunks: Vec<String> = stream.try_collect().await?;
    Ok(chunks.concat())
}
