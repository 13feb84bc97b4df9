//! Relevance filters.
//!
//! A filter is an async predicate over one item, built from a named
//! implementation and JSON arguments. Implementations are registered in a
//! [`FilterRegistry`] that the engine looks up by the `implementation` key of
//! a [`FilterDefinition`].
//!
//! # Example
//!
//! ```rust,ignore
//! use feedsift::filters::{FilterRegistry, from_fn};
//!
//! let mut registry = FilterRegistry::with_builtins();
//! registry.register("LongRead", |_args| {
//!     Ok(from_fn(|item| async move { Ok(item.number_of_words.unwrap_or(0) > 3000) }))
//! });
//! ```

mod keyword;

pub use keyword::{KeywordField, KeywordMatch};

use crate::models::{FilterDefinition, Item};
use crate::{Error, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// An async relevance predicate.
///
/// Evaluations may be slow (remote classifiers) and may fail; the items
/// iterator bounds each call with a timeout and treats errors, timeouts and
/// panics as "not evaluated".
#[async_trait]
pub trait ItemFilter: Send + Sync {
    /// Returns whether the item passes.
    async fn evaluate(&self, item: &Item) -> Result<bool>;
}

/// Builds a filter from its JSON arguments.
pub type FilterConstructor = Arc<dyn Fn(&Value) -> Result<Arc<dyn ItemFilter>> + Send + Sync>;

/// Named filter constructors.
#[derive(Clone, Default)]
pub struct FilterRegistry {
    constructors: BTreeMap<String, FilterConstructor>,
}

impl FilterRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the built-in filters (`KeywordMatch`).
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(KeywordMatch::NAME, |args| {
            Ok(Arc::new(KeywordMatch::from_args(args)?) as Arc<dyn ItemFilter>)
        });
        registry
    }

    /// Registers a constructor under `name`, replacing any previous one.
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn(&Value) -> Result<Arc<dyn ItemFilter>> + Send + Sync + 'static,
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

    /// Builds the filter described by `definition` for use by `block`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingImplementation`] naming the block if the
    /// implementation is not registered, or the constructor's error for bad
    /// arguments.
    pub fn build(&self, definition: &FilterDefinition, block: &str) -> Result<Arc<dyn ItemFilter>> {
        let constructor =
            self.constructors
                .get(&definition.implementation)
                .ok_or_else(|| Error::MissingImplementation {
                    block: block.to_string(),
                    kind: "filter",
                    implementation: definition.implementation.clone(),
                })?;
        constructor(&definition.args).map_err(|e| match e {
            Error::InvalidInput(detail) => Error::InvalidInput(format!(
                "filter '{}' of block '{block}': {detail}",
                definition.title
            )),
            other => other,
        })
    }
}

impl fmt::Debug for FilterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterRegistry")
            .field("implementations", &self.names())
            .finish()
    }
}

/// Adapts an async closure into an [`ItemFilter`].
pub fn from_fn<F, Fut>(f: F) -> Arc<dyn ItemFilter>
where
    F: Fn(Item) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<bool>> + Send + 'static,
{
    Arc::new(FnFilter { f })
}

struct FnFilter<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> ItemFilter for FnFilter<F>
where
    F: Fn(Item) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<bool>> + Send + 'static,
{
    async fn evaluate(&self, item: &Item) -> Result<bool> {
        (self.f)(item.clone()).await
    }
}
