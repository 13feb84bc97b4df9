//! Boolean condition trees over item fields and relations.
//!
//! A [`Condition`] is the `where` part of a block query. Besides plain field
//! comparisons it can quantify over an item's authors and over the two filter
//! relation sets. The items iterator derives two artifacts from every tree:
//!
//! - [`Condition::relevant_filters`]: titles referenced under `filters_passed`
//! - [`Condition::relaxed`]: the tree with every `filters_passed` node treated
//!   as satisfied, which matches a superset of the original
//!
//! # Serialized form
//!
//! ```toml
//! [[blocks]]
//! title = "Atlantic"
//! where = { all = [
//!     { field = { name = "source_name", op = "in", value = ["The Atlantic"] } },
//!     { filters_passed = { none = ["Relevant to politics"] } },
//! ] }
//! ```

use super::{Item, ItemId};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A composable predicate over stored items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    /// Conjunction. An empty conjunction is always true.
    All(Vec<Self>),
    /// Disjunction. An empty disjunction is always false.
    Any(Vec<Self>),
    /// Comparison against a single item field.
    Field(FieldCondition),
    /// Quantified match over author names.
    Authors(RelationMatch),
    /// Quantified match over titles of filters evaluated against the item.
    FiltersChecked(RelationMatch),
    /// Quantified match over titles of filters the item passed.
    FiltersPassed(RelationMatch),
}

impl Default for Condition {
    fn default() -> Self {
        Self::always()
    }
}

impl Condition {
    /// A condition every item satisfies.
    #[must_use]
    pub const fn always() -> Self {
        Self::All(Vec::new())
    }

    /// A condition no item satisfies.
    #[must_use]
    pub const fn never() -> Self {
        Self::Any(Vec::new())
    }

    /// Conjunction of the given conditions.
    #[must_use]
    pub const fn all(conditions: Vec<Self>) -> Self {
        Self::All(conditions)
    }

    /// Disjunction of the given conditions.
    #[must_use]
    pub const fn any(conditions: Vec<Self>) -> Self {
        Self::Any(conditions)
    }

    /// Field comparison.
    #[must_use]
    pub fn field(field: ItemField, op: FieldOp, value: impl Into<FieldValue>) -> Self {
        Self::Field(FieldCondition {
            field,
            op,
            value: value.into(),
        })
    }

    /// Items that passed at least one of the given filters.
    #[must_use]
    pub fn passed_some<I, S>(titles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::FiltersPassed(RelationMatch::Some(collect_names(titles)))
    }

    /// Items that passed none of the given filters.
    #[must_use]
    pub fn passed_none<I, S>(titles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::FiltersPassed(RelationMatch::None(collect_names(titles)))
    }

    /// Items not yet checked against any of the given filters.
    #[must_use]
    pub fn checked_none<I, S>(titles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::FiltersChecked(RelationMatch::None(collect_names(titles)))
    }

    /// Items with at least one of the given authors.
    #[must_use]
    pub fn authors_some<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Authors(RelationMatch::Some(collect_names(names)))
    }

    /// Items whose identifier is not in `ids`.
    #[must_use]
    pub fn exclude_ids(ids: &[ItemId]) -> Self {
        let values = ids
            .iter()
            .map(|id| FieldValue::Integer(id.get()))
            .collect::<Vec<_>>();
        Self::field(ItemField::Id, FieldOp::NotIn, FieldValue::List(values))
    }

    /// The single item with identifier `id`.
    #[must_use]
    pub fn id_eq(id: ItemId) -> Self {
        Self::field(ItemField::Id, FieldOp::Eq, id.get())
    }

    /// Returns the titles referenced anywhere under a `filters_passed` node.
    ///
    /// Order of first appearance is preserved and duplicates are dropped.
    #[must_use]
    pub fn relevant_filters(&self) -> Vec<String> {
        let mut titles = Vec::new();
        self.collect_passed_titles(&mut titles);
        titles
    }

    fn collect_passed_titles(&self, titles: &mut Vec<String>) {
        match self {
            Self::All(children) | Self::Any(children) => {
                for child in children {
                    child.collect_passed_titles(titles);
                }
            },
            Self::FiltersPassed(relation) => {
                for name in relation.names() {
                    if !titles.contains(name) {
                        titles.push(name.clone());
                    }
                }
            },
            Self::Field(_) | Self::Authors(_) | Self::FiltersChecked(_) => {},
        }
    }

    /// Returns a copy with every `filters_passed` node treated as satisfied.
    ///
    /// The result matches every item the original matches, and additionally
    /// items that could still qualify once their pending filters resolve.
    #[must_use]
    pub fn relaxed(&self) -> Self {
        self.relax().unwrap_or_else(Self::always)
    }

    /// `None` stands for a subtree that became trivially true.
    fn relax(&self) -> Option<Self> {
        match self {
            Self::FiltersPassed(_) => None,
            Self::All(children) => {
                let kept: Vec<Self> = children.iter().filter_map(Self::relax).collect();
                if kept.is_empty() {
                    None
                } else {
                    Some(Self::All(kept))
                }
            },
            Self::Any(children) => {
                let mut relaxed = Vec::with_capacity(children.len());
                for child in children {
                    relaxed.push(child.relax()?);
                }
                Some(Self::Any(relaxed))
            },
            Self::Field(_) | Self::Authors(_) | Self::FiltersChecked(_) => Some(self.clone()),
        }
    }

    /// Returns true if the condition references no `filters_passed` node.
    #[must_use]
    pub fn is_filter_free(&self) -> bool {
        self.relevant_filters().is_empty()
    }

    /// Evaluates the condition against an item snapshot.
    ///
    /// A field comparison whose operands are invalid evaluates to false;
    /// call [`Condition::validate`] up front to surface those as errors.
    #[must_use]
    pub fn matches(&self, item: &Item) -> bool {
        match self {
            Self::All(children) => children.iter().all(|child| child.matches(item)),
            Self::Any(children) => children.iter().any(|child| child.matches(item)),
            Self::Field(field) => field.matches(item),
            Self::Authors(relation) => relation.matches(&item.authors),
            Self::FiltersChecked(relation) => relation.matches(&item.filters_checked),
            Self::FiltersPassed(relation) => relation.matches(&item.filters_passed),
        }
    }

    /// Checks that every field comparison has operands of the right shape and type.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] naming the offending comparison.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::All(children) | Self::Any(children) => {
                children.iter().try_for_each(Self::validate)
            },
            Self::Field(field) => field.operands().map(|_| ()),
            Self::Authors(_) | Self::FiltersChecked(_) | Self::FiltersPassed(_) => Ok(()),
        }
    }
}

fn collect_names<I, S>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    names.into_iter().map(Into::into).collect()
}

/// Quantifier over a named relation (authors or filter titles).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationMatch {
    /// At least one related name is in the list.
    Some(Vec<String>),
    /// No related name is in the list.
    None(Vec<String>),
    /// Every related name is in the list (vacuously true for no relations).
    Every(Vec<String>),
}

impl RelationMatch {
    /// The names the quantifier ranges over.
    #[must_use]
    pub fn names(&self) -> &[String] {
        match self {
            Self::Some(names) | Self::None(names) | Self::Every(names) => names,
        }
    }

    /// Evaluates the quantifier against the related names.
    #[must_use]
    pub fn matches<'a, I>(&self, related: I) -> bool
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut related = related.into_iter();
        match self {
            Self::Some(names) => related.any(|name| names.contains(name)),
            Self::None(names) => !related.any(|name| names.contains(name)),
            Self::Every(names) => related.all(|name| names.contains(name)),
        }
    }
}

/// Item fields that can appear in comparisons and orderings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemField {
    /// Store identifier.
    Id,
    /// Source link.
    Link,
    /// Display type.
    ItemType,
    /// Source name.
    SourceName,
    /// Headline.
    Title,
    /// Description.
    Description,
    /// Publication time.
    DatePublished,
    /// Ingestion time.
    DateAdded,
    /// Word count.
    NumberOfWords,
    /// Like count.
    Likes,
    /// Seen flag.
    Seen,
    /// Saved flag.
    Saved,
    /// Read-later flag.
    ReadLater,
}

/// Value domain of an [`ItemField`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// 64-bit integer.
    Integer,
    /// UTF-8 text.
    Text,
    /// Boolean flag, compared as 0/1.
    Boolean,
    /// UTC timestamp, compared as Unix seconds.
    Timestamp,
}

impl ItemField {
    /// Returns the field name, which is also its column name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Link => "link",
            Self::ItemType => "item_type",
            Self::SourceName => "source_name",
            Self::Title => "title",
            Self::Description => "description",
            Self::DatePublished => "date_published",
            Self::DateAdded => "date_added",
            Self::NumberOfWords => "number_of_words",
            Self::Likes => "likes",
            Self::Seen => "seen",
            Self::Saved => "saved",
            Self::ReadLater => "read_later",
        }
    }

    /// Returns the value domain of the field.
    #[must_use]
    pub const fn kind(&self) -> FieldKind {
        match self {
            Self::Id | Self::NumberOfWords | Self::Likes => FieldKind::Integer,
            Self::Link | Self::ItemType | Self::SourceName | Self::Title | Self::Description => {
                FieldKind::Text
            },
            Self::DatePublished | Self::DateAdded => FieldKind::Timestamp,
            Self::Seen | Self::Saved | Self::ReadLater => FieldKind::Boolean,
        }
    }

    /// Reads the field from an item; `None` for absent optional values.
    #[must_use]
    pub fn value_of(&self, item: &Item) -> Option<Scalar> {
        match self {
            Self::Id => Some(Scalar::Integer(item.id.get())),
            Self::Link => Some(Scalar::Text(item.link.clone())),
            Self::ItemType => item.item_type.clone().map(Scalar::Text),
            Self::SourceName => Some(Scalar::Text(item.source_name.clone())),
            Self::Title => Some(Scalar::Text(item.title.clone())),
            Self::Description => item.description.clone().map(Scalar::Text),
            Self::DatePublished => item
                .date_published
                .map(|date| Scalar::Integer(date.timestamp())),
            Self::DateAdded => Some(Scalar::Integer(item.date_added.timestamp())),
            Self::NumberOfWords => item.number_of_words.map(Scalar::Integer),
            Self::Likes => item.likes.map(Scalar::Integer),
            Self::Seen => Some(Scalar::Integer(i64::from(item.seen))),
            Self::Saved => Some(Scalar::Integer(i64::from(item.saved))),
            Self::ReadLater => Some(Scalar::Integer(i64::from(item.read_later))),
        }
    }

    /// Converts a configured value into the field's comparable form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the value does not fit the field.
    pub fn coerce(&self, value: &FieldValue) -> Result<Scalar> {
        match (self.kind(), value) {
            (FieldKind::Text, FieldValue::Text(text)) => Ok(Scalar::Text(text.clone())),
            (FieldKind::Integer | FieldKind::Timestamp, FieldValue::Integer(n)) => {
                Ok(Scalar::Integer(*n))
            },
            (FieldKind::Boolean, FieldValue::Bool(flag)) => Ok(Scalar::Integer(i64::from(*flag))),
            (FieldKind::Timestamp, FieldValue::Text(text)) => DateTime::parse_from_rfc3339(text)
                .map(|date| Scalar::Integer(date.timestamp()))
                .map_err(|e| {
                    Error::InvalidInput(format!(
                        "field '{self}' expects an RFC 3339 timestamp, got '{text}': {e}"
                    ))
                }),
            _ => Err(Error::InvalidInput(format!(
                "value {value} is not valid for field '{self}'"
            ))),
        }
    }
}

impl fmt::Display for ItemField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldOp {
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Member of a list.
    In,
    /// Not a member of a list.
    NotIn,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Gte,
    /// Less than.
    Lt,
    /// Less than or equal.
    Lte,
    /// Text contains the value (case-sensitive).
    Contains,
}

impl FieldOp {
    /// Returns the operator name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::In => "in",
            Self::NotIn => "not_in",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Contains => "contains",
        }
    }

    /// Returns true for operators that take a list operand.
    #[must_use]
    pub const fn takes_list(&self) -> bool {
        matches!(self, Self::In | Self::NotIn)
    }
}

impl fmt::Display for FieldOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configured comparison value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Boolean literal.
    Bool(bool),
    /// Integer literal (also Unix seconds for timestamp fields).
    Integer(i64),
    /// Text literal (also RFC 3339 for timestamp fields).
    Text(String),
    /// List literal for `in` / `not_in`.
    List(Vec<Self>),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(flag) => write!(f, "{flag}"),
            Self::Integer(n) => write!(f, "{n}"),
            Self::Text(text) => write!(f, "\"{text}\""),
            Self::List(values) => {
                f.write_str("[")?;
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{value}")?;
                }
                f.write_str("]")
            },
        }
    }
}

impl From<bool> for FieldValue {
    fn from(flag: bool) -> Self {
        Self::Bool(flag)
    }
}

impl From<i64> for FieldValue {
    fn from(n: i64) -> Self {
        Self::Integer(n)
    }
}

impl From<i32> for FieldValue {
    fn from(n: i32) -> Self {
        Self::Integer(i64::from(n))
    }
}

impl From<&str> for FieldValue {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(date: DateTime<Utc>) -> Self {
        Self::Integer(date.timestamp())
    }
}

impl<T: Into<Self>> From<Vec<T>> for FieldValue {
    fn from(values: Vec<T>) -> Self {
        Self::List(values.into_iter().map(Into::into).collect())
    }
}

/// A comparable value read from an item or coerced from configuration.
///
/// The derived ordering sorts integers before text, and text bytewise, which
/// is how `SQLite` orders mixed columns under the binary collation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Scalar {
    /// Integers, flags and timestamps.
    Integer(i64),
    /// Text.
    Text(String),
}

impl Scalar {
    fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Integer(a), Self::Integer(b)) => Some(a.cmp(b)),
            (Self::Text(a), Self::Text(b)) => Some(a.as_bytes().cmp(b.as_bytes())),
            _ => None,
        }
    }
}

/// Operands of a comparison after coercion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operands {
    /// Scalar operand.
    One(Scalar),
    /// List operand.
    Many(Vec<Scalar>),
}

/// `name op value` comparison against one item field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldCondition {
    /// The compared field.
    #[serde(rename = "name")]
    pub field: ItemField,
    /// The operator.
    pub op: FieldOp,
    /// The configured operand.
    pub value: FieldValue,
}

impl FieldCondition {
    /// Coerces the configured value for this field and operator.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the operand shape or type is wrong.
    pub fn operands(&self) -> Result<Operands> {
        if self.op == FieldOp::Contains && self.field.kind() != FieldKind::Text {
            return Err(Error::InvalidInput(format!(
                "operator 'contains' requires a text field, '{}' is not one",
                self.field
            )));
        }
        match (&self.value, self.op.takes_list()) {
            (FieldValue::List(values), true) => values
                .iter()
                .map(|value| self.field.coerce(value))
                .collect::<Result<Vec<_>>>()
                .map(Operands::Many),
            (value, false) if !matches!(value, FieldValue::List(_)) => {
                self.field.coerce(value).map(Operands::One)
            },
            (value, expects_list) => Err(Error::InvalidInput(format!(
                "operator '{}' on '{}' expects {}, got {value}",
                self.op,
                self.field,
                if expects_list { "a list" } else { "a single value" }
            ))),
        }
    }

    /// Evaluates the comparison. Absent values never match.
    #[must_use]
    pub fn matches(&self, item: &Item) -> bool {
        let (Some(actual), Ok(operands)) = (self.field.value_of(item), self.operands()) else {
            return false;
        };
        match (self.op, operands) {
            (FieldOp::In, Operands::Many(values)) => values.contains(&actual),
            (FieldOp::NotIn, Operands::Many(values)) => !values.contains(&actual),
            (FieldOp::Contains, Operands::One(Scalar::Text(needle))) => {
                matches!(&actual, Scalar::Text(haystack) if haystack.contains(needle.as_str()))
            },
            (op, Operands::One(expected)) => {
                actual
                    .compare(&expected)
                    .is_some_and(|ordering| match op {
                        FieldOp::Eq => ordering == Ordering::Equal,
                        FieldOp::Ne => ordering != Ordering::Equal,
                        FieldOp::Gt => ordering == Ordering::Greater,
                        FieldOp::Gte => ordering != Ordering::Less,
                        FieldOp::Lt => ordering == Ordering::Less,
                        FieldOp::Lte => ordering != Ordering::Greater,
                        FieldOp::In | FieldOp::NotIn | FieldOp::Contains => false,
                    })
            },
            _ => false,
        }
    }
}
