//! Passage metadata values and filter predicates.
//!
//! Metadata is a free-form map attached to each passage. Values are a small
//! tagged union rather than raw JSON so filter-operator dispatch is a match
//! over the tag, and so unsupported shapes (nested objects) are rejected at
//! the boundary instead of surfacing as filter surprises later.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A metadata value: string, number, bool, list, or null.
///
/// Serialized untagged, so a passage's metadata round-trips through the
/// JSONL passage log as plain JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
    List(Vec<Value>),
}

impl Value {
    /// Loose equality used by the `==`/`!=`/`in` operators: numbers compare
    /// numerically, everything else by exact tag + value.
    #[must_use]
    pub fn loosely_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Num(a), Value::Num(b)) => a == b,
            (a, b) => a == b,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Num(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Num(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// Ordered metadata map, keyed by field name.
pub type MetadataMap = BTreeMap<String, Value>;

/// Filter operator applied to a single metadata field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    /// Field equals operand.
    Eq,
    /// Field does not equal operand.
    Ne,
    /// Field is numerically/lexicographically less than operand.
    Lt,
    /// Field is numerically/lexicographically greater than operand.
    Gt,
    /// Field is one of the operand list's elements.
    In,
    /// Field is none of the operand list's elements.
    NotIn,
    /// Field (string or list) contains the operand.
    Contains,
    /// Field string starts with the operand string.
    StartsWith,
}

/// One filter condition: `field <op> operand`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterCondition {
    pub field: String,
    pub op: FilterOp,
    pub operand: Value,
}

impl FilterCondition {
    /// Evaluate this condition against a passage's metadata.
    ///
    /// A field missing from the metadata makes the condition false (the
    /// candidate is excluded), never an error.
    #[must_use]
    pub fn matches(&self, metadata: &MetadataMap) -> bool {
        let Some(value) = metadata.get(&self.field) else {
            return false;
        };
        match self.op {
            FilterOp::Eq => value.loosely_equals(&self.operand),
            FilterOp::Ne => !value.loosely_equals(&self.operand),
            FilterOp::Lt => match (value, &self.operand) {
                (Value::Num(a), Value::Num(b)) => a < b,
                (Value::Str(a), Value::Str(b)) => a < b,
                _ => false,
            },
            FilterOp::Gt => match (value, &self.operand) {
                (Value::Num(a), Value::Num(b)) => a > b,
                (Value::Str(a), Value::Str(b)) => a > b,
                _ => false,
            },
            FilterOp::In => match &self.operand {
                Value::List(items) => items.iter().any(|item| value.loosely_equals(item)),
                _ => false,
            },
            FilterOp::NotIn => match &self.operand {
                Value::List(items) => !items.iter().any(|item| value.loosely_equals(item)),
                _ => false,
            },
            FilterOp::Contains => match (value, &self.operand) {
                (Value::Str(haystack), Value::Str(needle)) => haystack.contains(needle.as_str()),
                (Value::List(items), needle) => {
                    items.iter().any(|item| item.loosely_equals(needle))
                }
                _ => false,
            },
            FilterOp::StartsWith => match (value, &self.operand) {
                (Value::Str(s), Value::Str(prefix)) => s.starts_with(prefix.as_str()),
                _ => false,
            },
        }
    }
}

/// A conjunction of filter conditions (all must hold).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataFilter {
    pub conditions: Vec<FilterCondition>,
}

impl MetadataFilter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a condition; returns self for chaining.
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, op: FilterOp, operand: impl Into<Value>) -> Self {
        self.conditions.push(FilterCondition {
            field: field.into(),
            op,
            operand: operand.into(),
        });
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// True if every condition holds for the given metadata.
    #[must_use]
    pub fn matches(&self, metadata: &MetadataMap) -> bool {
        self.conditions.iter().all(|c| c.matches(metadata))
    }
}
