//! Typed attribute values used by constraint and preference matching

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Scalar value attached to a resource attribute or used as a match operand
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Number(f64),
    Text(String),
    Set(BTreeSet<String>),
}

impl AttributeValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            AttributeValue::Number(n) => Some(*n),
            AttributeValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// The value viewed as a set of strings (a single text is a one-element set)
    pub fn as_set(&self) -> BTreeSet<String> {
        match self {
            AttributeValue::Text(s) => BTreeSet::from([s.clone()]),
            AttributeValue::Set(set) => set.clone(),
            AttributeValue::Bool(b) => BTreeSet::from([b.to_string()]),
            AttributeValue::Number(n) => BTreeSet::from([n.to_string()]),
        }
    }

    /// Equality that compares numbers numerically, even when one side is text
    pub fn loosely_equals(&self, other: &AttributeValue) -> bool {
        match (self, other) {
            (AttributeValue::Number(_), _) | (_, AttributeValue::Number(_)) => {
                match (self.as_number(), other.as_number()) {
                    (Some(a), Some(b)) => (a - b).abs() < f64::EPSILON,
                    _ => false,
                }
            }
            _ => self == other,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Bool(b) => write!(f, "{}", b),
            AttributeValue::Number(n) => write!(f, "{}", n),
            AttributeValue::Text(s) => write!(f, "{}", s),
            AttributeValue::Set(set) => {
                let items: Vec<&str> = set.iter().map(String::as_str).collect();
                write!(f, "{{{}}}", items.join(","))
            }
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::Text(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::Text(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::Number(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

impl<const N: usize> From<[&str; N]> for AttributeValue {
    fn from(values: [&str; N]) -> Self {
        AttributeValue::Set(values.iter().map(|s| s.to_string()).collect())
    }
}
