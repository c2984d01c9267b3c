//! Validated structural tags for nodes and relationships.
//!
//! Node types and relationship types arrive from model output and end up as
//! the store's type tag. They are reduced to an identifier-safe alphabet here,
//! before they reach the store.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Fallback tag for nodes whose type sanitizes to nothing.
pub const DEFAULT_NODE_LABEL: &str = "Entity";
/// Fallback tag for relationships whose type sanitizes to nothing.
pub const DEFAULT_RELATIONSHIP_TYPE: &str = "RELATED_TO";

/// A sanitized node label or relationship type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Label(String);

impl Label {
    /// Node label: alphanumeric characters only (Unicode-aware).
    pub fn node(raw: &str) -> Self {
        let safe: String = raw.chars().filter(|c| c.is_alphanumeric()).collect();
        if safe.is_empty() {
            Label(DEFAULT_NODE_LABEL.to_string())
        } else {
            Label(safe)
        }
    }

    /// Relationship type: alphanumerics and `_`, upper-cased.
    pub fn relationship(raw: &str) -> Self {
        let safe: String = raw
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_')
            .collect::<String>()
            .to_uppercase();
        if safe.is_empty() {
            Label(DEFAULT_RELATIONSHIP_TYPE.to_string())
        } else {
            Label(safe)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Label {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
