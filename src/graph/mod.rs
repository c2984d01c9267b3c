//! Knowledge graph module: data model, snapshot store and diff application.
//!
//! Nodes are typed entities keyed by a string id; edges are typed, directed
//! relationships between two node ids. Graphs live in named snapshots inside
//! a single SQLite file (see [`GraphStore`]).

mod diff;
mod label;
mod store;
mod traversal;

pub use diff::{apply_diff, apply_steps, Diff, DiffReport, DiffStep, NodeUpdate, RelationshipModification};
pub use label::{Label, DEFAULT_NODE_LABEL, DEFAULT_RELATIONSHIP_TYPE};
pub use store::{EmbeddingCandidate, EmbeddingTarget, GraphStore, GroupFailure, SnapshotInfo, UpsertReport};
pub use traversal::{project_facts, FACT_SEPARATOR};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// Property key holding a node's descriptive text.
pub const CONTENT_KEY: &str = "content";

/// Property key holding a node's or relationship's stored vector.
pub const EMBEDDING_KEY: &str = "embedding";

/// A typed entity in the knowledge graph.
///
/// On the wire a node is `{"id", "type", "content", ...}`; any additional
/// fields are carried in `properties` and merged on upsert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub content: String,
    #[serde(flatten)]
    pub properties: Map<String, Value>,
}

impl Node {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            content: content.into(),
            properties: Map::new(),
        }
    }

    /// Property bag as stored: `content` plus every extra property.
    pub(crate) fn property_bag(&self) -> Map<String, Value> {
        let mut bag: Map<String, Value> = self
            .properties
            .iter()
            .filter(|(k, _)| k.as_str() != "id" && k.as_str() != "type")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        bag.insert(CONTENT_KEY.to_string(), Value::String(self.content.clone()));
        bag
    }

    /// Rebuild a node from a stored label and property bag.
    pub(crate) fn from_bag(id: String, label: String, mut bag: Map<String, Value>) -> Self {
        let content = match bag.remove(CONTENT_KEY) {
            Some(Value::String(s)) => s,
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };
        Self {
            id,
            node_type: label,
            content,
            properties: bag,
        }
    }
}

/// A directed, typed relationship between two node ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub rel_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl Edge {
    pub fn new(source: impl Into<String>, target: impl Into<String>, rel_type: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            rel_type: rel_type.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Identity of this edge in the store (type sanitized).
    pub fn key(&self) -> EdgeKey {
        EdgeKey::new(&self.source, &self.target, &self.rel_type)
    }

    /// Flat textual rendering used for similarity matching: `"source TYPE target"`.
    pub fn fact(&self) -> String {
        format!("{} {} {}", self.source, self.rel_type, self.target)
    }
}

/// `(source, target, type)` triple identifying an edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EdgeKey {
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub rel_type: String,
}

impl EdgeKey {
    pub fn new(source: &str, target: &str, rel_type: &str) -> Self {
        Self {
            source: source.to_string(),
            target: target.to_string(),
            rel_type: Label::relationship(rel_type).into_string(),
        }
    }
}

/// A whole graph: what extraction produces and what a snapshot read returns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphData {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub relationships: Vec<Edge>,
}

impl GraphData {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.relationships.is_empty()
    }

    pub fn node_ids(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.id.as_str()).collect()
    }

    /// Every edge rendered as a `"source TYPE target"` fact string.
    pub fn facts(&self) -> Vec<String> {
        self.relationships.iter().map(Edge::fact).collect()
    }

    /// Distinct node ids and relationship types, in first-seen order.
    pub fn terms(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.nodes
            .iter()
            .map(|n| n.id.as_str())
            .chain(self.relationships.iter().map(|e| e.rel_type.as_str()))
            .filter(|t| !t.is_empty() && seen.insert(*t))
            .map(str::to_string)
            .collect()
    }

    /// JSON rendering handed to the model. Stored vectors are left out.
    pub fn to_prompt_json(&self) -> String {
        let mut view = self.clone();
        for node in &mut view.nodes {
            node.properties.remove(EMBEDDING_KEY);
        }
        serde_json::to_string_pretty(&view).unwrap_or_else(|_| "{}".to_string())
    }
}

/// The closed set of node types the extraction prompt allows.
#[derive(Debug, Clone)]
pub struct NodeTypes {
    allowed: Vec<String>,
}

impl NodeTypes {
    pub fn new(allowed: Vec<String>) -> Self {
        Self { allowed }
    }

    pub fn as_slice(&self) -> &[String] {
        &self.allowed
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.allowed.iter().any(|t| t == node_type)
    }

    /// Replace out-of-set node types with the default label.
    ///
    /// An empty allow-list accepts everything.
    pub fn normalize(&self, nodes: &mut [Node]) -> usize {
        if self.allowed.is_empty() {
            return 0;
        }
        let mut replaced = 0;
        for node in nodes.iter_mut() {
            if !self.contains(&node.node_type) {
                log::warn!(
                    "Node {} has type '{}' outside the allowed set, storing as {}",
                    node.id,
                    node.node_type,
                    DEFAULT_NODE_LABEL
                );
                node.node_type = DEFAULT_NODE_LABEL.to_string();
                replaced += 1;
            }
        }
        replaced
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_node_wire_format_with_extra_fields() {
        let node: Node = serde_json::from_value(json!({
            "id": "Alice",
            "type": "人物信息",
            "content": "a detective",
            "age": 31
        }))
        .unwrap();

        assert_eq!(node.node_type, "人物信息");
        assert_eq!(node.properties.get("age"), Some(&json!(31)));

        let bag = node.property_bag();
        assert_eq!(bag.get("content"), Some(&json!("a detective")));
        assert!(!bag.contains_key("id"));
    }

    #[test]
    fn test_node_requires_content() {
        let result: std::result::Result<Node, _> =
            serde_json::from_value(json!({"id": "Alice", "type": "人物信息"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_edge_key_sanitizes_type() {
        let edge = Edge::new("Alice", "Acme", "works at");
        assert_eq!(edge.key().rel_type, "WORKSAT");
        assert_eq!(edge.fact(), "Alice works at Acme");
    }

    #[test]
    fn test_terms_are_distinct() {
        let graph = GraphData {
            nodes: vec![Node::new("Alice", "人物信息", ""), Node::new("Acme", "组织信息", "")],
            relationships: vec![
                Edge::new("Alice", "Acme", "WORKS_AT"),
                Edge::new("Acme", "Alice", "WORKS_AT"),
            ],
        };
        assert_eq!(graph.terms(), vec!["Alice", "Acme", "WORKS_AT"]);
        assert_eq!(graph.facts().len(), 2);
    }

    #[test]
    fn test_node_types_normalize() {
        let types = NodeTypes::new(vec!["人物信息".to_string()]);
        let mut nodes = vec![Node::new("Alice", "人物信息", ""), Node::new("X", "Weapon", "")];
        assert_eq!(types.normalize(&mut nodes), 1);
        assert_eq!(nodes[1].node_type, "Entity");
    }

    #[test]
    fn test_prompt_json_omits_embeddings() {
        let mut node = Node::new("Alice", "人物信息", "a detective");
        node.properties.insert(EMBEDDING_KEY.to_string(), json!([0.1, 0.2]));
        node.properties.insert("age".to_string(), json!(31));
        let graph = GraphData {
            nodes: vec![node],
            relationships: Vec::new(),
        };

        let rendered = graph.to_prompt_json();
        assert!(!rendered.contains(EMBEDDING_KEY));
        assert!(rendered.contains("\"age\": 31"));
        assert!(graph.nodes[0].properties.contains_key(EMBEDDING_KEY));
    }
}
