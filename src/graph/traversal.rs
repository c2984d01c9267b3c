//! Local subgraph projection around a set of entities.

use std::collections::HashSet;

use super::GraphStore;
use crate::Result;

/// Separator used when a projected subgraph is rendered as one text.
pub const FACT_SEPARATOR: &str = "。 ";

/// Facts (`"source TYPE target"`) of relationships touching any of `entities`.
///
/// At most `limit` relationships are projected. Duplicate entity names are
/// collapsed before querying.
pub async fn project_facts(
    store: &GraphStore,
    snapshot: &str,
    entities: &[String],
    limit: usize,
) -> Result<Vec<String>> {
    let mut seen = HashSet::new();
    let unique: Vec<String> = entities
        .iter()
        .filter(|e| !e.is_empty() && seen.insert(e.as_str()))
        .cloned()
        .collect();

    let edges = store.edges_touching(snapshot, unique, limit).await?;
    Ok(edges.iter().map(|e| e.fact()).collect())
}
