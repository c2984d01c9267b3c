//! Write embeddings back into a graph snapshot.
//!
//! Nodes are embedded from their `content` (or a `context` property when the
//! content is blank), relationships from their `context`. Items that already
//! carry an `embedding` are left alone, so a rerun only fills the gaps.

use serde::Serialize;

use super::Embedder;
use crate::graph::{EmbeddingTarget, GraphStore};
use crate::Result;

/// Counts from one [`embed_snapshot`] run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BackfillReport {
    pub nodes_embedded: usize,
    pub nodes_skipped: usize,
    pub relationships_embedded: usize,
    pub relationships_skipped: usize,
    /// Items with no text to embed.
    pub without_text: usize,
    /// Batches the embedder rejected; their items stay unembedded.
    pub failed_batches: usize,
}

impl BackfillReport {
    pub fn embedded(&self) -> usize {
        self.nodes_embedded + self.relationships_embedded
    }
}

/// Embed every node and relationship of `snapshot` that has no `embedding`
/// yet, `batch_size` texts per request.
///
/// A failed batch is logged and counted; the remaining batches still run.
pub async fn embed_snapshot(
    store: &GraphStore,
    snapshot: &str,
    embedder: &dyn Embedder,
    batch_size: usize,
) -> Result<BackfillReport> {
    let batch_size = batch_size.max(1);
    let mut report = BackfillReport::default();
    let mut pending: Vec<(EmbeddingTarget, String)> = Vec::new();

    for candidate in store.embedding_candidates(snapshot).await? {
        if candidate.embedded {
            match candidate.target {
                EmbeddingTarget::Node(_) => report.nodes_skipped += 1,
                EmbeddingTarget::Relationship(_) => report.relationships_skipped += 1,
            }
            continue;
        }
        match candidate.text {
            Some(text) => pending.push((candidate.target, single_line(&text))),
            None => report.without_text += 1,
        }
    }
    log::info!(
        "Snapshot {}: {} items to embed with {} ({} already embedded, {} without text)",
        snapshot,
        pending.len(),
        embedder.model_name(),
        report.nodes_skipped + report.relationships_skipped,
        report.without_text
    );

    for (i, batch) in pending.chunks(batch_size).enumerate() {
        let texts: Vec<String> = batch.iter().map(|(_, text)| text.clone()).collect();
        let vectors = match embedder.embed_batch(texts).await {
            Ok(vectors) if vectors.len() == batch.len() => vectors,
            Ok(vectors) => {
                log::warn!(
                    "Batch {}: expected {} embeddings, got {}",
                    i + 1,
                    batch.len(),
                    vectors.len()
                );
                report.failed_batches += 1;
                continue;
            }
            Err(e) => {
                log::warn!("Batch {} failed: {}", i + 1, e);
                report.failed_batches += 1;
                continue;
            }
        };

        let writes: Vec<(EmbeddingTarget, Vec<f32>)> = batch
            .iter()
            .map(|(target, _)| target.clone())
            .zip(vectors)
            .collect();
        for (target, _) in &writes {
            match target {
                EmbeddingTarget::Node(_) => report.nodes_embedded += 1,
                EmbeddingTarget::Relationship(_) => report.relationships_embedded += 1,
            }
        }
        store.set_embeddings(snapshot, writes).await?;
        log::debug!("Batch {} written ({} items)", i + 1, batch.len());
    }

    log::info!(
        "Snapshot {}: embedded {} nodes and {} relationships, {} failed batches",
        snapshot,
        report.nodes_embedded,
        report.relationships_embedded,
        report.failed_batches
    );
    Ok(report)
}

fn single_line(text: &str) -> String {
    text.replace(['\r', '\n'], " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;
    use crate::embeddings::testing::TableEmbedder;
    use crate::error::GraphRefineError;
    use crate::graph::{Edge, GraphData, Node};
    use serde_json::json;
    use tempfile::TempDir;

    async fn seeded_store() -> (TempDir, GraphStore) {
        let temp_dir = TempDir::new().unwrap();
        let store = GraphStore::open(Db::new(temp_dir.path().join("graphs.db")))
            .await
            .unwrap();
        let mut ledger = Node::new("Ledger", "物品信息", "");
        ledger.properties.insert("context".to_string(), json!("kept in\nthe vault"));
        let graph = GraphData {
            nodes: vec![
                Node::new("Alice", "人物信息", "a detective"),
                Node::new("Acme", "组织信息", "a company"),
                ledger,
                Node::new("Blank", "物品信息", ""),
            ],
            relationships: vec![
                Edge::new("Alice", "Acme", "WORKS_AT").with_context("since 2019"),
                Edge::new("Acme", "Alice", "EMPLOYS"),
            ],
        };
        store.upsert_graph("graph1", graph).await.unwrap();
        (temp_dir, store)
    }

    #[tokio::test]
    async fn test_embed_snapshot_fills_gaps_once() {
        let (_dir, store) = seeded_store().await;
        let embedder = TableEmbedder::new(&[("kept in the vault", vec![0.0, 1.0])], vec![1.0, 0.0]);

        let report = embed_snapshot(&store, "graph1", &embedder, 2).await.unwrap();

        assert_eq!(report.nodes_embedded, 3);
        assert_eq!(report.relationships_embedded, 1);
        assert_eq!(report.without_text, 2);
        assert_eq!(report.failed_batches, 0);
        assert_eq!(embedder.calls(), 2);

        let graph = store.read("graph1").await.unwrap();
        let ledger = graph.nodes.iter().find(|n| n.id == "Ledger").unwrap();
        // Newlines are flattened before embedding, so the table entry matched.
        assert_eq!(ledger.properties.get("embedding"), Some(&json!([0.0, 1.0])));
        let blank = graph.nodes.iter().find(|n| n.id == "Blank").unwrap();
        assert!(!blank.properties.contains_key("embedding"));

        let rerun = embed_snapshot(&store, "graph1", &embedder, 2).await.unwrap();
        assert_eq!(rerun.embedded(), 0);
        assert_eq!(rerun.nodes_skipped, 3);
        assert_eq!(rerun.relationships_skipped, 1);
        assert_eq!(embedder.calls(), 2);
    }

    #[tokio::test]
    async fn test_failed_batches_leave_items_unembedded() {
        let (_dir, store) = seeded_store().await;
        let embedder = TableEmbedder::failing();

        let report = embed_snapshot(&store, "graph1", &embedder, 50).await.unwrap();

        assert_eq!(report.failed_batches, 1);
        assert_eq!(report.embedded(), 0);
        let candidates = store.embedding_candidates("graph1").await.unwrap();
        assert!(candidates.iter().all(|c| !c.embedded));
    }

    #[tokio::test]
    async fn test_embed_missing_snapshot() {
        let (_dir, store) = seeded_store().await;
        let embedder = TableEmbedder::new(&[], vec![1.0]);
        let err = embed_snapshot(&store, "nope", &embedder, 50).await.unwrap_err();
        assert!(matches!(err, GraphRefineError::SnapshotNotFound(_)));
        assert_eq!(embedder.calls(), 0);
    }
}
