//! SQLite-backed snapshot store.
//!
//! Writes are idempotent merges: nodes are keyed by `(snapshot, id)` and
//! edges by `(snapshot, source, target, type)`. Items are grouped by their
//! sanitized label and each group commits in its own transaction, so a
//! failing group is rolled back and reported without aborting the rest.

use chrono::Utc;
use rusqlite::{params, Connection};
use serde::Serialize;
use serde_json::{Map, Value};

use super::{Edge, EdgeKey, GraphData, Label, Node};
use crate::db::Db;
use crate::error::{GraphRefineError, Result};

const NODE_UPSERT: &str = "INSERT INTO nodes (snapshot, id, label, properties) VALUES (?1, ?2, ?3, ?4) \
     ON CONFLICT(snapshot, id) DO UPDATE SET \
         label = excluded.label, \
         properties = json_patch(nodes.properties, excluded.properties)";

const EDGE_UPSERT: &str = "INSERT INTO edges (snapshot, source, target, rel_type, properties) VALUES (?1, ?2, ?3, ?4, ?5) \
     ON CONFLICT(snapshot, source, target, rel_type) DO UPDATE SET \
         properties = json_patch(edges.properties, excluded.properties)";

const NODE_EXISTS: &str = "SELECT EXISTS(SELECT 1 FROM nodes WHERE snapshot = ?1 AND id = ?2)";

const EDGE_EXISTS: &str = "SELECT EXISTS(SELECT 1 FROM edges \
     WHERE snapshot = ?1 AND source = ?2 AND target = ?3 AND rel_type = ?4)";

/// Outcome of a batch write.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UpsertReport {
    /// Items that did not exist before.
    pub created: usize,
    /// Items merged into an existing node or edge.
    pub merged: usize,
    /// Items skipped: empty ids or relationships whose endpoints are missing.
    pub dropped: usize,
    /// Label groups whose transaction was rolled back.
    pub failed_groups: Vec<GroupFailure>,
}

impl UpsertReport {
    pub fn written(&self) -> usize {
        self.created + self.merged
    }

    pub fn absorb(&mut self, other: UpsertReport) {
        self.created += other.created;
        self.merged += other.merged;
        self.dropped += other.dropped;
        self.failed_groups.extend(other.failed_groups);
    }
}

/// A label group that failed to write.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupFailure {
    pub label: String,
    pub error: String,
}

/// Summary row for `list_snapshots`.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotInfo {
    pub name: String,
    pub created_at: String,
    pub copied_from: Option<String>,
    pub node_count: usize,
    pub edge_count: usize,
}

/// A node or relationship that can carry an `embedding` property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmbeddingTarget {
    Node(String),
    Relationship(EdgeKey),
}

/// Embedding state of one item: the text it would be embedded from, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingCandidate {
    pub target: EmbeddingTarget,
    pub text: Option<String>,
    pub embedded: bool,
}

/// Named graph snapshots in one SQLite database.
#[derive(Debug, Clone)]
pub struct GraphStore {
    db: Db,
}

impl GraphStore {
    /// Open the store, applying pending migrations.
    pub async fn open(db: Db) -> Result<Self> {
        db.migrate().await?;
        Ok(Self { db })
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    /// Create an empty snapshot if it does not exist yet.
    pub async fn ensure_snapshot(&self, name: &str) -> Result<()> {
        let name = checked_name(name)?;
        self.db
            .with_connection(move |conn| ensure_snapshot(conn, &name, None))
            .await
    }

    pub async fn snapshot_exists(&self, name: &str) -> Result<bool> {
        let name = name.to_string();
        self.db
            .with_connection(move |conn| snapshot_exists(conn, &name))
            .await
    }

    /// Merge nodes into a snapshot, creating the snapshot on first write.
    pub async fn upsert_nodes(&self, snapshot: &str, nodes: Vec<Node>) -> Result<UpsertReport> {
        let snapshot = checked_name(snapshot)?;
        self.db
            .with_connection(move |conn| upsert_nodes(conn, &snapshot, nodes))
            .await
    }

    /// Merge relationships into a snapshot. Relationships whose endpoints are
    /// not both present are dropped and counted.
    pub async fn upsert_edges(&self, snapshot: &str, edges: Vec<Edge>) -> Result<UpsertReport> {
        let snapshot = checked_name(snapshot)?;
        self.db
            .with_connection(move |conn| upsert_edges(conn, &snapshot, edges))
            .await
    }

    /// Nodes first, then relationships.
    pub async fn upsert_graph(&self, snapshot: &str, graph: GraphData) -> Result<(UpsertReport, UpsertReport)> {
        let snapshot = checked_name(snapshot)?;
        self.db
            .with_connection(move |conn| {
                let nodes = upsert_nodes(conn, &snapshot, graph.nodes)?;
                let edges = upsert_edges(conn, &snapshot, graph.relationships)?;
                Ok((nodes, edges))
            })
            .await
    }

    /// Every node and relationship of a snapshot, in insertion order.
    pub async fn read(&self, snapshot: &str) -> Result<GraphData> {
        let snapshot = snapshot.to_string();
        self.db
            .with_connection(move |conn| read_snapshot(conn, &snapshot))
            .await
    }

    /// Replace `target` with the contents of `source`.
    pub async fn copy(&self, source: &str, target: &str) -> Result<UpsertReport> {
        let source = checked_name(source)?;
        let target = checked_name(target)?;
        if source == target {
            return Err(GraphRefineError::InvalidInput(format!(
                "Cannot copy snapshot {} onto itself",
                source
            )));
        }

        let report = self
            .db
            .with_connection(move |conn| {
                let graph = read_snapshot(conn, &source)?;
                discard(conn, &target)?;
                ensure_snapshot(conn, &target, Some(source.as_str()))?;
                let mut report = upsert_nodes(conn, &target, graph.nodes)?;
                report.absorb(upsert_edges(conn, &target, graph.relationships)?);
                // Edges are read back as context only; carry their full bags across.
                conn.execute(
                    "UPDATE edges SET properties = json_patch(edges.properties, src.properties) \
                     FROM edges AS src \
                     WHERE src.snapshot = ?1 AND edges.snapshot = ?2 \
                       AND src.source = edges.source AND src.target = edges.target \
                       AND src.rel_type = edges.rel_type",
                    params![source, target],
                )?;
                Ok(report)
            })
            .await?;

        log::debug!(
            "Copied snapshot ({} items written, {} dropped)",
            report.written(),
            report.dropped
        );
        Ok(report)
    }

    /// Remove a snapshot and everything in it. Returns false if it did not exist.
    pub async fn discard(&self, snapshot: &str) -> Result<bool> {
        let snapshot = snapshot.to_string();
        self.db
            .with_connection(move |conn| discard(conn, &snapshot))
            .await
    }

    pub async fn list_snapshots(&self) -> Result<Vec<SnapshotInfo>> {
        self.db
            .with_connection(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT s.name, s.created_at, s.copied_from, \
                         (SELECT COUNT(*) FROM nodes n WHERE n.snapshot = s.name), \
                         (SELECT COUNT(*) FROM edges e WHERE e.snapshot = s.name) \
                     FROM snapshots s ORDER BY s.created_at, s.name",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok(SnapshotInfo {
                        name: row.get(0)?,
                        created_at: row.get(1)?,
                        copied_from: row.get(2)?,
                        node_count: row.get::<_, i64>(3)? as usize,
                        edge_count: row.get::<_, i64>(4)? as usize,
                    })
                })?;
                let mut out = Vec::new();
                for row in rows {
                    out.push(row?);
                }
                Ok(out)
            })
            .await
    }

    /// Append text to a node's content, separated by a single space.
    ///
    /// Returns false when the node does not exist.
    pub async fn append_content(&self, snapshot: &str, node_id: &str, addition: &str) -> Result<bool> {
        let snapshot = snapshot.to_string();
        let node_id = node_id.to_string();
        let addition = addition.to_string();
        self.db
            .with_connection(move |conn| {
                let changed = conn.execute(
                    "UPDATE nodes SET properties = json_set(properties, '$.content', \
                         CASE WHEN COALESCE(json_extract(properties, '$.content'), '') = '' THEN ?3 \
                              ELSE json_extract(properties, '$.content') || ' ' || ?3 END) \
                     WHERE snapshot = ?1 AND id = ?2",
                    params![snapshot, node_id, addition],
                )?;
                Ok(changed > 0)
            })
            .await
    }

    /// Delete one relationship. Returns false when no such relationship exists.
    pub async fn delete_edge(&self, snapshot: &str, key: &EdgeKey) -> Result<bool> {
        let snapshot = snapshot.to_string();
        let key = key.clone();
        self.db
            .with_connection(move |conn| {
                let changed = conn.execute(
                    "DELETE FROM edges WHERE snapshot = ?1 AND source = ?2 AND target = ?3 AND rel_type = ?4",
                    params![snapshot, key.source, key.target, key.rel_type],
                )?;
                Ok(changed > 0)
            })
            .await
    }

    /// Relationships with either endpoint in `entities`, in insertion order.
    pub async fn edges_touching(&self, snapshot: &str, entities: Vec<String>, limit: usize) -> Result<Vec<Edge>> {
        if entities.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let snapshot = snapshot.to_string();
        let ids = serde_json::to_string(&entities)
            .map_err(|e| GraphRefineError::InvalidInput(format!("Cannot encode entity list: {}", e)))?;
        self.db
            .with_connection(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT source, target, rel_type, properties FROM edges \
                     WHERE snapshot = ?1 \
                       AND (source IN (SELECT value FROM json_each(?2)) \
                            OR target IN (SELECT value FROM json_each(?2))) \
                     ORDER BY rowid LIMIT ?3",
                )?;
                let rows = stmt.query_map(params![snapshot, ids, limit as i64], edge_from_row)?;
                let mut out = Vec::new();
                for row in rows {
                    out.push(row?);
                }
                Ok(out)
            })
            .await
    }

    /// Every node, then every relationship, with the text an embedding is
    /// computed from and whether one is already stored.
    ///
    /// Node text is `content`, falling back to a `context` property; edge
    /// text is `context`. Blank text comes back as `None`.
    pub async fn embedding_candidates(&self, snapshot: &str) -> Result<Vec<EmbeddingCandidate>> {
        let snapshot = snapshot.to_string();
        self.db
            .with_connection(move |conn| {
                if !snapshot_exists(conn, &snapshot)? {
                    return Err(GraphRefineError::SnapshotNotFound(snapshot));
                }
                let mut out = Vec::new();

                let mut stmt = conn.prepare(
                    "SELECT id, \
                         CAST(COALESCE(NULLIF(json_extract(properties, '$.content'), ''), \
                                       json_extract(properties, '$.context')) AS TEXT), \
                         json_extract(properties, '$.embedding') IS NOT NULL \
                     FROM nodes WHERE snapshot = ?1 ORDER BY rowid",
                )?;
                let rows = stmt.query_map(params![snapshot], |row| {
                    Ok(EmbeddingCandidate {
                        target: EmbeddingTarget::Node(row.get(0)?),
                        text: non_blank(row.get(1)?),
                        embedded: row.get(2)?,
                    })
                })?;
                for row in rows {
                    out.push(row?);
                }

                let mut stmt = conn.prepare(
                    "SELECT source, target, rel_type, \
                         CAST(json_extract(properties, '$.context') AS TEXT), \
                         json_extract(properties, '$.embedding') IS NOT NULL \
                     FROM edges WHERE snapshot = ?1 ORDER BY rowid",
                )?;
                let rows = stmt.query_map(params![snapshot], |row| {
                    Ok(EmbeddingCandidate {
                        target: EmbeddingTarget::Relationship(EdgeKey {
                            source: row.get(0)?,
                            target: row.get(1)?,
                            rel_type: row.get(2)?,
                        }),
                        text: non_blank(row.get(3)?),
                        embedded: row.get(4)?,
                    })
                })?;
                for row in rows {
                    out.push(row?);
                }
                Ok(out)
            })
            .await
    }

    /// Store vectors under the `embedding` property in one transaction.
    ///
    /// Returns how many items were updated; missing items are ignored.
    pub async fn set_embeddings(&self, snapshot: &str, vectors: Vec<(EmbeddingTarget, Vec<f32>)>) -> Result<usize> {
        if vectors.is_empty() {
            return Ok(0);
        }
        let snapshot = snapshot.to_string();
        self.db
            .with_connection(move |conn| {
                let tx = conn.transaction()?;
                let mut updated = 0;
                {
                    let mut node_stmt = tx.prepare(
                        "UPDATE nodes SET properties = json_set(properties, '$.embedding', json(?3)) \
                         WHERE snapshot = ?1 AND id = ?2",
                    )?;
                    let mut edge_stmt = tx.prepare(
                        "UPDATE edges SET properties = json_set(properties, '$.embedding', json(?5)) \
                         WHERE snapshot = ?1 AND source = ?2 AND target = ?3 AND rel_type = ?4",
                    )?;
                    for (target, vector) in &vectors {
                        let encoded = serde_json::to_string(vector).map_err(|e| {
                            GraphRefineError::InvalidInput(format!("Cannot encode embedding: {}", e))
                        })?;
                        updated += match target {
                            EmbeddingTarget::Node(id) => node_stmt.execute(params![snapshot, id, encoded])?,
                            EmbeddingTarget::Relationship(key) => edge_stmt.execute(params![
                                snapshot,
                                key.source,
                                key.target,
                                key.rel_type,
                                encoded
                            ])?,
                        };
                    }
                }
                tx.commit()?;
                Ok(updated)
            })
            .await
    }
}

fn checked_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(GraphRefineError::InvalidInput(
            "Snapshot name must not be empty".to_string(),
        ));
    }
    Ok(trimmed.to_string())
}

fn ensure_snapshot(conn: &Connection, name: &str, copied_from: Option<&str>) -> Result<()> {
    conn.execute(
        "INSERT INTO snapshots (name, created_at, copied_from) VALUES (?1, ?2, ?3) \
         ON CONFLICT(name) DO NOTHING",
        params![name, Utc::now().to_rfc3339(), copied_from],
    )?;
    Ok(())
}

fn snapshot_exists(conn: &Connection, name: &str) -> Result<bool> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM snapshots WHERE name = ?1)",
        params![name],
        |row| row.get(0),
    )?;
    Ok(exists)
}

fn discard(conn: &Connection, name: &str) -> Result<bool> {
    let changed = conn.execute("DELETE FROM snapshots WHERE name = ?1", params![name])?;
    Ok(changed > 0)
}

/// Group items by label, keeping groups in order of first appearance.
fn group_by_label<T>(items: Vec<T>, label_of: impl Fn(&T) -> Label) -> Vec<(Label, Vec<T>)> {
    let mut groups: Vec<(Label, Vec<T>)> = Vec::new();
    for item in items {
        let label = label_of(&item);
        match groups.iter_mut().find(|(l, _)| *l == label) {
            Some((_, group)) => group.push(item),
            None => groups.push((label, vec![item])),
        }
    }
    groups
}

fn upsert_nodes(conn: &mut Connection, snapshot: &str, nodes: Vec<Node>) -> Result<UpsertReport> {
    ensure_snapshot(conn, snapshot, None)?;
    let mut report = UpsertReport::default();

    let (valid, empty): (Vec<Node>, Vec<Node>) =
        nodes.into_iter().partition(|n| !n.id.trim().is_empty());
    for node in empty {
        log::warn!("Dropping node with empty id (type {})", node.node_type);
        report.dropped += 1;
    }

    for (label, group) in group_by_label(valid, |n| Label::node(&n.node_type)) {
        match write_node_group(conn, snapshot, &label, &group) {
            Ok((created, merged)) => {
                report.created += created;
                report.merged += merged;
            }
            Err(e) => {
                log::error!("Failed to write {} nodes labelled {}: {}", group.len(), label, e);
                report.failed_groups.push(GroupFailure {
                    label: label.into_string(),
                    error: e.to_string(),
                });
            }
        }
    }

    Ok(report)
}

fn write_node_group(conn: &mut Connection, snapshot: &str, label: &Label, group: &[Node]) -> Result<(usize, usize)> {
    let tx = conn.transaction()?;
    let mut created = 0;
    let mut merged = 0;
    {
        let mut exists = tx.prepare_cached(NODE_EXISTS)?;
        let mut upsert = tx.prepare_cached(NODE_UPSERT)?;
        for node in group {
            let existed: bool = exists.query_row(params![snapshot, node.id], |row| row.get(0))?;
            let bag = serde_json::to_string(&node.property_bag()).map_err(|e| {
                GraphRefineError::InvalidInput(format!("Node {} has unencodable properties: {}", node.id, e))
            })?;
            upsert.execute(params![snapshot, node.id, label.as_str(), bag])?;
            if existed {
                merged += 1;
            } else {
                created += 1;
            }
        }
    }
    tx.commit()?;
    Ok((created, merged))
}

fn upsert_edges(conn: &mut Connection, snapshot: &str, edges: Vec<Edge>) -> Result<UpsertReport> {
    ensure_snapshot(conn, snapshot, None)?;
    let mut report = UpsertReport::default();

    for (label, group) in group_by_label(edges, |e| Label::relationship(&e.rel_type)) {
        match write_edge_group(conn, snapshot, &label, &group) {
            Ok((created, merged, dropped)) => {
                report.created += created;
                report.merged += merged;
                report.dropped += dropped;
            }
            Err(e) => {
                log::error!("Failed to write {} relationships of type {}: {}", group.len(), label, e);
                report.failed_groups.push(GroupFailure {
                    label: label.into_string(),
                    error: e.to_string(),
                });
            }
        }
    }

    Ok(report)
}

fn write_edge_group(
    conn: &mut Connection,
    snapshot: &str,
    label: &Label,
    group: &[Edge],
) -> Result<(usize, usize, usize)> {
    let tx = conn.transaction()?;
    let (mut created, mut merged, mut dropped) = (0, 0, 0);
    {
        let mut node_exists = tx.prepare_cached(NODE_EXISTS)?;
        let mut edge_exists = tx.prepare_cached(EDGE_EXISTS)?;
        let mut upsert = tx.prepare_cached(EDGE_UPSERT)?;
        for edge in group {
            let has_source: bool = node_exists.query_row(params![snapshot, edge.source], |row| row.get(0))?;
            let has_target: bool = node_exists.query_row(params![snapshot, edge.target], |row| row.get(0))?;
            if !has_source || !has_target {
                log::warn!(
                    "Dropping relationship {} -[{}]-> {}: endpoint not in snapshot {}",
                    edge.source,
                    label,
                    edge.target,
                    snapshot
                );
                dropped += 1;
                continue;
            }

            let existed: bool = edge_exists.query_row(
                params![snapshot, edge.source, edge.target, label.as_str()],
                |row| row.get(0),
            )?;
            let props = edge_properties(edge);
            upsert.execute(params![snapshot, edge.source, edge.target, label.as_str(), props])?;
            if existed {
                merged += 1;
            } else {
                created += 1;
            }
        }
    }
    tx.commit()?;
    Ok((created, merged, dropped))
}

fn edge_properties(edge: &Edge) -> String {
    let mut props = Map::new();
    if let Some(context) = &edge.context {
        props.insert("context".to_string(), Value::String(context.clone()));
    }
    Value::Object(props).to_string()
}

fn non_blank(text: Option<String>) -> Option<String> {
    text.filter(|t| !t.trim().is_empty())
}

fn parse_bag(raw: &str) -> Map<String, Value> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map,
        _ => {
            log::warn!("Ignoring unreadable property bag: {}", raw);
            Map::new()
        }
    }
}

fn edge_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Edge> {
    let props: String = row.get(3)?;
    let context = parse_bag(&props)
        .get("context")
        .and_then(Value::as_str)
        .map(str::to_string);
    Ok(Edge {
        source: row.get(0)?,
        target: row.get(1)?,
        rel_type: row.get(2)?,
        context,
    })
}

fn read_snapshot(conn: &Connection, snapshot: &str) -> Result<GraphData> {
    if !snapshot_exists(conn, snapshot)? {
        return Err(GraphRefineError::SnapshotNotFound(snapshot.to_string()));
    }

    let mut stmt = conn.prepare(
        "SELECT id, label, properties FROM nodes WHERE snapshot = ?1 ORDER BY rowid",
    )?;
    let rows = stmt.query_map(params![snapshot], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;
    let mut nodes = Vec::new();
    for row in rows {
        let (id, label, props) = row?;
        nodes.push(Node::from_bag(id, label, parse_bag(&props)));
    }

    let mut stmt = conn.prepare(
        "SELECT source, target, rel_type, properties FROM edges WHERE snapshot = ?1 ORDER BY rowid",
    )?;
    let rows = stmt.query_map(params![snapshot], edge_from_row)?;
    let mut relationships = Vec::new();
    for row in rows {
        relationships.push(row?);
    }

    Ok(GraphData { nodes, relationships })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    async fn test_store() -> (TempDir, GraphStore) {
        let temp_dir = TempDir::new().unwrap();
        let store = GraphStore::open(Db::new(temp_dir.path().join("graphs.db")))
            .await
            .unwrap();
        (temp_dir, store)
    }

    fn sample_graph() -> GraphData {
        GraphData {
            nodes: vec![
                Node::new("Alice", "人物信息", "a detective"),
                Node::new("Acme", "组织信息", "a company"),
            ],
            relationships: vec![Edge::new("Alice", "Acme", "works_at").with_context("since 2019")],
        }
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let (_dir, store) = test_store().await;

        let (first_nodes, first_edges) = store.upsert_graph("default", sample_graph()).await.unwrap();
        assert_eq!(first_nodes.created, 2);
        assert_eq!(first_edges.created, 1);
        let once = store.read("default").await.unwrap();

        let (second_nodes, second_edges) = store.upsert_graph("default", sample_graph()).await.unwrap();
        assert_eq!(second_nodes.created, 0);
        assert_eq!(second_nodes.merged, 2);
        assert_eq!(second_edges.merged, 1);
        let twice = store.read("default").await.unwrap();

        assert_eq!(once, twice);
        assert_eq!(twice.relationships[0].rel_type, "WORKS_AT");
        assert_eq!(twice.relationships[0].context.as_deref(), Some("since 2019"));
    }

    #[tokio::test]
    async fn test_upsert_unions_properties() {
        let (_dir, store) = test_store().await;

        let mut first = Node::new("Alice", "人物信息", "old");
        first.properties.insert("age".to_string(), json!(31));
        let mut second = Node::new("Alice", "人物信息", "new");
        second.properties.insert("city".to_string(), json!("Paris"));

        store.upsert_nodes("default", vec![first]).await.unwrap();
        store.upsert_nodes("default", vec![second]).await.unwrap();

        let graph = store.read("default").await.unwrap();
        assert_eq!(graph.nodes.len(), 1);
        let alice = &graph.nodes[0];
        assert_eq!(alice.content, "new");
        assert_eq!(alice.properties.get("age"), Some(&json!(31)));
        assert_eq!(alice.properties.get("city"), Some(&json!("Paris")));
    }

    #[tokio::test]
    async fn test_edges_with_missing_endpoint_are_dropped() {
        let (_dir, store) = test_store().await;
        store
            .upsert_nodes("default", vec![Node::new("Alice", "人物信息", "")])
            .await
            .unwrap();

        let report = store
            .upsert_edges(
                "default",
                vec![Edge::new("Alice", "Ghost", "KNOWS"), Edge::new("Alice", "Alice", "IS")],
            )
            .await
            .unwrap();

        assert_eq!(report.dropped, 1);
        assert_eq!(report.created, 1);
        let graph = store.read("default").await.unwrap();
        assert_eq!(graph.relationships.len(), 1);
        assert_eq!(graph.relationships[0].target, "Alice");
    }

    #[tokio::test]
    async fn test_labels_are_sanitized_on_write() {
        let (_dir, store) = test_store().await;
        store
            .upsert_nodes("default", vec![Node::new("x", "Person`) DELETE", ""), Node::new("y", "--", "")])
            .await
            .unwrap();

        let graph = store.read("default").await.unwrap();
        assert_eq!(graph.nodes[0].node_type, "PersonDELETE");
        assert_eq!(graph.nodes[1].node_type, "Entity");
    }

    #[tokio::test]
    async fn test_failed_group_does_not_abort_others() {
        let (_dir, store) = test_store().await;
        store
            .db()
            .with_connection(|conn| {
                conn.execute_batch(
                    "CREATE TRIGGER reject_broken BEFORE INSERT ON nodes WHEN NEW.label = 'Broken' \
                     BEGIN SELECT RAISE(ABORT, 'broken label'); END;",
                )?;
                Ok(())
            })
            .await
            .unwrap();

        let report = store
            .upsert_nodes(
                "default",
                vec![
                    Node::new("a", "Good", ""),
                    Node::new("b", "Broken", ""),
                    Node::new("c", "Good", ""),
                ],
            )
            .await
            .unwrap();

        assert_eq!(report.created, 2);
        assert_eq!(report.failed_groups.len(), 1);
        assert_eq!(report.failed_groups[0].label, "Broken");
        let graph = store.read("default").await.unwrap();
        assert_eq!(graph.node_ids(), vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_copy_produces_equal_graph() {
        let (_dir, store) = test_store().await;
        store.upsert_graph("graph1", sample_graph()).await.unwrap();
        store
            .upsert_nodes("graph2", vec![Node::new("stale", "人物信息", "")])
            .await
            .unwrap();

        store.copy("graph1", "graph2").await.unwrap();

        let source = store.read("graph1").await.unwrap();
        let target = store.read("graph2").await.unwrap();
        assert_eq!(source, target);

        let snapshots = store.list_snapshots().await.unwrap();
        let copied = snapshots.iter().find(|s| s.name == "graph2").unwrap();
        assert_eq!(copied.copied_from.as_deref(), Some("graph1"));
        assert_eq!(copied.node_count, 2);
        assert_eq!(copied.edge_count, 1);
    }

    #[tokio::test]
    async fn test_copy_missing_source() {
        let (_dir, store) = test_store().await;
        let err = store.copy("nope", "graph2").await.unwrap_err();
        assert!(matches!(err, GraphRefineError::SnapshotNotFound(_)));
    }

    #[tokio::test]
    async fn test_discard_cascades() {
        let (_dir, store) = test_store().await;
        store.upsert_graph("graph1", sample_graph()).await.unwrap();

        assert!(store.discard("graph1").await.unwrap());
        assert!(!store.discard("graph1").await.unwrap());
        assert!(matches!(
            store.read("graph1").await.unwrap_err(),
            GraphRefineError::SnapshotNotFound(_)
        ));

        let leftover: i64 = store
            .db()
            .with_connection(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM edges", [], |r| r.get(0))?))
            .await
            .unwrap();
        assert_eq!(leftover, 0);
    }

    #[tokio::test]
    async fn test_append_content() {
        let (_dir, store) = test_store().await;
        store
            .upsert_nodes(
                "default",
                vec![Node::new("Alice", "人物信息", "a detective"), Node::new("Bob", "人物信息", "")],
            )
            .await
            .unwrap();

        assert!(store.append_content("default", "Alice", "from London").await.unwrap());
        assert!(store.append_content("default", "Bob", "a baker").await.unwrap());
        assert!(!store.append_content("default", "Carol", "unknown").await.unwrap());

        let graph = store.read("default").await.unwrap();
        assert_eq!(graph.nodes[0].content, "a detective from London");
        assert_eq!(graph.nodes[1].content, "a baker");
    }

    #[tokio::test]
    async fn test_delete_edge_matches_sanitized_type() {
        let (_dir, store) = test_store().await;
        store.upsert_graph("default", sample_graph()).await.unwrap();

        let key = EdgeKey::new("Alice", "Acme", "works_at");
        assert!(store.delete_edge("default", &key).await.unwrap());
        assert!(!store.delete_edge("default", &key).await.unwrap());
        assert!(store.read("default").await.unwrap().relationships.is_empty());
    }

    #[tokio::test]
    async fn test_edges_touching_respects_limit() {
        let (_dir, store) = test_store().await;
        let graph = GraphData {
            nodes: vec![
                Node::new("a", "人物信息", ""),
                Node::new("b", "人物信息", ""),
                Node::new("c", "人物信息", ""),
            ],
            relationships: vec![
                Edge::new("a", "b", "KNOWS"),
                Edge::new("c", "a", "KNOWS"),
                Edge::new("b", "c", "KNOWS"),
            ],
        };
        store.upsert_graph("default", graph).await.unwrap();

        let touching = store
            .edges_touching("default", vec!["a".to_string()], 10)
            .await
            .unwrap();
        assert_eq!(touching.len(), 2);

        let limited = store
            .edges_touching("default", vec!["a".to_string(), "b".to_string()], 2)
            .await
            .unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_snapshot_name_rejected() {
        let (_dir, store) = test_store().await;
        let err = store.ensure_snapshot("  ").await.unwrap_err();
        assert!(matches!(err, GraphRefineError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_embedding_candidates_and_write_back() {
        let (_dir, store) = test_store().await;
        let mut graph = sample_graph();
        let mut described = Node::new("Ledger", "物品信息", "");
        described.properties.insert("context".to_string(), json!("kept in the vault"));
        graph.nodes.push(described);
        graph.nodes.push(Node::new("Blank", "物品信息", " "));
        graph.relationships.push(Edge::new("Acme", "Alice", "EMPLOYS"));
        store.upsert_graph("graph1", graph).await.unwrap();

        let candidates = store.embedding_candidates("graph1").await.unwrap();
        assert_eq!(candidates.len(), 6);
        assert_eq!(candidates[0].text.as_deref(), Some("a detective"));
        assert_eq!(candidates[2].text.as_deref(), Some("kept in the vault"));
        assert_eq!(candidates[3].text, None);
        assert_eq!(candidates[4].text.as_deref(), Some("since 2019"));
        assert_eq!(
            candidates[4].target,
            EmbeddingTarget::Relationship(Edge::new("Alice", "Acme", "works_at").key())
        );
        assert_eq!(candidates[5].text, None);
        assert!(candidates.iter().all(|c| !c.embedded));

        let updated = store
            .set_embeddings(
                "graph1",
                vec![
                    (EmbeddingTarget::Node("Alice".to_string()), vec![0.5, 0.25]),
                    (candidates[4].target.clone(), vec![1.0, 0.0]),
                    (EmbeddingTarget::Node("Ghost".to_string()), vec![1.0]),
                ],
            )
            .await
            .unwrap();
        assert_eq!(updated, 2);

        let graph = store.read("graph1").await.unwrap();
        assert_eq!(graph.nodes[0].properties.get("embedding"), Some(&json!([0.5, 0.25])));
        assert_eq!(graph.nodes[0].content, "a detective");
        let candidates = store.embedding_candidates("graph1").await.unwrap();
        let embedded: Vec<bool> = candidates.iter().map(|c| c.embedded).collect();
        assert_eq!(embedded, vec![true, false, false, false, true, false]);
    }

    #[tokio::test]
    async fn test_copy_keeps_relationship_embeddings() {
        let (_dir, store) = test_store().await;
        store.upsert_graph("graph1", sample_graph()).await.unwrap();
        let key = sample_graph().relationships[0].key();
        store
            .set_embeddings("graph1", vec![(EmbeddingTarget::Relationship(key), vec![0.5])])
            .await
            .unwrap();

        store.copy("graph1", "graph2").await.unwrap();

        let candidates = store.embedding_candidates("graph2").await.unwrap();
        let edge = candidates
            .iter()
            .find(|c| matches!(c.target, EmbeddingTarget::Relationship(_)))
            .unwrap();
        assert!(edge.embedded);
        assert_eq!(edge.text.as_deref(), Some("since 2019"));
    }

    #[tokio::test]
    async fn test_embedding_candidates_missing_snapshot() {
        let (_dir, store) = test_store().await;
        let err = store.embedding_candidates("nope").await.unwrap_err();
        assert!(matches!(err, GraphRefineError::SnapshotNotFound(_)));
    }
}
