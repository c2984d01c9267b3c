//! Modification lists and their fixed-order application.

use serde::{Deserialize, Serialize};

use super::{Edge, EdgeKey, GraphStore, Node, UpsertReport};
use crate::Result;

/// Append `content_to_add` to the content of node `node_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeUpdate {
    pub node_id: String,
    pub content_to_add: String,
}

/// Replace one relationship by another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipModification {
    #[serde(alias = "old_relationship")]
    pub old: EdgeKey,
    #[serde(alias = "new_relationship")]
    pub new: Edge,
}

/// A modification list produced by the fixer.
///
/// All five lists are required on the wire (they may be empty).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diff {
    pub nodes_to_add: Vec<Node>,
    pub nodes_to_update: Vec<NodeUpdate>,
    pub relationships_to_delete: Vec<EdgeKey>,
    pub relationships_to_modify: Vec<RelationshipModification>,
    pub relationships_to_add: Vec<Edge>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modification_summary: Option<String>,
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.nodes_to_add.is_empty()
            && self.nodes_to_update.is_empty()
            && self.relationships_to_delete.is_empty()
            && self.relationships_to_modify.is_empty()
            && self.relationships_to_add.is_empty()
    }

    pub fn operation_count(&self) -> usize {
        self.nodes_to_add.len()
            + self.nodes_to_update.len()
            + self.relationships_to_delete.len()
            + self.relationships_to_modify.len()
            + self.relationships_to_add.len()
    }
}

/// One phase of diff application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffStep {
    AddNodes,
    UpdateNodes,
    DeleteRelationships,
    ModifyRelationships,
    AddRelationships,
}

impl DiffStep {
    /// Nodes first so that every relationship added later can resolve its endpoints.
    pub const CANONICAL: [DiffStep; 5] = [
        DiffStep::AddNodes,
        DiffStep::UpdateNodes,
        DiffStep::DeleteRelationships,
        DiffStep::ModifyRelationships,
        DiffStep::AddRelationships,
    ];
}

/// What applying a diff did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiffReport {
    pub nodes_added: UpsertReport,
    pub nodes_updated: usize,
    /// Updates naming a node that does not exist.
    pub nodes_missing: usize,
    pub relationships_deleted: usize,
    /// Deletions or modifications whose old relationship does not exist.
    pub relationships_missing: usize,
    pub relationships_modified: usize,
    pub relationships_added: UpsertReport,
    /// Individual operations that hit a store error.
    pub failed: usize,
}

impl DiffReport {
    /// Relationships dropped anywhere in the diff for want of an endpoint.
    pub fn dropped_relationships(&self) -> usize {
        self.relationships_added.dropped
    }
}

/// Apply a diff to `snapshot` in the canonical order.
pub async fn apply_diff(store: &GraphStore, snapshot: &str, diff: &Diff) -> Result<DiffReport> {
    apply_steps(store, snapshot, diff, &DiffStep::CANONICAL).await
}

/// Apply the given phases of a diff, in the given order.
///
/// Individual update/delete failures are logged and counted; the remaining
/// operations still run.
pub async fn apply_steps(store: &GraphStore, snapshot: &str, diff: &Diff, steps: &[DiffStep]) -> Result<DiffReport> {
    let mut report = DiffReport::default();

    for step in steps {
        match step {
            DiffStep::AddNodes => {
                if !diff.nodes_to_add.is_empty() {
                    report.nodes_added = store.upsert_nodes(snapshot, diff.nodes_to_add.clone()).await?;
                }
            }
            DiffStep::UpdateNodes => {
                for update in &diff.nodes_to_update {
                    match store.append_content(snapshot, &update.node_id, &update.content_to_add).await {
                        Ok(true) => report.nodes_updated += 1,
                        Ok(false) => {
                            log::warn!("Cannot update node {}: not in snapshot {}", update.node_id, snapshot);
                            report.nodes_missing += 1;
                        }
                        Err(e) => {
                            log::warn!("Failed to update node {}: {}", update.node_id, e);
                            report.failed += 1;
                        }
                    }
                }
            }
            DiffStep::DeleteRelationships => {
                for key in &diff.relationships_to_delete {
                    let key = EdgeKey::new(&key.source, &key.target, &key.rel_type);
                    match store.delete_edge(snapshot, &key).await {
                        Ok(true) => report.relationships_deleted += 1,
                        Ok(false) => {
                            log::warn!(
                                "Cannot delete {} -[{}]-> {}: no such relationship",
                                key.source,
                                key.rel_type,
                                key.target
                            );
                            report.relationships_missing += 1;
                        }
                        Err(e) => {
                            log::warn!("Failed to delete relationship {} -> {}: {}", key.source, key.target, e);
                            report.failed += 1;
                        }
                    }
                }
            }
            DiffStep::ModifyRelationships => {
                for modification in &diff.relationships_to_modify {
                    let old = &modification.old;
                    let old = EdgeKey::new(&old.source, &old.target, &old.rel_type);
                    match store.delete_edge(snapshot, &old).await {
                        Ok(true) => {}
                        Ok(false) => {
                            log::debug!(
                                "Relationship {} -[{}]-> {} to modify did not exist, adding replacement",
                                old.source,
                                old.rel_type,
                                old.target
                            );
                            report.relationships_missing += 1;
                        }
                        Err(e) => {
                            log::warn!("Failed to replace relationship {} -> {}: {}", old.source, old.target, e);
                            report.failed += 1;
                            continue;
                        }
                    }
                    let written = store.upsert_edges(snapshot, vec![modification.new.clone()]).await?;
                    if written.written() > 0 {
                        report.relationships_modified += 1;
                    }
                    report.relationships_added.dropped += written.dropped;
                    report.relationships_added.failed_groups.extend(written.failed_groups);
                }
            }
            DiffStep::AddRelationships => {
                if !diff.relationships_to_add.is_empty() {
                    let written = store
                        .upsert_edges(snapshot, diff.relationships_to_add.clone())
                        .await?;
                    report.relationships_added.absorb(written);
                }
            }
        }
    }

    log::info!(
        "Applied diff to {}: +{} nodes, {} updated, -{} rels, {} modified, +{} rels ({} dropped)",
        snapshot,
        report.nodes_added.written(),
        report.nodes_updated,
        report.relationships_deleted,
        report.relationships_modified,
        report.relationships_added.written(),
        report.dropped_relationships()
    );

    Ok(report)
}
