//! Graph write service: wire types, HTTP client and axum server.
//!
//! The chunked extraction path never touches the store directly; it posts
//! each chunk's graph to `POST /add`. [`GraphSink`] abstracts over the HTTP
//! client and an in-process store writer so both can be driven the same way.

mod client;
mod http;

pub use client::GraphServiceClient;
pub use http::{router, GraphServer};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::graph::{Edge, GraphStore, Node};
use crate::Result;

/// Body of `POST /add`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddRequest {
    pub nodes: Vec<Node>,
    pub relationships: Vec<Edge>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<usize>,
    /// Target snapshot; the server default applies when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
}

/// Reply of `POST /add`. Counts are items written (created or merged).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddResponse {
    pub nodes_created: usize,
    pub relationships_created: usize,
    #[serde(default)]
    pub relationships_dropped: usize,
    #[serde(default)]
    pub failed_groups: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
}

/// Error body returned with non-2xx statuses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Destination for extracted graph batches.
#[async_trait]
pub trait GraphSink: Send + Sync {
    async fn add(&self, request: AddRequest) -> Result<AddResponse>;
}

/// Writes batches straight into a [`GraphStore`].
#[derive(Debug, Clone)]
pub struct StoreSink {
    store: GraphStore,
    default_database: String,
}

impl StoreSink {
    pub fn new(store: GraphStore, default_database: impl Into<String>) -> Self {
        Self {
            store,
            default_database: default_database.into(),
        }
    }

    pub fn store(&self) -> &GraphStore {
        &self.store
    }
}

#[async_trait]
impl GraphSink for StoreSink {
    async fn add(&self, request: AddRequest) -> Result<AddResponse> {
        let database = request
            .database
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| self.default_database.clone());

        let nodes = self.store.upsert_nodes(&database, request.nodes).await?;
        let edges = self.store.upsert_edges(&database, request.relationships).await?;

        if let Some(index) = request.chunk_index {
            log::info!(
                "chunk {}: wrote {} nodes, {} relationships to {} ({} dropped)",
                index,
                nodes.written(),
                edges.written(),
                database,
                edges.dropped
            );
        }

        Ok(AddResponse {
            nodes_created: nodes.written(),
            relationships_created: edges.written(),
            relationships_dropped: edges.dropped,
            failed_groups: nodes
                .failed_groups
                .iter()
                .chain(edges.failed_groups.iter())
                .map(|g| format!("{}: {}", g.label, g.error))
                .collect(),
            database: Some(database),
        })
    }
}
