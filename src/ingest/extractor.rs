//! Graph extraction from text via the completion service.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

use super::chunker::Chunk;
use crate::config::{CompletionConfig, ExtractionConfig};
use crate::error::{GraphRefineError, Result};
use crate::graph::{Edge, GraphData, Node, NodeTypes};
use crate::llm::{complete_json, prompts, ClientFactory, CompletionClient, CompletionRequest};

/// What the model must return: both lists are required.
#[derive(Debug, Deserialize)]
struct ExtractionPayload {
    nodes: Vec<Node>,
    relationships: Vec<Edge>,
}

/// Why a chunk produced nothing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ChunkFailure {
    /// No usable reply from the completion service
    Transport(String),
    /// A reply arrived but held no valid payload
    Parse(String),
}

/// Extraction result for one chunk. Failed chunks carry an empty graph.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkExtraction {
    pub index: usize,
    pub graph: GraphData,
    pub failure: Option<ChunkFailure>,
}

impl ChunkExtraction {
    fn from_result(index: usize, result: Result<GraphData>) -> Self {
        match result {
            Ok(graph) => Self { index, graph, failure: None },
            Err(e) => {
                let failure = if e.is_recoverable() {
                    log::warn!("Chunk {}: unusable extraction, continuing with empty result: {}", index, e);
                    ChunkFailure::Parse(e.to_string())
                } else {
                    log::error!("Chunk {}: extraction call failed: {}", index, e);
                    ChunkFailure::Transport(e.to_string())
                };
                Self { index, graph: GraphData::default(), failure: Some(failure) }
            }
        }
    }
}

/// Turns text into graph data through the completion service.
#[derive(Clone)]
pub struct Extractor {
    factory: ClientFactory,
    model: String,
    temperature: f32,
    node_types: NodeTypes,
    max_workers: usize,
}

impl Extractor {
    pub fn new(factory: ClientFactory, completion: &CompletionConfig, extraction: &ExtractionConfig) -> Self {
        Self {
            factory,
            model: completion.model.clone(),
            temperature: completion.temperature,
            node_types: NodeTypes::new(extraction.node_types.clone()),
            max_workers: extraction.max_workers.max(1),
        }
    }

    /// Extract one chunk with the given client.
    ///
    /// Non-JSON or schema-violating output is a `Parse` error; out-of-set
    /// node types are replaced by the default label.
    pub async fn extract(&self, client: &dyn CompletionClient, text: &str) -> Result<GraphData> {
        let (system, user) = prompts::extraction(text, self.node_types.as_slice());
        let request = CompletionRequest {
            system,
            user,
            model: self.model.clone(),
            temperature: self.temperature,
        };

        let mut payload: ExtractionPayload = complete_json(client, &request).await?;
        self.node_types.normalize(&mut payload.nodes);

        Ok(GraphData {
            nodes: payload.nodes,
            relationships: payload.relationships,
        })
    }

    /// Extract a whole document in one call, without chunking.
    pub async fn extract_document(&self, text: &str) -> Result<GraphData> {
        let client = (self.factory)()?;
        let graph = self.extract(client.as_ref(), text).await?;
        log::info!(
            "Extracted {} nodes and {} relationships from the full document",
            graph.nodes.len(),
            graph.relationships.len()
        );
        Ok(graph)
    }

    /// Extract chunks on a bounded worker pool.
    ///
    /// Each worker builds its own client. Every chunk gets exactly one entry
    /// in the result, which is sorted by chunk index regardless of the order
    /// in which workers finish.
    pub async fn extract_chunks(&self, chunks: Vec<Chunk>) -> Vec<ChunkExtraction> {
        if chunks.is_empty() {
            return Vec::new();
        }

        let total = chunks.len();
        let workers = self.max_workers.min(total);
        let expected: BTreeSet<usize> = chunks.iter().map(|c| c.index).collect();
        log::info!("Extracting {} chunks with {} workers", total, workers);

        let (job_tx, job_rx) = mpsc::channel::<Chunk>(total);
        for chunk in chunks {
            // Capacity equals the number of jobs, so this never waits.
            if job_tx.send(chunk).await.is_err() {
                break;
            }
        }
        drop(job_tx);
        let job_rx = Arc::new(Mutex::new(job_rx));

        let (result_tx, mut result_rx) = mpsc::channel::<ChunkExtraction>(total);
        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let extractor = self.clone();
            let job_rx = Arc::clone(&job_rx);
            let result_tx = result_tx.clone();

            handles.push(tokio::spawn(async move {
                let client = (extractor.factory)();
                if let Err(e) = &client {
                    log::error!("Worker {} could not build a completion client: {}", worker_id, e);
                }

                loop {
                    let next = job_rx.lock().await.recv().await;
                    let Some(chunk) = next else { break };

                    let result = match &client {
                        Ok(client) => extractor.extract(client.as_ref(), &chunk.text).await,
                        Err(e) => Err(GraphRefineError::Transport(format!("No completion client: {}", e))),
                    };
                    log::debug!("Worker {} finished chunk {}", worker_id, chunk.index);

                    if result_tx
                        .send(ChunkExtraction::from_result(chunk.index, result))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            }));
        }
        drop(result_tx);

        let mut results = Vec::with_capacity(total);
        while let Some(result) = result_rx.recv().await {
            results.push(result);
        }
        for handle in handles {
            if let Err(e) = handle.await {
                log::error!("Extraction worker aborted: {}", e);
            }
        }

        // A worker that aborted mid-chunk leaves a gap; report it as a failed chunk.
        let seen: BTreeSet<usize> = results.iter().map(|r| r.index).collect();
        for missing in expected.difference(&seen) {
            results.push(ChunkExtraction {
                index: *missing,
                graph: GraphData::default(),
                failure: Some(ChunkFailure::Transport("Worker aborted".to_string())),
            });
        }

        results.sort_by_key(|r| r.index);

        let failed = results.iter().filter(|r| r.failure.is_some()).count();
        log::info!("Extraction finished: {} chunks, {} failed", total, failed);
        results
    }
}
