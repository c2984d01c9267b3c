pub mod chunker;
pub mod extractor;

pub use chunker::{chunk_document, Chunk, TextSplitter, DEFAULT_SEPARATORS};
pub use extractor::{ChunkExtraction, ChunkFailure, Extractor};

use serde::Serialize;

use crate::service::{AddRequest, GraphSink};

/// Totals for one chunked extraction run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ForwardReport {
    pub chunks: usize,
    /// Chunks whose extraction failed and were not sent
    pub extraction_failures: usize,
    /// Chunks the sink rejected
    pub write_failures: usize,
    pub nodes_written: usize,
    pub relationships_written: usize,
    pub relationships_dropped: usize,
}

/// Send extraction results to a sink, one request per chunk, in chunk order.
///
/// Failed chunks are skipped. A rejected write is logged and counted; the
/// remaining chunks are still sent.
pub async fn forward_extractions(
    sink: &dyn GraphSink,
    extractions: Vec<ChunkExtraction>,
    database: Option<&str>,
) -> ForwardReport {
    let mut report = ForwardReport {
        chunks: extractions.len(),
        ..ForwardReport::default()
    };

    let mut extractions = extractions;
    extractions.sort_by_key(|e| e.index);

    for extraction in extractions {
        if extraction.failure.is_some() {
            report.extraction_failures += 1;
            continue;
        }

        let request = AddRequest {
            nodes: extraction.graph.nodes,
            relationships: extraction.graph.relationships,
            chunk_index: Some(extraction.index),
            database: database.map(str::to_string),
        };

        match sink.add(request).await {
            Ok(response) => {
                log::info!(
                    "chunk {}: wrote {} nodes, {} relationships",
                    extraction.index,
                    response.nodes_created,
                    response.relationships_created
                );
                report.nodes_written += response.nodes_created;
                report.relationships_written += response.relationships_created;
                report.relationships_dropped += response.relationships_dropped;
            }
            Err(e) => {
                log::error!("chunk {}: write failed: {}", extraction.index, e);
                report.write_failures += 1;
            }
        }
    }

    report
}
