use std::sync::Arc;

use super::evaluator::EvaluationResult;
use crate::config::CompletionConfig;
use crate::graph::{Diff, GraphData, NodeTypes};
use crate::llm::{complete_json, prompts, CompletionClient, CompletionRequest};
use crate::Result;

/// Turns an audit report into a modification list.
pub struct Fixer {
    client: Arc<dyn CompletionClient>,
    model: String,
    temperature: f32,
    node_types: NodeTypes,
}

impl Fixer {
    pub fn new(client: Arc<dyn CompletionClient>, config: &CompletionConfig, node_types: NodeTypes) -> Self {
        Self {
            client,
            model: config.model.clone(),
            temperature: config.temperature,
            node_types,
        }
    }

    pub async fn fix(&self, source: &str, graph: &GraphData, evaluation: &EvaluationResult) -> Result<Diff> {
        let evaluation_json = serde_json::to_string_pretty(evaluation).unwrap_or_else(|_| "{}".to_string());
        let (system, user) = prompts::repair(source, &graph.to_prompt_json(), &evaluation_json);
        let request = CompletionRequest {
            system,
            user,
            model: self.model.clone(),
            temperature: self.temperature,
        };

        let mut diff: Diff = complete_json(self.client.as_ref(), &request).await?;
        self.node_types.normalize(&mut diff.nodes_to_add);

        log::info!(
            "Fixer proposed {} operations: +{} nodes, {} updates, -{} rels, {} modified, +{} rels",
            diff.operation_count(),
            diff.nodes_to_add.len(),
            diff.nodes_to_update.len(),
            diff.relationships_to_delete.len(),
            diff.relationships_to_modify.len(),
            diff.relationships_to_add.len()
        );
        if let Some(summary) = &diff.modification_summary {
            log::debug!("Modification summary: {}", summary);
        }
        Ok(diff)
    }
}
