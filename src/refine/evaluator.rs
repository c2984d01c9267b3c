use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::config::CompletionConfig;
use crate::graph::GraphData;
use crate::llm::{complete_json, prompts, CompletionClient, CompletionRequest};
use crate::Result;

/// Problems the auditor found, by category. Entries are kept as the model
/// wrote them and handed back verbatim to the fixer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Issues {
    #[serde(default)]
    pub missing_nodes: Vec<Value>,
    #[serde(default)]
    pub incomplete_nodes: Vec<Value>,
    #[serde(default)]
    pub incorrect_relationships: Vec<Value>,
    #[serde(default)]
    pub missing_relationships: Vec<Value>,
}

/// Per-category issue counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IssueCounts {
    pub missing_nodes: usize,
    pub incomplete_nodes: usize,
    pub incorrect_relationships: usize,
    pub missing_relationships: usize,
}

impl IssueCounts {
    pub fn total(&self) -> usize {
        self.missing_nodes + self.incomplete_nodes + self.incorrect_relationships + self.missing_relationships
    }
}

/// Auditor verdict. `has_issues` and `issues` are required; a reply missing
/// either is a parse failure. Individual issue lists may be omitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub has_issues: bool,
    pub issues: Issues,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl EvaluationResult {
    pub fn counts(&self) -> IssueCounts {
        IssueCounts {
            missing_nodes: self.issues.missing_nodes.len(),
            incomplete_nodes: self.issues.incomplete_nodes.len(),
            incorrect_relationships: self.issues.incorrect_relationships.len(),
            missing_relationships: self.issues.missing_relationships.len(),
        }
    }
}

/// Audits a graph snapshot against its source text.
pub struct Evaluator {
    client: Arc<dyn CompletionClient>,
    model: String,
    temperature: f32,
}

impl Evaluator {
    pub fn new(client: Arc<dyn CompletionClient>, config: &CompletionConfig) -> Self {
        Self {
            client,
            model: config.model.clone(),
            temperature: config.temperature,
        }
    }

    pub async fn evaluate(&self, source: &str, graph: &GraphData) -> Result<EvaluationResult> {
        let (system, user) = prompts::evaluation(source, &graph.to_prompt_json());
        let request = CompletionRequest {
            system,
            user,
            model: self.model.clone(),
            temperature: self.temperature,
        };

        let result: EvaluationResult = complete_json(self.client.as_ref(), &request).await?;
        let counts = result.counts();
        log::info!(
            "Evaluation: has_issues={} (missing nodes {}, incomplete nodes {}, incorrect rels {}, missing rels {})",
            result.has_issues,
            counts.missing_nodes,
            counts.incomplete_nodes,
            counts.incorrect_relationships,
            counts.missing_relationships
        );
        Ok(result)
    }
}
