//! Bounded evaluate/fix refinement over named snapshots.
//!
//! Every iteration copies the working snapshot to `{prefix}{i}`, audits the
//! copy, and if the audit finds problems applies the fixer's diff to that
//! copy. Earlier snapshots are never modified, so the history of a run stays
//! inspectable.

pub mod evaluator;
pub mod fixer;

pub use evaluator::{EvaluationResult, Evaluator, IssueCounts, Issues};
pub use fixer::Fixer;

use serde::Serialize;

use crate::config::RefinementConfig;
use crate::error::GraphRefineError;
use crate::graph::{apply_diff, DiffReport, GraphData, GraphStore};
use crate::ingest::Extractor;
use crate::Result;

/// Why the loop stopped.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "error")]
pub enum Termination {
    /// The auditor reported no issues.
    Converged,
    /// All iterations ran without convergence.
    BudgetExhausted,
    EvaluatorFailed(String),
    FixerFailed(String),
}

impl Termination {
    pub fn is_failure(&self) -> bool {
        matches!(self, Termination::EvaluatorFailed(_) | Termination::FixerFailed(_))
    }
}

/// What happened in one iteration.
#[derive(Debug, Clone, Serialize)]
pub struct IterationRecord {
    pub iteration: usize,
    pub snapshot: String,
    pub copied_from: String,
    pub nodes: usize,
    pub relationships: usize,
    pub has_issues: Option<bool>,
    pub issues: Option<IssueCounts>,
    pub diff: Option<DiffReport>,
}

/// Result of a refinement run. `final_snapshot` always names an existing
/// snapshot holding the best graph produced.
#[derive(Debug, Clone, Serialize)]
pub struct RefinementOutcome {
    pub termination: Termination,
    pub final_snapshot: String,
    pub iterations: Vec<IterationRecord>,
}

impl RefinementOutcome {
    /// Number of diffs applied.
    pub fn apply_cycles(&self) -> usize {
        self.iterations.iter().filter(|r| r.diff.is_some()).count()
    }
}

pub struct RefinementLoop {
    store: GraphStore,
    extractor: Extractor,
    evaluator: Evaluator,
    fixer: Fixer,
    config: RefinementConfig,
}

impl RefinementLoop {
    pub fn new(
        store: GraphStore,
        extractor: Extractor,
        evaluator: Evaluator,
        fixer: Fixer,
        config: RefinementConfig,
    ) -> Self {
        Self {
            store,
            extractor,
            evaluator,
            fixer,
            config,
        }
    }

    pub fn snapshot_name(&self, iteration: usize) -> String {
        format!("{}{}", self.config.snapshot_prefix, iteration)
    }

    /// Build the initial snapshot with one full-document extraction, then refine it.
    ///
    /// An unusable extraction reply starts the loop from an empty graph; a
    /// transport failure aborts the run.
    pub async fn run(&self, source: &str) -> Result<RefinementOutcome> {
        let initial = self.config.initial_snapshot.clone();

        let graph = match self.extractor.extract_document(source).await {
            Ok(graph) => graph,
            Err(e) if e.is_recoverable() => {
                log::warn!("Initial extraction unusable, starting from an empty graph: {}", e);
                GraphData::default()
            }
            Err(e) => return Err(e),
        };

        self.store.discard(&initial).await?;
        self.store.ensure_snapshot(&initial).await?;
        let (nodes, edges) = self.store.upsert_graph(&initial, graph).await?;
        log::info!(
            "Initial snapshot {}: {} nodes, {} relationships ({} dropped)",
            initial,
            nodes.written(),
            edges.written(),
            edges.dropped
        );

        self.run_from_snapshot(source, &initial).await
    }

    /// Refine an existing snapshot.
    pub async fn run_from_snapshot(&self, source: &str, start: &str) -> Result<RefinementOutcome> {
        if !self.store.snapshot_exists(start).await? {
            return Err(GraphRefineError::SnapshotNotFound(start.to_string()));
        }
        self.discard_stale_snapshots(start).await?;

        let mut working = start.to_string();
        let mut iterations = Vec::new();

        for iteration in 1..=self.config.max_iterations {
            let snapshot = self.snapshot_name(iteration);
            log::info!("Iteration {}/{}: {} -> {}", iteration, self.config.max_iterations, working, snapshot);

            self.store.copy(&working, &snapshot).await?;
            let graph = self.store.read(&snapshot).await?;
            let mut record = IterationRecord {
                iteration,
                snapshot: snapshot.clone(),
                copied_from: working.clone(),
                nodes: graph.nodes.len(),
                relationships: graph.relationships.len(),
                has_issues: None,
                issues: None,
                diff: None,
            };

            let evaluation = match self.evaluator.evaluate(source, &graph).await {
                Ok(evaluation) => evaluation,
                Err(e) => {
                    log::error!("Evaluator failed at {}: {}", snapshot, e);
                    iterations.push(record);
                    return Ok(RefinementOutcome {
                        termination: Termination::EvaluatorFailed(e.to_string()),
                        final_snapshot: snapshot,
                        iterations,
                    });
                }
            };
            record.has_issues = Some(evaluation.has_issues);
            record.issues = Some(evaluation.counts());

            if !evaluation.has_issues {
                log::info!("Converged at iteration {}: {} is final", iteration, snapshot);
                iterations.push(record);
                return Ok(RefinementOutcome {
                    termination: Termination::Converged,
                    final_snapshot: snapshot,
                    iterations,
                });
            }

            let diff = match self.fixer.fix(source, &graph, &evaluation).await {
                Ok(diff) => diff,
                Err(e) => {
                    log::error!("Fixer failed at {}: {}", snapshot, e);
                    iterations.push(record);
                    return Ok(RefinementOutcome {
                        termination: Termination::FixerFailed(e.to_string()),
                        final_snapshot: snapshot,
                        iterations,
                    });
                }
            };

            let report = apply_diff(&self.store, &snapshot, &diff).await?;
            record.diff = Some(report);
            iterations.push(record);
            working = snapshot;
        }

        log::info!(
            "Iteration budget of {} exhausted; {} is final",
            self.config.max_iterations,
            working
        );
        Ok(RefinementOutcome {
            termination: Termination::BudgetExhausted,
            final_snapshot: working,
            iterations,
        })
    }

    /// Drop iteration snapshots left over from an earlier run.
    async fn discard_stale_snapshots(&self, start: &str) -> Result<()> {
        for iteration in 1..=self.config.max_iterations {
            let name = self.snapshot_name(iteration);
            if name != start && self.store.discard(&name).await? {
                log::debug!("Discarded stale snapshot {}", name);
            }
        }
        Ok(())
    }
}
