use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::index::{cosine_similarity, FlatIpIndex};
use super::report::{CoverageReport, Granularity, UnitScore};
use super::text::{paragraph_entities, significant_tokens, split_paragraphs, split_sentences};
use crate::config::ResidualConfig;
use crate::embeddings::Embedder;
use crate::error::Result;
use crate::graph::{project_facts, GraphData, GraphStore, FACT_SEPARATOR};

/// Measures how much of a source text a graph snapshot still misses.
///
/// Each granularity makes at most one embedding round trip. Scores are
/// cosine similarities; a unit is covered when its score is strictly above
/// the granularity's threshold.
pub struct ResidualAnalyzer {
    embedder: Arc<dyn Embedder>,
    config: ResidualConfig,
}

impl ResidualAnalyzer {
    pub fn new(embedder: Arc<dyn Embedder>, config: ResidualConfig) -> Self {
        Self { embedder, config }
    }

    pub fn threshold(&self, granularity: Granularity) -> f32 {
        match granularity {
            Granularity::Token => self.config.token_threshold,
            Granularity::Sentence => self.config.sentence_threshold,
            Granularity::Paragraph => self.config.paragraph_threshold,
        }
    }

    /// Analyze `text` against a stored snapshot.
    pub async fn analyze(
        &self,
        store: &GraphStore,
        snapshot: &str,
        text: &str,
        granularity: Granularity,
    ) -> Result<CoverageReport> {
        let graph = store.read(snapshot).await?;
        log::info!(
            "Residual analysis ({}) of '{}': {} nodes, {} relationships",
            granularity,
            snapshot,
            graph.nodes.len(),
            graph.relationships.len()
        );
        let report = match granularity {
            Granularity::Token => self.analyze_tokens(snapshot, text, &graph).await,
            Granularity::Sentence => self.analyze_sentences(snapshot, text, &graph).await,
            Granularity::Paragraph => self.analyze_paragraphs(store, snapshot, text, &graph).await?,
        };
        Ok(report)
    }

    /// Token, sentence and paragraph reports, in that order.
    pub async fn analyze_all(&self, store: &GraphStore, snapshot: &str, text: &str) -> Result<Vec<CoverageReport>> {
        let mut reports = Vec::with_capacity(3);
        for granularity in [Granularity::Token, Granularity::Sentence, Granularity::Paragraph] {
            reports.push(self.analyze(store, snapshot, text, granularity).await?);
        }
        Ok(reports)
    }

    /// Significant tokens against node ids and relationship types.
    ///
    /// A token is also covered when it and some graph term contain one
    /// another literally. Repeated tokens count once each but are embedded once.
    pub async fn analyze_tokens(&self, snapshot: &str, text: &str, graph: &GraphData) -> CoverageReport {
        let threshold = self.config.token_threshold;
        let tokens = significant_tokens(text);
        let terms: Vec<String> = graph.terms().into_iter().filter(|t| !t.is_empty()).collect();
        log::debug!("{} significant tokens, {} graph terms", tokens.len(), terms.len());

        let unique = dedup(&tokens);
        let nearest = self.nearest_targets(&unique, &terms).await;
        let by_token: HashMap<&str, Option<(usize, f32)>> =
            unique.iter().map(String::as_str).zip(nearest).collect();

        let units = tokens
            .iter()
            .map(|token| {
                let best = by_token.get(token.as_str()).copied().flatten();
                let similarity = best.map(|(_, s)| s).unwrap_or(0.0);
                let literal_term = terms
                    .iter()
                    .find(|term| term.contains(token.as_str()) || token.contains(term.as_str()));
                let matched = literal_term
                    .cloned()
                    .or_else(|| best.map(|(i, _)| terms[i].clone()));
                UnitScore {
                    unit: token.clone(),
                    matched,
                    similarity,
                    covered: similarity > threshold || literal_term.is_some(),
                    literal: literal_term.is_some(),
                }
            })
            .collect();

        self.finish(Granularity::Token, snapshot, terms.len(), units)
    }

    /// Sentences against `"source TYPE target"` fact strings.
    pub async fn analyze_sentences(&self, snapshot: &str, text: &str, graph: &GraphData) -> CoverageReport {
        let threshold = self.config.sentence_threshold;
        let sentences = split_sentences(text, self.config.min_sentence_chars);
        let facts = dedup(&graph.facts());
        log::debug!("{} sentences, {} facts", sentences.len(), facts.len());

        let unique = dedup(&sentences);
        let nearest = self.nearest_targets(&unique, &facts).await;
        let by_sentence: HashMap<&str, Option<(usize, f32)>> =
            unique.iter().map(String::as_str).zip(nearest).collect();

        let units = sentences
            .iter()
            .map(|sentence| {
                let best = by_sentence.get(sentence.as_str()).copied().flatten();
                let similarity = best.map(|(_, s)| s).unwrap_or(0.0);
                UnitScore {
                    unit: sentence.clone(),
                    matched: best.map(|(i, _)| facts[i].clone()),
                    similarity,
                    covered: similarity > threshold,
                    literal: false,
                }
            })
            .collect();

        self.finish(Granularity::Sentence, snapshot, facts.len(), units)
    }

    /// Paragraphs against the facts of their own neighbourhood in the graph.
    ///
    /// A paragraph whose projection is empty scores 0 without being embedded.
    pub async fn analyze_paragraphs(
        &self,
        store: &GraphStore,
        snapshot: &str,
        text: &str,
        graph: &GraphData,
    ) -> Result<CoverageReport> {
        let threshold = self.config.paragraph_threshold;
        let paragraphs = split_paragraphs(text, self.config.min_paragraph_chars);
        let node_ids = graph.node_ids();

        let mut projections = Vec::with_capacity(paragraphs.len());
        for paragraph in &paragraphs {
            let entities = paragraph_entities(paragraph, &node_ids);
            let facts = if graph.relationships.is_empty() {
                Vec::new()
            } else {
                project_facts(store, snapshot, &entities, self.config.max_projection_edges).await?
            };
            projections.push(facts.join(FACT_SEPARATOR));
        }

        let projected: Vec<usize> = (0..paragraphs.len())
            .filter(|i| !projections[*i].is_empty())
            .collect();
        let distinct_projections = dedup(
            &projected.iter().map(|i| projections[*i].clone()).collect::<Vec<_>>(),
        );
        log::debug!(
            "{} paragraphs, {} with a graph projection",
            paragraphs.len(),
            projected.len()
        );

        let mut scores = vec![0.0f32; paragraphs.len()];
        if !projected.is_empty() {
            let mut batch: Vec<String> = projected.iter().map(|i| paragraphs[*i].clone()).collect();
            batch.extend(distinct_projections.iter().cloned());
            match self.embedder.embed_batch(batch).await {
                Ok(vectors) if vectors.len() == projected.len() + distinct_projections.len() => {
                    let (para_vecs, proj_vecs) = vectors.split_at(projected.len());
                    let proj_pos: HashMap<&str, usize> = distinct_projections
                        .iter()
                        .enumerate()
                        .map(|(pos, p)| (p.as_str(), pos))
                        .collect();
                    for (k, i) in projected.iter().enumerate() {
                        if let Some(pos) = proj_pos.get(projections[*i].as_str()) {
                            scores[*i] = cosine_similarity(&para_vecs[k], &proj_vecs[*pos]);
                        }
                    }
                }
                Ok(vectors) => log::warn!(
                    "Embedding service returned {} vectors for {} inputs, paragraphs score 0",
                    vectors.len(),
                    projected.len() + distinct_projections.len()
                ),
                Err(e) => log::warn!("Paragraph embedding failed, paragraphs score 0: {}", e),
            }
        }

        let units = paragraphs
            .into_iter()
            .zip(projections)
            .zip(scores)
            .map(|((paragraph, projection), similarity)| UnitScore {
                unit: paragraph,
                matched: (!projection.is_empty()).then_some(projection),
                similarity,
                covered: similarity > threshold,
                literal: false,
            })
            .collect();

        Ok(self.finish(Granularity::Paragraph, snapshot, distinct_projections.len(), units))
    }

    /// Nearest target for every unit, from a single embedding round trip.
    ///
    /// `None` when there are no targets or the embedding call failed.
    async fn nearest_targets(&self, units: &[String], targets: &[String]) -> Vec<Option<(usize, f32)>> {
        if units.is_empty() || targets.is_empty() {
            return vec![None; units.len()];
        }

        let mut batch = units.to_vec();
        batch.extend(targets.iter().cloned());
        let vectors = match self.embedder.embed_batch(batch).await {
            Ok(v) if v.len() == units.len() + targets.len() => v,
            Ok(v) => {
                log::warn!(
                    "Embedding service returned {} vectors for {} inputs, units score 0",
                    v.len(),
                    units.len() + targets.len()
                );
                return vec![None; units.len()];
            }
            Err(e) => {
                log::warn!("Embedding failed, {} units score 0: {}", units.len(), e);
                return vec![None; units.len()];
            }
        };

        let mut vectors = vectors;
        let target_vecs = vectors.split_off(units.len());
        let index = match FlatIpIndex::from_vectors(target_vecs) {
            Ok(index) => index,
            Err(e) => {
                log::warn!("Cannot index graph targets, units score 0: {}", e);
                return vec![None; units.len()];
            }
        };

        vectors.iter().map(|v| index.nearest(v)).collect()
    }

    fn finish(
        &self,
        granularity: Granularity,
        snapshot: &str,
        target_count: usize,
        units: Vec<UnitScore>,
    ) -> CoverageReport {
        CoverageReport::new(
            granularity,
            snapshot,
            self.threshold(granularity),
            self.config.adequate_residual,
            target_count,
            units,
        )
    }
}

/// Distinct values in first-appearance order.
fn dedup(values: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    values
        .iter()
        .filter(|v| seen.insert(v.as_str()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;
    use crate::embeddings::testing::TableEmbedder;
    use crate::graph::{Edge, Node};
    use tempfile::TempDir;

    const ON: [f32; 2] = [1.0, 0.0];
    const OFF: [f32; 2] = [0.0, 1.0];

    fn analyzer(embedder: Arc<TableEmbedder>) -> ResidualAnalyzer {
        ResidualAnalyzer::new(embedder, ResidualConfig::default())
    }

    fn castle_graph() -> GraphData {
        GraphData {
            nodes: vec![
                Node::new("castle", "背景故事", "An old fortress"),
                Node::new("knight", "人物信息", "A sworn guard"),
            ],
            relationships: vec![Edge::new("knight", "castle", "GUARDS")],
        }
    }

    #[tokio::test]
    async fn test_ten_token_scenario() {
        let ids = [
            "alpha", "beta", "gamma", "delta", "epsilon", "zeta", "copper", "violin", "orchid", "tundra",
        ];
        let graph = GraphData {
            nodes: ids.iter().map(|id| Node::new(*id, "概念", "")).collect(),
            relationships: Vec::new(),
        };
        // The four extra tokens share no substring with any graph id and are
        // orthogonal to all of them.
        let unrelated = ["river", "meadow", "lantern", "harbor"];
        let entries: Vec<(&str, Vec<f32>)> = unrelated.iter().map(|t| (*t, ON.to_vec())).collect();
        let embedder = Arc::new(TableEmbedder::new(&entries, OFF.to_vec()));
        let analyzer = analyzer(embedder.clone());

        let text = "alpha beta gamma delta epsilon zeta river meadow lantern harbor";
        let report = analyzer.analyze_tokens("graph5", text, &graph).await;

        assert_eq!(report.total, 10);
        assert_eq!(report.covered, 6);
        assert_eq!(report.target_count, 10);
        assert!((report.coverage - 0.6).abs() < 1e-9);
        assert!((report.residual - 0.4).abs() < 1e-9);
        for unit in &report.units[..6] {
            assert!(unit.covered && unit.literal);
            assert_eq!(unit.matched.as_deref(), Some(unit.unit.as_str()));
        }
        for unit in &report.units[6..] {
            assert!(!unit.covered && !unit.literal);
            assert!(unit.similarity.abs() < 1e-6);
        }
        assert_eq!(embedder.calls(), 1);
    }

    #[tokio::test]
    async fn test_chinese_content_words_fully_covered() {
        let graph = GraphData {
            nodes: ["喜欢", "阅读", "古籍"]
                .iter()
                .map(|id| Node::new(*id, "概念", ""))
                .collect(),
            relationships: Vec::new(),
        };
        let embedder = Arc::new(TableEmbedder::new(&[], OFF.to_vec()));
        let analyzer = analyzer(embedder);

        let report = analyzer.analyze_tokens("g", "她喜欢阅读古籍", &graph).await;

        assert!(report.total >= 3);
        assert_eq!(report.covered, report.total);
        assert_eq!(report.residual, 0.0);
        assert!(report.units.iter().all(|u| u.literal));
    }

    #[tokio::test]
    async fn test_literal_match_overrides_low_similarity() {
        // "castles" is orthogonal to every graph term.
        let embedder = Arc::new(TableEmbedder::new(&[("castles", ON.to_vec())], OFF.to_vec()));
        let analyzer = analyzer(embedder);

        let report = analyzer.analyze_tokens("g", "castles", &castle_graph()).await;
        assert_eq!(report.covered, 1);
        assert!(report.units[0].literal);
        assert_eq!(report.units[0].matched.as_deref(), Some("castle"));
        assert!(report.units[0].similarity < 0.82);
    }

    #[tokio::test]
    async fn test_empty_graph_is_fully_residual_without_embedding() {
        let embedder = Arc::new(TableEmbedder::new(&[], ON.to_vec()));
        let analyzer = analyzer(embedder.clone());
        let empty = GraphData::default();
        let text = "Alice guards the castle.\n\nAlice has guarded the castle for years.";

        let tokens = analyzer.analyze_tokens("g", text, &empty).await;
        let sentences = analyzer.analyze_sentences("g", text, &empty).await;
        assert_eq!(tokens.residual, 1.0);
        assert_eq!(sentences.residual, 1.0);
        assert_eq!(tokens.target_count, 0);
        assert_eq!(embedder.calls(), 0);
    }

    #[tokio::test]
    async fn test_embedding_failure_scores_zero() {
        let embedder = Arc::new(TableEmbedder::failing());
        let analyzer = analyzer(embedder.clone());

        let report = analyzer
            .analyze_tokens("g", "dragon castles dragon", &castle_graph())
            .await;
        assert_eq!(embedder.calls(), 1);
        assert_eq!(report.total, 3);
        // Only the literal match survives.
        assert_eq!(report.covered, 1);
        assert!(report.units.iter().all(|u| u.similarity == 0.0));
        assert!(report.coverage >= 0.0 && report.residual <= 1.0);
        assert!((report.coverage + report.residual - 1.0).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_sentences_against_facts() {
        let embedder = Arc::new(TableEmbedder::new(
            &[
                ("The knight guards the castle.", ON.to_vec()),
                ("knight GUARDS castle", ON.to_vec()),
            ],
            OFF.to_vec(),
        ));
        let analyzer = analyzer(embedder.clone());
        let text = "The knight guards the castle. Dragons sleep beneath the hills.";

        let report = analyzer.analyze_sentences("g", text, &castle_graph()).await;
        assert_eq!(report.total, 2);
        assert_eq!(report.covered, 1);
        assert_eq!(report.units[0].matched.as_deref(), Some("knight GUARDS castle"));
        assert_eq!(report.worst_gaps(3)[0].unit, "Dragons sleep beneath the hills.");
        assert_eq!(embedder.calls(), 1);
    }

    #[tokio::test]
    async fn test_paragraphs_use_local_projection() {
        let temp_dir = TempDir::new().unwrap();
        let store = GraphStore::open(Db::new(temp_dir.path().join("test.db")))
            .await
            .unwrap();
        store.upsert_graph("graph1", castle_graph()).await.unwrap();

        let first = "The knight rode back to the castle at dawn.";
        let second = "Winter was cold and long that year.";
        let embedder = Arc::new(TableEmbedder::new(
            &[(first, ON.to_vec()), ("knight GUARDS castle", ON.to_vec())],
            OFF.to_vec(),
        ));
        let analyzer = analyzer(embedder.clone());

        let text = format!("{}\n\n{}", first, second);
        let report = analyzer
            .analyze(&store, "graph1", &text, Granularity::Paragraph)
            .await
            .unwrap();

        assert_eq!(report.total, 2);
        assert_eq!(report.covered, 1);
        assert_eq!(report.units[0].matched.as_deref(), Some("knight GUARDS castle"));
        // No graph neighbourhood: scored 0 without a comparison target.
        assert!(report.units[1].matched.is_none());
        assert_eq!(report.units[1].similarity, 0.0);
        assert_eq!(report.target_count, 1);
        assert_eq!(embedder.calls(), 1);
    }

    #[tokio::test]
    async fn test_analyze_missing_snapshot() {
        let temp_dir = TempDir::new().unwrap();
        let store = GraphStore::open(Db::new(temp_dir.path().join("test.db")))
            .await
            .unwrap();
        let analyzer = analyzer(Arc::new(TableEmbedder::new(&[], ON.to_vec())));

        let err = analyzer
            .analyze(&store, "graph9", "Some text here.", Granularity::Token)
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::GraphRefineError::SnapshotNotFound(_)));
    }
}
