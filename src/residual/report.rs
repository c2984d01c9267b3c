use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::error::Result;

/// Unit of source text a report is computed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Token,
    Sentence,
    Paragraph,
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Granularity::Token => "token",
            Granularity::Sentence => "sentence",
            Granularity::Paragraph => "paragraph",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Adequate,
    NeedsFinerGranularity,
}

/// Best graph match for one source unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitScore {
    pub unit: String,
    /// Closest graph term, fact or projection; `None` when nothing was compared.
    pub matched: Option<String>,
    pub similarity: f32,
    pub covered: bool,
    /// Covered by literal containment rather than similarity.
    #[serde(default)]
    pub literal: bool,
}

/// Coverage of the source text by one graph snapshot at one granularity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageReport {
    pub granularity: Granularity,
    pub snapshot: String,
    pub threshold: f32,
    pub adequate_residual: f32,
    pub total: usize,
    pub covered: usize,
    pub coverage: f64,
    pub residual: f64,
    /// Number of distinct graph targets the units were compared against.
    pub target_count: usize,
    pub units: Vec<UnitScore>,
}

impl CoverageReport {
    pub fn new(
        granularity: Granularity,
        snapshot: impl Into<String>,
        threshold: f32,
        adequate_residual: f32,
        target_count: usize,
        units: Vec<UnitScore>,
    ) -> Self {
        let total = units.len();
        let covered = units.iter().filter(|u| u.covered).count();
        // No units means nothing is left uncovered.
        let coverage = if total == 0 {
            1.0
        } else {
            covered as f64 / total as f64
        };
        Self {
            granularity,
            snapshot: snapshot.into(),
            threshold,
            adequate_residual,
            total,
            covered,
            coverage,
            residual: 1.0 - coverage,
            target_count,
            units,
        }
    }

    pub fn uncovered_count(&self) -> usize {
        self.total - self.covered
    }

    pub fn verdict(&self) -> Verdict {
        if self.residual < self.adequate_residual as f64 {
            Verdict::Adequate
        } else {
            Verdict::NeedsFinerGranularity
        }
    }

    /// Uncovered units ranked by ascending similarity.
    pub fn uncovered(&self) -> Vec<&UnitScore> {
        let mut gaps: Vec<&UnitScore> = self.units.iter().filter(|u| !u.covered).collect();
        gaps.sort_by(|a, b| {
            a.similarity
                .partial_cmp(&b.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        gaps
    }

    pub fn worst_gaps(&self, n: usize) -> Vec<&UnitScore> {
        let mut gaps = self.uncovered();
        gaps.truncate(n);
        gaps
    }

    /// Log a human-readable summary at info level.
    pub fn log_summary(&self) {
        log::info!(
            "{} coverage of '{}': {}/{} covered, coverage {:.2}%, residual {:.2}% (threshold {}, {} graph targets)",
            self.granularity,
            self.snapshot,
            self.covered,
            self.total,
            self.coverage * 100.0,
            self.residual * 100.0,
            self.threshold,
            self.target_count
        );
        match self.verdict() {
            Verdict::Adequate => log::info!("Verdict: graph extraction granularity is adequate"),
            Verdict::NeedsFinerGranularity => {
                log::warn!("Verdict: much of the source is still uncovered, extract at a finer granularity")
            }
        }
    }

    /// CSV with one row per unit: matched fact, source unit, score, status.
    pub fn to_csv(&self) -> String {
        let mut out = String::from("matched_graph_fact,source_unit,similarity_score,covered_status\n");
        for unit in &self.units {
            let status = if unit.covered { "covered" } else { "uncovered" };
            out.push_str(&format!(
                "{},{},{:.4},{}\n",
                csv_field(unit.matched.as_deref().unwrap_or("")),
                csv_field(&unit.unit),
                unit.similarity,
                status
            ));
        }
        out
    }

    /// Write the CSV export, UTF-8 with a byte-order mark for spreadsheet tools.
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut bytes = "\u{FEFF}".as_bytes().to_vec();
        bytes.extend_from_slice(self.to_csv().as_bytes());
        std::fs::write(path, bytes)?;
        Ok(())
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn unit(text: &str, similarity: f32, covered: bool) -> UnitScore {
        UnitScore {
            unit: text.to_string(),
            matched: Some("Alice KNOWS Bob".to_string()),
            similarity,
            covered,
            literal: false,
        }
    }

    fn report() -> CoverageReport {
        CoverageReport::new(
            Granularity::Sentence,
            "graph5",
            0.7,
            0.2,
            1,
            vec![unit("a", 0.9, true), unit("b", 0.3, false), unit("c", 0.1, false), unit("d", 0.8, true)],
        )
    }

    #[test]
    fn test_ratios_and_verdict() {
        let report = report();
        assert_eq!(report.total, 4);
        assert_eq!(report.covered, 2);
        assert!((report.coverage + report.residual - 1.0).abs() < 1e-12);
        assert_eq!(report.verdict(), Verdict::NeedsFinerGranularity);

        let empty = CoverageReport::new(Granularity::Token, "g", 0.82, 0.2, 0, Vec::new());
        assert_eq!(empty.residual, 0.0);
        assert_eq!(empty.verdict(), Verdict::Adequate);
    }

    #[test]
    fn test_uncovered_ranked_ascending() {
        let report = report();
        let gaps: Vec<&str> = report.uncovered().iter().map(|u| u.unit.as_str()).collect();
        assert_eq!(gaps, vec!["c", "b"]);
        assert_eq!(report.worst_gaps(1).len(), 1);
    }

    #[test]
    fn test_csv_quoting() {
        let report = CoverageReport::new(
            Granularity::Sentence,
            "g",
            0.7,
            0.2,
            1,
            vec![unit("He said \"hi\", then left", 0.5, false)],
        );
        let csv = report.to_csv();
        let row = csv.lines().nth(1).unwrap();
        assert_eq!(row, "Alice KNOWS Bob,\"He said \"\"hi\"\", then left\",0.5000,uncovered");
    }

    #[test]
    fn test_write_csv_has_bom() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("report.csv");
        report().write_csv(&path).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..3], &[0xEF, 0xBB, 0xBF]);
    }

    #[test]
    fn test_json_export_names_granularity() {
        let json = serde_json::to_value(report()).unwrap();
        assert_eq!(json["granularity"], "sentence");
    }
}
