//! Semantic residual analysis: how much of the source text a graph snapshot
//! does not yet represent, at token, sentence and paragraph granularity.

mod analyzer;
pub mod index;
mod report;
pub mod text;

pub use analyzer::ResidualAnalyzer;
pub use index::FlatIpIndex;
pub use report::{CoverageReport, Granularity, UnitScore, Verdict};
