pub mod backfill;
pub mod openai;

pub use backfill::{embed_snapshot, BackfillReport};
pub use openai::OpenAIEmbedder;

use async_trait::async_trait;

use crate::Result;

/// Batch text embedding. Output vectors are in input order.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;

    fn model_name(&self) -> &str;
}

#[cfg(test)]
pub(crate) mod testing {
    //! Deterministic embedders for the analyzer tests.

    use super::*;
    use crate::error::GraphRefineError;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Looks each text up in a table; unknown texts get `fallback`.
    pub struct TableEmbedder {
        table: HashMap<String, Vec<f32>>,
        fallback: Vec<f32>,
        fail: bool,
        calls: AtomicUsize,
    }

    impl TableEmbedder {
        pub fn new(entries: &[(&str, Vec<f32>)], fallback: Vec<f32>) -> Self {
            Self {
                table: entries.iter().map(|(t, v)| (t.to_string(), v.clone())).collect(),
                fallback,
                fail: false,
                calls: AtomicUsize::new(0),
            }
        }

        /// Every call fails with an embedding error.
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Self::new(&[], vec![1.0])
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Embedder for TableEmbedder {
        async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(GraphRefineError::Embedding("embedding service down".to_string()));
            }
            Ok(texts
                .iter()
                .map(|t| self.table.get(t).cloned().unwrap_or_else(|| self.fallback.clone()))
                .collect())
        }

        fn model_name(&self) -> &str {
            "table"
        }
    }
}
