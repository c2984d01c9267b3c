use crate::error::{GraphRefineError, Result};

/// Scale `v` to unit length in place. Zero vectors are left untouched.
pub fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

fn inner_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Cosine similarity of two raw vectors; 0.0 if either has zero length.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut a = a.to_vec();
    let mut b = b.to_vec();
    l2_normalize(&mut a);
    l2_normalize(&mut b);
    inner_product(&a, &b)
}

/// Exact (brute-force) inner-product index over L2-normalized vectors,
/// so scores are cosine similarities.
#[derive(Debug, Default)]
pub struct FlatIpIndex {
    dim: usize,
    vectors: Vec<Vec<f32>>,
}

impl FlatIpIndex {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            vectors: Vec::new(),
        }
    }

    /// Build an index from raw vectors. All vectors must share one dimension.
    pub fn from_vectors(vectors: Vec<Vec<f32>>) -> Result<Self> {
        let dim = vectors.first().map(Vec::len).unwrap_or(0);
        let mut index = Self::new(dim);
        for v in vectors {
            index.add(v)?;
        }
        Ok(index)
    }

    pub fn add(&mut self, mut vector: Vec<f32>) -> Result<()> {
        if vector.len() != self.dim {
            return Err(GraphRefineError::Embedding(format!(
                "Unexpected embedding dimension: expected {}, got {}",
                self.dim,
                vector.len()
            )));
        }
        l2_normalize(&mut vector);
        self.vectors.push(vector);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Top-k `(position, score)` pairs, best first.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(usize, f32)> {
        if query.len() != self.dim || k == 0 {
            return Vec::new();
        }
        let mut query = query.to_vec();
        l2_normalize(&mut query);

        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (i, inner_product(&query, v)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
    }

    /// Nearest neighbour, if the index is non-empty and the query fits.
    pub fn nearest(&self, query: &[f32]) -> Option<(usize, f32)> {
        self.search(query, 1).into_iter().next()
    }
}
