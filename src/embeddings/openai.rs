use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::Embedder;
use crate::cache::EmbeddingCache;
use crate::config::EmbeddingsConfig;
use crate::error::{GraphRefineError, Result};

/// Request structure for the embeddings API
#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<String>,
}

/// Response structure from the embeddings API
#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

/// OpenAI-compatible embeddings client
///
/// Splits large inputs into `batch_size` requests and keeps results in input
/// order. Optionally serves repeated texts from an LRU cache.
pub struct OpenAIEmbedder {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    batch_size: usize,
    cache: Option<Arc<EmbeddingCache>>,
}

impl OpenAIEmbedder {
    /// `batch_size` is capped at 2048, the API's per-request input limit.
    pub fn new(base_url: &str, api_key: String, model: String, batch_size: usize) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| GraphRefineError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
            batch_size: batch_size.clamp(1, 2048),
            cache: None,
        })
    }

    pub fn from_config(config: &EmbeddingsConfig, api_key: String) -> Result<Self> {
        let embedder = Self::new(&config.base_url, api_key, config.model.clone(), config.batch_size)?;
        if config.cache_capacity > 0 {
            Ok(embedder.with_cache(Arc::new(EmbeddingCache::new(config.cache_capacity))))
        } else {
            Ok(embedder)
        }
    }

    pub fn with_cache(mut self, cache: Arc<EmbeddingCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/embeddings", self.base_url)
    }

    /// Single API request for at most `batch_size` texts.
    async fn request_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let expected = texts.len();
        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };

        let response = self
            .client
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| GraphRefineError::Embedding(format!("Network error: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(GraphRefineError::Embedding(format!(
                "Embedding API error {}: {}",
                status, body
            )));
        }

        let mut result: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| GraphRefineError::Embedding(format!("Failed to parse response: {}", e)))?;

        if result.data.len() != expected {
            return Err(GraphRefineError::Embedding(format!(
                "Expected {} embeddings, got {}",
                expected,
                result.data.len()
            )));
        }
        if result.data.iter().all(|d| d.index.is_some()) {
            result.data.sort_by_key(|d| d.index);
        }
        Ok(result.data.into_iter().map(|d| d.embedding).collect())
    }
}

/// Newlines degrade embedding quality for some models.
fn clean(text: &str) -> String {
    text.replace(['\r', '\n'], " ")
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let texts: Vec<String> = texts.iter().map(|t| clean(t)).collect();

        let mut slots: Vec<Option<Vec<f32>>> = match &self.cache {
            Some(cache) => cache.get_many(&self.model, &texts),
            None => vec![None; texts.len()],
        };
        let missing: Vec<usize> = (0..texts.len()).filter(|i| slots[*i].is_none()).collect();
        log::debug!(
            "Embedding {} texts ({} cached) with {}",
            texts.len(),
            texts.len() - missing.len(),
            self.model
        );

        for batch in missing.chunks(self.batch_size) {
            let inputs: Vec<String> = batch.iter().map(|i| texts[*i].clone()).collect();
            let embeddings = self.request_batch(inputs).await?;
            for (i, embedding) in batch.iter().zip(embeddings) {
                if let Some(cache) = &self.cache {
                    cache.put(&self.model, &texts[*i], embedding.clone());
                }
                slots[*i] = Some(embedding);
            }

            // Small pause between full batches to stay under rate limits.
            if batch.len() == self.batch_size {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }

        Ok(slots.into_iter().map(Option::unwrap_or_default).collect())
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
