use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub graphrefine: GraphRefineConfig,
    pub completion: CompletionConfig,
    pub embeddings: EmbeddingsConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub refinement: RefinementConfig,
    #[serde(default)]
    pub residual: ResidualConfig,
    #[serde(default)]
    pub graph_service: GraphServiceConfig,
}

/// Paths and process-level settings
#[derive(Debug, Clone, Deserialize)]
pub struct GraphRefineConfig {
    /// SQLite file holding every named snapshot.
    pub db_path: PathBuf,
    /// Source document the graph is built from.
    pub source_file: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Text-completion service (OpenAI-compatible chat completions)
#[derive(Debug, Clone, Deserialize)]
pub struct CompletionConfig {
    #[serde(default = "default_api_base")]
    pub base_url: String,
    pub model: String,
    pub api_key_env: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_completion_timeout")]
    pub timeout_secs: u64,
}

/// Embeddings configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingsConfig {
    #[serde(default = "default_api_base")]
    pub base_url: String,
    pub model: String,
    pub api_key_env: String,
    pub batch_size: usize,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    /// Items per request when writing embeddings back into a snapshot
    #[serde(default = "default_backfill_batch_size")]
    pub backfill_batch_size: usize,
}

/// Chunking and extraction worker pool
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractionConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Closed set of node types the model may assign.
    #[serde(default = "default_node_types")]
    pub node_types: Vec<String>,
}

/// Refinement loop settings
#[derive(Debug, Clone, Deserialize)]
pub struct RefinementConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_initial_snapshot")]
    pub initial_snapshot: String,
    #[serde(default = "default_snapshot_prefix")]
    pub snapshot_prefix: String,
}

/// Residual analysis thresholds
#[derive(Debug, Clone, Deserialize)]
pub struct ResidualConfig {
    #[serde(default = "default_token_threshold")]
    pub token_threshold: f32,
    #[serde(default = "default_sentence_threshold")]
    pub sentence_threshold: f32,
    #[serde(default = "default_paragraph_threshold")]
    pub paragraph_threshold: f32,
    #[serde(default = "default_min_sentence_chars")]
    pub min_sentence_chars: usize,
    #[serde(default = "default_min_paragraph_chars")]
    pub min_paragraph_chars: usize,
    #[serde(default = "default_max_projection_edges")]
    pub max_projection_edges: usize,
    #[serde(default = "default_adequate_residual")]
    pub adequate_residual: f32,
}

/// Graph write service (POST /add)
#[derive(Debug, Clone, Deserialize)]
pub struct GraphServiceConfig {
    #[serde(default = "default_graph_service_url")]
    pub url: String,
    #[serde(default = "default_graph_service_port")]
    pub port: u16,
    /// Snapshot written when a request does not name one.
    #[serde(default = "default_graph_service_database")]
    pub database: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_temperature() -> f32 {
    0.4
}

fn default_completion_timeout() -> u64 {
    300
}

fn default_cache_capacity() -> usize {
    1000
}

fn default_backfill_batch_size() -> usize {
    50
}

fn default_chunk_size() -> usize {
    3000
}

fn default_chunk_overlap() -> usize {
    600
}

fn default_max_workers() -> usize {
    5
}

fn default_node_types() -> Vec<String> {
    ["人物信息", "背景故事", "能力设定", "装备礼装"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_max_iterations() -> usize {
    5
}

fn default_initial_snapshot() -> String {
    "default".to_string()
}

fn default_snapshot_prefix() -> String {
    "graph".to_string()
}

fn default_token_threshold() -> f32 {
    0.82
}

fn default_sentence_threshold() -> f32 {
    0.70
}

fn default_paragraph_threshold() -> f32 {
    0.65
}

fn default_min_sentence_chars() -> usize {
    5
}

fn default_min_paragraph_chars() -> usize {
    10
}

fn default_max_projection_edges() -> usize {
    50
}

fn default_adequate_residual() -> f32 {
    0.2
}

fn default_graph_service_url() -> String {
    "http://localhost:3000/api/graph/add".to_string()
}

fn default_graph_service_port() -> u16 {
    3000
}

fn default_graph_service_database() -> String {
    "chunk".to_string()
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            max_workers: default_max_workers(),
            node_types: default_node_types(),
        }
    }
}

impl Default for RefinementConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            initial_snapshot: default_initial_snapshot(),
            snapshot_prefix: default_snapshot_prefix(),
        }
    }
}

impl Default for ResidualConfig {
    fn default() -> Self {
        Self {
            token_threshold: default_token_threshold(),
            sentence_threshold: default_sentence_threshold(),
            paragraph_threshold: default_paragraph_threshold(),
            min_sentence_chars: default_min_sentence_chars(),
            min_paragraph_chars: default_min_paragraph_chars(),
            max_projection_edges: default_max_projection_edges(),
            adequate_residual: default_adequate_residual(),
        }
    }
}

impl Default for GraphServiceConfig {
    fn default() -> Self {
        Self {
            url: default_graph_service_url(),
            port: default_graph_service_port(),
            database: default_graph_service_database(),
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// Loads environment variables from .env file (if present) before loading config.
    /// Looks for config file in this order:
    /// 1. Path specified in GRAPHREFINE_CONFIG environment variable
    /// 2. ./config.toml in current directory
    pub fn load() -> Result<Self> {
        // .env is optional
        let _ = dotenv::dotenv();

        let config_path = std::env::var("GRAPHREFINE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config = Self::from_toml(&config_str)?;
        config.validate()?;

        Ok(config)
    }

    /// Parse configuration text without touching the environment.
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).context("Failed to parse config.toml")
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        for (section, env) in [
            ("completion", &self.completion.api_key_env),
            ("embeddings", &self.embeddings.api_key_env),
        ] {
            std::env::var(env).with_context(|| {
                format!(
                    "Environment variable {} not set (required by [{}]). Set it in your .env file or as an environment variable.",
                    env, section
                )
            })?;
        }

        for (name, value) in [
            ("completion.base_url", &self.completion.base_url),
            ("embeddings.base_url", &self.embeddings.base_url),
            ("graph_service.url", &self.graph_service.url),
        ] {
            url::Url::parse(value)
                .with_context(|| format!("{} is not a valid URL: {}", name, value))?;
        }

        if self.embeddings.batch_size == 0 {
            anyhow::bail!("embeddings.batch_size must be greater than 0");
        }

        if self.extraction.chunk_size == 0 {
            anyhow::bail!("extraction.chunk_size must be greater than 0");
        }

        if self.extraction.chunk_overlap >= self.extraction.chunk_size {
            anyhow::bail!("extraction.chunk_overlap must be less than chunk_size");
        }

        if self.extraction.max_workers == 0 {
            anyhow::bail!("extraction.max_workers must be greater than 0");
        }

        if self.refinement.max_iterations == 0 {
            anyhow::bail!("refinement.max_iterations must be greater than 0");
        }

        if self.refinement.snapshot_prefix.is_empty() {
            anyhow::bail!("refinement.snapshot_prefix must not be empty");
        }

        for (name, value) in [
            ("residual.token_threshold", self.residual.token_threshold),
            ("residual.sentence_threshold", self.residual.sentence_threshold),
            ("residual.paragraph_threshold", self.residual.paragraph_threshold),
            ("residual.adequate_residual", self.residual.adequate_residual),
        ] {
            if !(0.0..=1.0).contains(&value) {
                anyhow::bail!("{} must be between 0.0 and 1.0", name);
            }
        }

        Ok(())
    }

    /// Get database path
    pub fn db_path(&self) -> &Path {
        &self.graphrefine.db_path
    }

    /// Get the source document path
    pub fn source_file(&self) -> &Path {
        &self.graphrefine.source_file
    }

    /// Read an API key from the environment variable named in the config.
    pub fn api_key(env: &str) -> Result<String> {
        std::env::var(env).with_context(|| format!("Environment variable {} not set", env))
    }
}
