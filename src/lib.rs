pub mod config;
pub mod error;
pub mod db;
pub mod graph;
pub mod llm;
pub mod ingest;
pub mod service;
pub mod refine;
pub mod embeddings;
pub mod cache;
pub mod residual;

pub use config::Config;
pub use error::{GraphRefineError, Result};
