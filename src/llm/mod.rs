//! Completion-service access: client trait, OpenAI-compatible client,
//! JSON payload location and prompt templates.

mod client;
mod json;
mod openai;
pub mod prompts;

pub use client::{complete_json, ClientFactory, CompletionClient, CompletionRequest};
pub use json::{locate_json_object, parse_json_payload};
pub use openai::OpenAICompletionClient;

#[cfg(test)]
pub(crate) use client::testing;

use std::sync::Arc;

use crate::config::CompletionConfig;

/// Factory that builds a fresh OpenAI-compatible client for every caller.
pub fn openai_factory(config: CompletionConfig, api_key: String) -> ClientFactory {
    Arc::new(move || {
        let client = OpenAICompletionClient::from_config(&config, api_key.clone())?;
        Ok(Arc::new(client) as Arc<dyn CompletionClient>)
    })
}
