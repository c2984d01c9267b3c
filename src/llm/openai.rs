use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::client::{CompletionClient, CompletionRequest};
use crate::config::CompletionConfig;
use crate::error::{GraphRefineError, Result};

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    content: Option<String>,
}

/// Chat-completions client for any OpenAI-compatible endpoint.
pub struct OpenAICompletionClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAICompletionClient {
    pub fn new(base_url: &str, api_key: String, model: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GraphRefineError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
        })
    }

    pub fn from_config(config: &CompletionConfig, api_key: String) -> Result<Self> {
        Self::new(
            &config.base_url,
            api_key,
            config.model.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl CompletionClient for OpenAICompletionClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let model = if request.model.is_empty() {
            self.model.as_str()
        } else {
            request.model.as_str()
        };
        let body = ChatRequest {
            model,
            messages: vec![
                ChatMessage { role: "system", content: &request.system },
                ChatMessage { role: "user", content: &request.user },
            ],
            temperature: request.temperature,
        };

        let start = std::time::Instant::now();
        let response = self
            .client
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| GraphRefineError::Transport(format!("Completion request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(GraphRefineError::Transport(format!(
                "Completion API error {}: {}",
                status, body
            )));
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            GraphRefineError::MalformedResponse(format!("Failed to parse completion envelope: {}", e))
        })?;
        log::debug!("Completion call took {:?}", start.elapsed());

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| GraphRefineError::MalformedResponse("Completion has no message content".to_string()))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
