use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::Arc;

use super::json::parse_json_payload;
use crate::Result;

/// One chat completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    /// System instructions
    pub system: String,
    /// User content
    pub user: String,
    pub model: String,
    pub temperature: f32,
}

/// Text-in, text-out completion service.
///
/// Failures where no usable reply arrived are reported as
/// [`GraphRefineError::Transport`](crate::error::GraphRefineError::Transport);
/// a reply whose envelope cannot be read is
/// [`GraphRefineError::MalformedResponse`](crate::error::GraphRefineError::MalformedResponse).
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;

    /// Model name used when a caller does not override it
    fn model_name(&self) -> &str;
}

/// Builds one independent client per worker.
pub type ClientFactory = Arc<dyn Fn() -> Result<Arc<dyn CompletionClient>> + Send + Sync>;

/// Run a completion and decode the single JSON object embedded in its text.
pub async fn complete_json<T: DeserializeOwned>(
    client: &dyn CompletionClient,
    request: &CompletionRequest,
) -> Result<T> {
    let text = client.complete(request).await?;
    parse_json_payload(&text)
}
