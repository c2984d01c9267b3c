use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use super::{AddRequest, AddResponse, ErrorBody, GraphSink};
use crate::error::{GraphRefineError, Result};

/// HTTP client for a graph write service.
pub struct GraphServiceClient {
    client: Client,
    url: String,
}

impl GraphServiceClient {
    /// `url` is the full endpoint, e.g. `http://localhost:3000/api/graph/add`.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GraphRefineError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, url: url.into() })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl GraphSink for GraphServiceClient {
    async fn add(&self, request: AddRequest) -> Result<AddResponse> {
        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| GraphRefineError::Transport(format!("Graph service unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            // Prefer the service's own error message when it sent one.
            let message = serde_json::from_str::<ErrorBody>(&text)
                .map(|b| b.error)
                .unwrap_or(text);
            return Err(GraphRefineError::GraphService(format!("{}: {}", status, message)));
        }

        response.json().await.map_err(|e| {
            GraphRefineError::MalformedResponse(format!("Unreadable graph service reply: {}", e))
        })
    }
}
