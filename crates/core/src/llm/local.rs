//! OpenAI-chat-compatible streaming backend (Ollama, LM Studio, vLLM, ...).

use async_trait::async_trait;
use serde::Deserialize;

use super::sse::{fragment_stream, FrameParser};
use super::{BackendError, CompletionBackend, CompletionRequest, FragmentStream};

/// Default chat-completions endpoint of a local model server
pub const DEFAULT_LOCAL_URL: &str = "http://localhost:11434/v1/chat/completions";

pub struct LocalBackend {
    client: reqwest::Client,
    url: String,
}

impl LocalBackend {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }
}

impl Default for LocalBackend {
    fn default() -> Self {
        Self::new(DEFAULT_LOCAL_URL)
    }
}

#[async_trait]
impl CompletionBackend for LocalBackend {
    fn name(&self) -> &str {
        "local"
    }

    async fn open(&self, request: &CompletionRequest) -> Result<FragmentStream, BackendError> {
        let body = serde_json::json!({
            "model": request.model,
            "messages": [{ "role": "user", "content": request.prompt }],
            "temperature": request.temperature,
            "stream": true,
        });

        tracing::debug!(stage = %request.stage, url = %self.url, "Opening local completion stream");

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(fragment_stream(response, ChatDeltaParser))
    }
}

#[derive(Debug, Default, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatChoice {
    #[serde(default)]
    delta: ChatDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChatDelta {
    #[serde(default)]
    content: Option<String>,
}

struct ChatDeltaParser;

impl FrameParser for ChatDeltaParser {
    fn parse(&mut self, payload: &str) -> Result<Option<String>, BackendError> {
        let chunk: ChatChunk = serde_json::from_str(payload)
            .map_err(|e| BackendError::MalformedFrame(format!("{}: {}", e, payload)))?;
        Ok(chunk
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta.content))
    }
}
