//! # Tool Gateway
//!
//! Wraps the external search-tool service. Web and local-corpus queries run
//! concurrently and every failure is folded into the outcome's error list,
//! so callers always get usable prompt text back.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::state::ToolResults;
use crate::swarm::pipeline::StageId;

/// Default address of the tool service
pub const DEFAULT_TOOL_URL: &str = "http://localhost:8000";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("tool service returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("{0}")]
    Rejected(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolTask {
    WebSearch,
    LocalSearch,
}

impl ToolTask {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolTask::WebSearch => "web_search",
            ToolTask::LocalSearch => "local_search",
        }
    }
}

/// Body of `POST /tool`
#[derive(Debug, Clone, Serialize)]
pub struct ToolRequest {
    pub agent_name: String,
    pub task: ToolTask,
    pub query: String,
    pub metadata: serde_json::Value,
    pub id: String,
}

/// Response of `POST /tool`
#[derive(Debug, Clone, Deserialize)]
pub struct ToolResponse {
    #[serde(default)]
    pub result: String,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

#[async_trait]
pub trait ToolBackend: Send + Sync {
    /// Whether the service reports itself available
    async fn health(&self) -> bool;

    async fn call(&self, request: &ToolRequest) -> Result<ToolResponse, ToolError>;
}

/// Tool service reached over HTTP
pub struct HttpToolBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpToolBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ToolBackend for HttpToolBackend {
    async fn health(&self) -> bool {
        match self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!(error = %e, "Tool service health probe failed");
                false
            }
        }
    }

    async fn call(&self, request: &ToolRequest) -> Result<ToolResponse, ToolError> {
        let response = self
            .client
            .post(format!("{}/tool", self.base_url))
            .json(request)
            .send()
            .await
            .map_err(|e| ToolError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ToolError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<ToolResponse>()
            .await
            .map_err(|e| ToolError::Transport(e.to_string()))
    }
}

/// Which searches a stage asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOptions {
    pub web: bool,
    pub local: bool,
}

impl ToolOptions {
    pub fn any(&self) -> bool {
        self.web || self.local
    }
}

/// Tool service settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolConfig {
    /// `None` disables the tool service entirely
    pub base_url: Option<String>,
    pub enable_web_search: bool,
    pub enable_local_search: bool,
    pub timeout_secs: u64,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            base_url: Some(DEFAULT_TOOL_URL.to_string()),
            enable_web_search: true,
            enable_local_search: true,
            timeout_secs: 30,
        }
    }
}

impl ToolConfig {
    pub fn options(&self) -> ToolOptions {
        ToolOptions {
            web: self.enable_web_search,
            local: self.enable_local_search,
        }
    }
}

/// Normalized result of one gateway invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutcome {
    pub web_text: Option<String>,
    pub local_text: Option<String>,
    pub errors: Vec<String>,
    /// The health probe failed and no calls were made
    pub unavailable: bool,
}

impl ToolOutcome {
    fn unavailable() -> Self {
        Self {
            unavailable: true,
            errors: vec!["tool service unavailable".to_string()],
            ..Self::default()
        }
    }

    /// Text embedded into a prompt through the `{tool_results}` key
    pub fn prompt_text(&self) -> String {
        if self.unavailable {
            return "**Tool Results:** Tool service unavailable for this research.\n".to_string();
        }

        let mut sections = Vec::new();
        if let Some(web) = self.web_text.as_deref().filter(|t| !t.trim().is_empty()) {
            sections.push(format!("**Web Search Results:**\n{}\n", web));
        }
        if let Some(local) = self.local_text.as_deref().filter(|t| !t.trim().is_empty()) {
            sections.push(format!("**Local Search Results:**\n{}\n", local));
        }

        if sections.is_empty() {
            return "**Tool Results:** No additional research data available.\n".to_string();
        }
        format!(
            "{}\n**Instructions:** Use the above research data to enhance your analysis.\n",
            sections.join("\n")
        )
    }

    pub fn to_results(&self) -> ToolResults {
        ToolResults {
            web_text: self.web_text.clone(),
            local_text: self.local_text.clone(),
            errors: self.errors.clone(),
            timestamp: Utc::now(),
        }
    }
}

pub struct ToolGateway {
    backend: Option<Arc<dyn ToolBackend>>,
    options: ToolOptions,
    timeout: Duration,
}

impl ToolGateway {
    pub fn new(backend: Arc<dyn ToolBackend>, options: ToolOptions, timeout: Duration) -> Self {
        Self {
            backend: Some(backend),
            options,
            timeout,
        }
    }

    /// Gateway that never calls out; every stage sees "no data"
    pub fn disabled() -> Self {
        Self {
            backend: None,
            options: ToolOptions {
                web: false,
                local: false,
            },
            timeout: Duration::from_secs(30),
        }
    }

    pub fn from_config(config: &ToolConfig) -> Self {
        match &config.base_url {
            Some(url) => Self::new(
                Arc::new(HttpToolBackend::new(url.clone())),
                config.options(),
                Duration::from_secs(config.timeout_secs),
            ),
            None => Self::disabled(),
        }
    }

    pub fn options(&self) -> ToolOptions {
        self.options
    }

    /// Whether the configured service answers its health probe
    pub async fn is_available(&self) -> bool {
        match &self.backend {
            Some(backend) => tokio::time::timeout(self.timeout, backend.health())
                .await
                .unwrap_or(false),
            None => false,
        }
    }

    /// Run the configured searches for `query` on behalf of `agent`
    #[tracing::instrument(skip(self, query, metadata), fields(query_preview = %query.chars().take(50).collect::<String>()))]
    pub async fn run_tools(
        &self,
        agent: StageId,
        query: &str,
        metadata: serde_json::Value,
    ) -> ToolOutcome {
        let Some(backend) = self.backend.as_ref().filter(|_| self.options.any()) else {
            return ToolOutcome::default();
        };

        if !self.is_available().await {
            tracing::warn!("Tool service unavailable, skipping searches");
            return ToolOutcome::unavailable();
        }

        let web = self.invoke(
            backend,
            agent,
            ToolTask::WebSearch,
            query,
            &metadata,
            self.options.web,
        );
        let local = self.invoke(
            backend,
            agent,
            ToolTask::LocalSearch,
            query,
            &metadata,
            self.options.local,
        );
        let (web, local) = tokio::join!(web, local);

        let mut outcome = ToolOutcome::default();
        for (task, result) in [(ToolTask::WebSearch, web), (ToolTask::LocalSearch, local)] {
            match result {
                None => {}
                Some(Ok(text)) => match task {
                    ToolTask::WebSearch => outcome.web_text = Some(text),
                    ToolTask::LocalSearch => outcome.local_text = Some(text),
                },
                Some(Err(e)) => {
                    tracing::warn!(task = task.as_str(), error = %e, "Tool call failed");
                    outcome.errors.push(format!("{}: {}", task.as_str(), e));
                }
            }
        }
        outcome
    }

    async fn invoke(
        &self,
        backend: &Arc<dyn ToolBackend>,
        agent: StageId,
        task: ToolTask,
        query: &str,
        metadata: &serde_json::Value,
        enabled: bool,
    ) -> Option<Result<String, ToolError>> {
        if !enabled {
            return None;
        }

        let request = ToolRequest {
            agent_name: agent.as_str().to_string(),
            task,
            query: query.to_string(),
            metadata: metadata.clone(),
            id: uuid::Uuid::new_v4().to_string(),
        };

        let result = match tokio::time::timeout(self.timeout, backend.call(&request)).await {
            Ok(Ok(response)) if response.success => Ok(response.result),
            Ok(Ok(response)) => Err(ToolError::Rejected(
                response
                    .error
                    .unwrap_or_else(|| "tool reported failure".to_string()),
            )),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ToolError::Timeout(self.timeout)),
        };
        Some(result)
    }
}
