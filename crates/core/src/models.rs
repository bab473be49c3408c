//! # Inquiry Models
//!
//! Centralized completion-backend configuration. Stage handlers never see
//! these types; the coordinator turns a [`ModelConfig`] into a
//! [`CompletionBackend`] once and reuses it for every stage.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::llm::gemini::DEFAULT_GEMINI_URL;
use crate::llm::local::DEFAULT_LOCAL_URL;
use crate::llm::{BackendError, CompletionBackend, GeminiBackend, LocalBackend};

/// Supported completion backends
///
/// - Local: any OpenAI-chat-compatible server (Ollama by default)
/// - Gemini: hosted API with search grounding - `GEMINI_API_KEY`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    Local,
    Gemini,
}

impl LlmProvider {
    /// Get all available providers
    pub fn all() -> Vec<LlmProvider> {
        vec![LlmProvider::Local, LlmProvider::Gemini]
    }

    /// Display name for UI
    pub fn display_name(&self) -> &'static str {
        match self {
            LlmProvider::Local => "Local LLM",
            LlmProvider::Gemini => "Gemini",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            LlmProvider::Local => "local-model",
            LlmProvider::Gemini => "gemini-2.5-flash",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            LlmProvider::Local => DEFAULT_LOCAL_URL,
            LlmProvider::Gemini => DEFAULT_GEMINI_URL,
        }
    }

    /// Whether the backend can augment Search with its own web search
    pub fn supports_grounding(&self) -> bool {
        matches!(self, LlmProvider::Gemini)
    }
}

impl std::str::FromStr for LlmProvider {
    type Err = BackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" | "ollama" | "openai" => Ok(LlmProvider::Local),
            "gemini" | "google" => Ok(LlmProvider::Gemini),
            other => Err(BackendError::Configuration(format!(
                "unknown provider '{}'",
                other
            ))),
        }
    }
}

/// Configuration for completion backend selection
///
/// ## Example
/// ```rust,ignore
/// use inquiry_core::models::{ModelConfig, LlmProvider};
///
/// let config = ModelConfig::with_provider(LlmProvider::Gemini, "gemini-2.5-flash");
/// let backend = config.create_backend()?;
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub provider: LlmProvider,
    pub model: String,
    /// Endpoint override; local servers take the full chat-completions URL
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
}

fn default_temperature() -> f32 {
    0.5
}

fn default_top_p() -> f32 {
    0.95
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self::with_provider(LlmProvider::Local, LlmProvider::Local.default_model())
    }
}

impl ModelConfig {
    /// Create config for a specific provider
    pub fn with_provider(provider: LlmProvider, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            base_url: None,
            temperature: default_temperature(),
            top_p: default_top_p(),
        }
    }

    /// Set base URL
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Effective endpoint for the provider
    pub fn endpoint(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.provider.default_base_url())
    }

    /// Create the completion backend for the configured provider
    pub fn create_backend(&self) -> Result<Arc<dyn CompletionBackend>, BackendError> {
        match self.provider {
            LlmProvider::Local => Ok(Arc::new(LocalBackend::new(self.endpoint()))),
            LlmProvider::Gemini => Ok(Arc::new(
                GeminiBackend::from_env(self.endpoint())?.with_top_p(self.top_p),
            )),
        }
    }
}
