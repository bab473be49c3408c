//! Hosted Gemini backend with optional server-side search grounding.
//!
//! Grounded requests collect the web sources reported in the stream's
//! grounding metadata and emit them as one trailing `**Sources:**` fragment.

use async_trait::async_trait;
use serde::Deserialize;

use super::sse::{fragment_stream, FrameParser};
use super::{BackendError, CompletionBackend, CompletionRequest, FragmentStream};

pub const DEFAULT_GEMINI_URL: &str = "https://generativelanguage.googleapis.com";

pub struct GeminiBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    top_p: f32,
}

impl GeminiBackend {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            top_p: 0.95,
        }
    }

    /// Read the key from `GEMINI_API_KEY`, falling back to `API_KEY`
    pub fn from_env(base_url: impl Into<String>) -> Result<Self, BackendError> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .or_else(|_| std::env::var("API_KEY"))
            .map_err(|_| {
                BackendError::Configuration("GEMINI_API_KEY is not set".to_string())
            })?;
        Ok(Self::new(base_url, api_key))
    }

    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = top_p;
        self
    }

    fn endpoint(&self, model: &str) -> String {
        format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            self.base_url.trim_end_matches('/'),
            model
        )
    }
}

#[async_trait]
impl CompletionBackend for GeminiBackend {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn open(&self, request: &CompletionRequest) -> Result<FragmentStream, BackendError> {
        let mut body = serde_json::json!({
            "contents": [{ "role": "user", "parts": [{ "text": request.prompt }] }],
            "generationConfig": {
                "temperature": request.temperature,
                "topP": self.top_p,
            },
        });
        if request.grounded {
            body["tools"] = serde_json::json!([{ "google_search": {} }]);
        }

        tracing::debug!(
            stage = %request.stage,
            model = %request.model,
            grounded = request.grounded,
            "Opening Gemini completion stream"
        );

        let response = self
            .client
            .post(self.endpoint(&request.model))
            .header("x-goog-api-key", &self.api_key)
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

        Ok(fragment_stream(
            response,
            GeminiParser {
                grounded: request.grounded,
                sources: Vec::new(),
            },
        ))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateChunk {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Debug, Default, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroundingMetadata {
    #[serde(default)]
    grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Debug, Default, Deserialize)]
struct GroundingChunk {
    #[serde(default)]
    web: Option<WebSource>,
}

#[derive(Debug, Default, Deserialize)]
struct WebSource {
    #[serde(default)]
    uri: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

struct GeminiParser {
    grounded: bool,
    /// (title, uri) in first-seen order
    sources: Vec<(String, String)>,
}

impl FrameParser for GeminiParser {
    fn parse(&mut self, payload: &str) -> Result<Option<String>, BackendError> {
        let chunk: GenerateChunk = serde_json::from_str(payload)
            .map_err(|e| BackendError::MalformedFrame(format!("{}: {}", e, payload)))?;

        let Some(candidate) = chunk.candidates.into_iter().next() else {
            return Ok(None);
        };

        if let Some(metadata) = candidate.grounding_metadata {
            for web in metadata.grounding_chunks.into_iter().filter_map(|c| c.web) {
                if let Some(uri) = web.uri {
                    if !self.sources.iter().any(|(_, seen)| *seen == uri) {
                        self.sources.push((web.title.unwrap_or_default(), uri));
                    }
                }
            }
        }

        let text: String = candidate
            .content
            .map(|content| content.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();
        Ok((!text.is_empty()).then_some(text))
    }

    fn finish(&mut self) -> Option<String> {
        if !self.grounded || self.sources.is_empty() {
            return None;
        }
        let list: Vec<String> = self
            .sources
            .iter()
            .map(|(title, uri)| format!("- {}: {}", title, uri))
            .collect();
        Some(format!("\n\n**Sources:**\n{}", list.join("\n")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::stream_completion;
    use crate::swarm::pipeline::StageId;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(grounded: bool) -> CompletionRequest {
        CompletionRequest {
            stage: StageId::Search,
            prompt: "Topic: kelp forests".to_string(),
            model: "gemini-2.5-flash".to_string(),
            temperature: 0.5,
            grounded,
        }
    }

    #[tokio::test]
    async fn test_grounded_stream_appends_sources() {
        let server = MockServer::start().await;
        let body = [
            r#"data: {"candidates":[{"content":{"parts":[{"text":"Kelp "}]}}]}"#,
            r#"data: {"candidates":[{"content":{"parts":[{"text":"grows fast."}]},"groundingMetadata":{"groundingChunks":[{"web":{"uri":"https://a.example","title":"A"}},{"web":{"uri":"https://a.example","title":"A"}},{"web":{"uri":"https://b.example","title":"B"}}]}}]}"#,
        ]
        .iter()
        .map(|l| format!("{}\r\n\r\n", l))
        .collect::<String>();

        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-2.5-flash:streamGenerateContent"))
            .and(header("x-goog-api-key", "test-key"))
            .and(body_partial_json(serde_json::json!({
                "tools": [{ "google_search": {} }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .expect(1)
            .mount(&server)
            .await;

        let backend = GeminiBackend::new(server.uri(), "test-key");
        let mut seen = Vec::new();
        let text = stream_completion(&backend, &request(true), Duration::from_secs(5), |f| {
            seen.push(f.to_string())
        })
        .await
        .unwrap();

        assert_eq!(seen.len(), 3);
        assert_eq!(
            text,
            "Kelp grows fast.\n\n**Sources:**\n- A: https://a.example\n- B: https://b.example"
        );
    }

    #[tokio::test]
    async fn test_ungrounded_request_has_no_sources() {
        let server = MockServer::start().await;
        let body = format!(
            "{}\n\n",
            r#"data: {"candidates":[{"content":{"parts":[{"text":"Plain"}]},"groundingMetadata":{"groundingChunks":[{"web":{"uri":"https://a.example","title":"A"}}]}}]}"#
        );
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let backend = GeminiBackend::new(server.uri(), "k");
        let text = stream_completion(&backend, &request(false), Duration::from_secs(5), |_| {})
            .await
            .unwrap();
        assert_eq!(text, "Plain");
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("quota"))
            .mount(&server)
            .await;

        let backend = GeminiBackend::new(server.uri(), "k");
        let result =
            stream_completion(&backend, &request(true), Duration::from_secs(5), |_| {}).await;
        assert_eq!(
            result,
            Err(BackendError::Status {
                status: 429,
                body: "quota".to_string()
            })
        );
    }
}
