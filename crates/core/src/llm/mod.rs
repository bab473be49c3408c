//! # Completion Stream Adapter
//!
//! Backend-agnostic streaming contract between stage handlers and language
//! model endpoints. A backend opens a stream of text fragments; the
//! [`CompletionStream`] wrapper bounds it with one overall deadline and keeps
//! the running concatenation, so the final text is always exactly the
//! fragments that were handed out.
//!
//! There is no retry here. Stage handlers decide what a failure means.

pub mod gemini;
pub mod local;
pub mod sse;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use crate::swarm::pipeline::StageId;

pub use gemini::GeminiBackend;
pub use local::LocalBackend;

/// Raw fragment stream produced by a backend
pub type FragmentStream = BoxStream<'static, Result<String, BackendError>>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("completion backend unreachable: {0}")]
    Unreachable(String),
    #[error("completion backend returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed stream frame: {0}")]
    MalformedFrame(String),
    #[error("completion timed out after {0:?}")]
    Timeout(Duration),
    #[error("completion backend misconfigured: {0}")]
    Configuration(String),
}

/// One prompt for one stage
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub stage: StageId,
    pub prompt: String,
    pub model: String,
    pub temperature: f32,
    /// Ask the backend for server-side search augmentation, when it has one
    pub grounded: bool,
}

#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Send the request and return its fragment stream
    async fn open(&self, request: &CompletionRequest) -> Result<FragmentStream, BackendError>;
}

/// A fragment stream bounded by a deadline
pub struct CompletionStream {
    inner: FragmentStream,
    deadline: Instant,
    timeout: Duration,
    text: String,
    finished: bool,
}

impl CompletionStream {
    /// Open `request` on `backend`; the timeout covers connecting and streaming
    pub async fn open(
        backend: &dyn CompletionBackend,
        request: &CompletionRequest,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        let deadline = Instant::now() + timeout;
        let inner = tokio::time::timeout_at(deadline, backend.open(request))
            .await
            .map_err(|_| BackendError::Timeout(timeout))??;

        Ok(Self {
            inner,
            deadline,
            timeout,
            text: String::new(),
            finished: false,
        })
    }

    /// Next non-empty fragment in arrival order.
    ///
    /// Returns `None` once the stream ended or after the first error.
    pub async fn next_fragment(&mut self) -> Option<Result<String, BackendError>> {
        while !self.finished {
            let item = match tokio::time::timeout_at(self.deadline, self.inner.next()).await {
                Ok(item) => item,
                Err(_) => Some(Err(BackendError::Timeout(self.timeout))),
            };

            match item {
                Some(Ok(fragment)) if fragment.is_empty() => continue,
                Some(Ok(fragment)) => {
                    self.text.push_str(&fragment);
                    return Some(Ok(fragment));
                }
                Some(Err(e)) => {
                    self.finished = true;
                    return Some(Err(e));
                }
                None => self.finished = true,
            }
        }
        None
    }

    /// Concatenation of every fragment returned so far
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }
}

/// Stream a completion to the end, calling `on_fragment` for each fragment
pub async fn stream_completion<F>(
    backend: &dyn CompletionBackend,
    request: &CompletionRequest,
    timeout: Duration,
    mut on_fragment: F,
) -> Result<String, BackendError>
where
    F: FnMut(&str) + Send,
{
    let mut stream = CompletionStream::open(backend, request, timeout).await?;
    while let Some(fragment) = stream.next_fragment().await {
        on_fragment(&fragment?);
    }
    Ok(stream.into_text())
}
