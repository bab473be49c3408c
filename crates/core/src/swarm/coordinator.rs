//! # Swarm Coordinator
//!
//! Owns the [`PipelineState`] and drives the stage sequence from Search to
//! FEEDBACK. Only one run may be in flight: every entry point first claims
//! the run under the state lock (`prepare_*`) and then executes the returned
//! [`RunPlan`], so an HTTP handler can reject a concurrent request
//! synchronously and spawn the run afterwards.
//!
//! ```rust,ignore
//! use inquiry_core::swarm::{Coordinator, CoordinatorConfig};
//!
//! let coordinator = Coordinator::new(CoordinatorConfig::default())?;
//! let state = coordinator.start("Ocean acidification").await?;
//! ```

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};

use crate::llm::{BackendError, CompletionBackend, CompletionRequest, CompletionStream};
use crate::models::ModelConfig;
use crate::skills::{handler_for, template_for, PromptContext, StageHandler};
use crate::state::{
    codec, render_report, run_key, PipelineState, SnapshotStore, AUTOSAVE_KEY,
};
use crate::tools::{ToolConfig, ToolGateway};

use super::error::PipelineError;
use super::events::{SwarmEvent, SwarmEventKind};
use super::pipeline::{PipelineStage, StageId};
use super::restart;

/// Configuration for the coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Opportunity-Analysis restarts allowed per human-triggered run
    pub max_restarts: u32,
    /// Backend and default model for every stage
    pub model: ModelConfig,
    /// Per-stage model overrides
    pub per_stage_models: HashMap<StageId, String>,
    /// Deadline for one completion, connection and streaming included
    pub completion_timeout_secs: u64,
    /// Per-stage deadline overrides
    pub per_stage_timeouts: HashMap<StageId, u64>,
    pub tools: ToolConfig,
    /// Replacement prompt templates
    pub prompt_overrides: HashMap<StageId, String>,
    /// Write the autosave record whenever a run reaches FEEDBACK
    pub autosave: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_restarts: 2,
            model: ModelConfig::default(),
            per_stage_models: HashMap::new(),
            completion_timeout_secs: 120,
            per_stage_timeouts: HashMap::from([(StageId::Search, 30)]),
            tools: ToolConfig::default(),
            prompt_overrides: HashMap::new(),
            autosave: true,
        }
    }
}

impl CoordinatorConfig {
    /// Model for a stage: per-stage override, then the global model
    pub fn model_for(&self, stage: StageId) -> String {
        self.per_stage_models
            .get(&stage)
            .cloned()
            .unwrap_or_else(|| self.model.model.clone())
    }

    pub fn timeout_for(&self, stage: StageId) -> Duration {
        let secs = self
            .per_stage_timeouts
            .get(&stage)
            .copied()
            .unwrap_or(self.completion_timeout_secs);
        Duration::from_secs(secs)
    }

    /// Prompt template for a stage: override, then the bundled default
    pub fn template_for(&self, stage: StageId) -> &str {
        self.prompt_overrides
            .get(&stage)
            .map(String::as_str)
            .unwrap_or_else(|| template_for(stage))
    }
}

/// Why a run was started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    /// Fresh analysis of a new topic
    Start,
    /// Human feedback on a finished run
    Revision,
    /// Operator re-entry at a chosen stage
    Restart,
    /// Continuation of an interrupted run
    Resume,
}

/// A claimed run, returned by the `prepare_*` methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunPlan {
    pub kind: RunKind,
    pub entry: StageId,
}

/// History lengths of the research loop when the current Search pass began
#[derive(Debug, Clone, Copy)]
struct PassMarks {
    learnings: usize,
    opportunity: usize,
}

struct StageOutcome {
    fell_back: bool,
}

/// The pipeline engine
pub struct Coordinator {
    config: CoordinatorConfig,
    backend: Arc<dyn CompletionBackend>,
    tools: ToolGateway,
    state: RwLock<PipelineState>,
    event_tx: Option<mpsc::Sender<SwarmEvent>>,
    store: Option<Arc<dyn SnapshotStore>>,
}

impl Coordinator {
    /// Create a coordinator using the configured backend and tool service
    pub fn new(config: CoordinatorConfig) -> Result<Self, BackendError> {
        let backend = config.model.create_backend()?;
        Ok(Self::with_backend(config, backend))
    }

    /// Create a coordinator around an existing completion backend
    pub fn with_backend(config: CoordinatorConfig, backend: Arc<dyn CompletionBackend>) -> Self {
        let tools = ToolGateway::from_config(&config.tools);
        Self {
            config,
            backend,
            tools,
            state: RwLock::new(PipelineState::default()),
            event_tx: None,
            store: None,
        }
    }

    /// Set event channel for streaming events
    pub fn with_event_channel(mut self, tx: mpsc::Sender<SwarmEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Persist checkpoints and the autosave record to `store`
    pub fn with_snapshot_store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_tool_gateway(mut self, tools: ToolGateway) -> Self {
        self.tools = tools;
        self
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn store(&self) -> Option<&Arc<dyn SnapshotStore>> {
        self.store.as_ref()
    }

    /// Emit an event
    async fn emit(&self, event: SwarmEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event).await;
        }
    }

    // ------------------------------------------------------------------
    // Read side
    // ------------------------------------------------------------------

    /// Copy of the current state
    pub async fn snapshot(&self) -> PipelineState {
        self.state.read().await.clone()
    }

    pub async fn status(&self) -> PipelineStage {
        self.state.read().await.current_stage
    }

    pub async fn is_busy(&self) -> bool {
        !self.status().await.is_settled()
    }

    pub async fn share_link(&self, base: &str) -> String {
        codec::share_link(base, &*self.state.read().await)
    }

    /// Markdown export of the current state
    pub async fn report(&self) -> String {
        render_report(&*self.state.read().await)
    }

    pub async fn tools_available(&self) -> bool {
        self.tools.is_available().await
    }

    /// Select which history entry a stage displays
    pub async fn set_viewed(&self, stage: StageId, index: usize) -> usize {
        let viewed = {
            let mut state = self.state.write().await;
            state.set_viewed(stage, index);
            state.viewed_index(stage)
        };
        self.emit(
            SwarmEvent::for_stage(SwarmEventKind::ViewChanged, stage)
                .with_data(serde_json::json!({ "index": viewed })),
        )
        .await;
        viewed
    }

    // ------------------------------------------------------------------
    // Claiming a run
    // ------------------------------------------------------------------

    fn ensure_settled(state: &PipelineState) -> Result<(), PipelineError> {
        if state.current_stage.is_settled() {
            Ok(())
        } else {
            Err(PipelineError::Busy {
                status: state.current_stage,
            })
        }
    }

    /// Claim the run slot for a fresh analysis of `topic`
    pub async fn prepare_start(&self, topic: &str) -> Result<RunPlan, PipelineError> {
        let topic = topic.trim();
        let mut state = self.state.write().await;
        Self::ensure_settled(&state)?;
        if topic.is_empty() {
            return Err(PipelineError::EmptyTopic);
        }

        *state = PipelineState::new(topic);
        state.current_stage = StageId::Search.status();
        Ok(RunPlan {
            kind: RunKind::Start,
            entry: StageId::Search,
        })
    }

    /// Claim the run slot for a human revision of the finished run
    pub async fn prepare_revision(&self, feedback: &str) -> Result<RunPlan, PipelineError> {
        let feedback = feedback.trim();
        let mut state = self.state.write().await;
        Self::ensure_settled(&state)?;
        if feedback.is_empty() {
            return Err(PipelineError::EmptyFeedback);
        }
        if state.current_stage != PipelineStage::Feedback {
            return Err(PipelineError::NothingToRevise);
        }

        state.iteration_number += 1;
        state.feedback = feedback.to_string();
        state.restart_count = 0;
        state.completed_stages.clear();
        state.research_floor = state.count(StageId::Search);
        state.last_error = None;
        state.current_stage = StageId::Search.status();
        Ok(RunPlan {
            kind: RunKind::Revision,
            entry: StageId::Search,
        })
    }

    /// Claim the run slot to re-enter at `stage`.
    ///
    /// Earlier stages keep their latest entries as inputs; the restart
    /// counter is left as it is.
    pub async fn prepare_restart(&self, stage: StageId) -> Result<RunPlan, PipelineError> {
        let mut state = self.state.write().await;
        Self::ensure_settled(&state)?;
        if state.count(stage) == 0 {
            return Err(PipelineError::StageNeverRan(stage));
        }

        state.completed_stages.remove(&stage);
        for later in stage.downstream() {
            state.completed_stages.remove(later);
        }
        state.last_error = None;
        state.current_stage = stage.status();
        Ok(RunPlan {
            kind: RunKind::Restart,
            entry: stage,
        })
    }

    /// Claim the run slot to continue an interrupted run at its first
    /// unfinished stage
    pub async fn prepare_resume(&self) -> Result<RunPlan, PipelineError> {
        let mut state = self.state.write().await;
        Self::ensure_settled(&state)?;
        if state.current_stage != PipelineStage::Idle || state.topic.trim().is_empty() {
            return Err(PipelineError::NothingToResume);
        }
        let entry = StageId::ORDER
            .into_iter()
            .find(|stage| !state.completed_stages.contains(stage))
            .ok_or(PipelineError::NothingToResume)?;

        state.last_error = None;
        state.current_stage = entry.status();
        Ok(RunPlan {
            kind: RunKind::Resume,
            entry,
        })
    }

    pub async fn start(&self, topic: &str) -> Result<PipelineState, PipelineError> {
        let plan = self.prepare_start(topic).await?;
        self.execute(plan).await
    }

    pub async fn revise(&self, feedback: &str) -> Result<PipelineState, PipelineError> {
        let plan = self.prepare_revision(feedback).await?;
        self.execute(plan).await
    }

    pub async fn restart_from(&self, stage: StageId) -> Result<PipelineState, PipelineError> {
        let plan = self.prepare_restart(stage).await?;
        self.execute(plan).await
    }

    pub async fn resume(&self) -> Result<PipelineState, PipelineError> {
        let plan = self.prepare_resume().await?;
        self.execute(plan).await
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    /// Drive a claimed run from its entry stage to FEEDBACK.
    ///
    /// `plan` must come from one of the `prepare_*` methods.
    #[tracing::instrument(skip(self, plan), fields(kind = ?plan.kind, entry = %plan.entry))]
    pub async fn execute(&self, plan: RunPlan) -> Result<PipelineState, PipelineError> {
        let (topic, iteration) = {
            let state = self.state.read().await;
            (state.topic.clone(), state.iteration_number)
        };
        tracing::info!(topic = %topic, iteration, "Pipeline started");
        self.emit(
            SwarmEvent::new(SwarmEventKind::PipelineStarted).with_data(serde_json::json!({
                "kind": plan.kind,
                "entry": plan.entry,
                "topic": topic,
                "iteration": iteration,
            })),
        )
        .await;

        let mut marks = self.pass_marks().await;
        let mut next = Some(plan.entry);

        while let Some(stage) = next {
            if stage == StageId::Search {
                marks = self.pass_marks().await;
            }

            let outcome = match self.run_stage(stage).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.abort(&e).await;
                    return Err(e);
                }
            };

            next = stage.next();
            if stage == StageId::OpportunityAnalysis
                && !outcome.fell_back
                && self.apply_restart_decision(marks).await
            {
                next = Some(StageId::Search);
            }

            self.checkpoint().await;
        }

        Ok(self.finish_run().await)
    }

    async fn pass_marks(&self) -> PassMarks {
        let state = self.state.read().await;
        PassMarks {
            learnings: state.count(StageId::Learnings),
            opportunity: state.count(StageId::OpportunityAnalysis),
        }
    }

    /// Run one stage: tools, prompt, streamed completion, fallback routing
    async fn run_stage(&self, stage: StageId) -> Result<StageOutcome, PipelineError> {
        let handler = handler_for(stage);
        let iteration = {
            let mut state = self.state.write().await;
            state.current_stage = stage.status();
            state.iteration_number
        };
        tracing::info!(stage = %stage, "Stage started");
        self.emit(
            SwarmEvent::for_stage(SwarmEventKind::StageStarted, stage)
                .with_data(serde_json::json!({ "iteration": iteration })),
        )
        .await;

        let short_circuit = handler.short_circuit(&*self.state.read().await);
        if let Some(text) = short_circuit {
            tracing::debug!(stage = %stage, "Inputs missing, storing fixed output");
            let index = self.state.write().await.append(stage, text);
            self.emit_fragment(stage, index, text).await;
            self.settle(handler, index, text.to_string(), false).await;
            return Ok(StageOutcome { fell_back: false });
        }

        let tool_text = self.gather_tools(handler).await;

        let (prompt, index) = {
            let mut state = self.state.write().await;
            let ctx = PromptContext {
                state: &state,
                tool_text: &tool_text,
                max_restarts: self.config.max_restarts,
            };
            let prompt = handler.render_prompt(self.config.template_for(stage), &ctx);
            (prompt, state.reserve_slot(stage))
        };

        let request = CompletionRequest {
            stage,
            prompt,
            model: self.config.model_for(stage),
            temperature: self.config.model.temperature,
            grounded: handler.grounded(),
        };

        match self.stream_into_slot(&request, index).await {
            Ok(text) => {
                self.settle(handler, index, text, false).await;
                Ok(StageOutcome { fell_back: false })
            }
            Err(e) => self.recover(handler, index, &tool_text, e).await,
        }
    }

    async fn gather_tools(&self, handler: &dyn StageHandler) -> String {
        let stage = handler.stage();
        let query = handler.tool_query(&*self.state.read().await);
        let Some(query) = query else {
            return String::new();
        };

        let metadata = serde_json::json!({
            "purpose": query.purpose,
            "timestamp": Utc::now().to_rfc3339(),
        });
        let outcome = self.tools.run_tools(stage, &query.query, metadata).await;

        self.state.write().await.tool_results = Some(outcome.to_results());
        self.emit(
            SwarmEvent::for_stage(SwarmEventKind::ToolsCompleted, stage).with_data(
                serde_json::json!({
                    "web": outcome.web_text.is_some(),
                    "local": outcome.local_text.is_some(),
                    "unavailable": outcome.unavailable,
                    "errors": outcome.errors,
                }),
            ),
        )
        .await;

        outcome.prompt_text()
    }

    /// Stream a completion into the reserved slot, fragment by fragment
    async fn stream_into_slot(
        &self,
        request: &CompletionRequest,
        index: usize,
    ) -> Result<String, BackendError> {
        let stage = request.stage;
        let timeout = self.config.timeout_for(stage);
        let mut stream = CompletionStream::open(self.backend.as_ref(), request, timeout).await?;

        while let Some(fragment) = stream.next_fragment().await {
            let fragment = fragment?;
            tracing::trace!(stage = %stage, len = fragment.len(), "Fragment");
            self.state
                .write()
                .await
                .append_fragment(stage, index, &fragment);
            self.emit_fragment(stage, index, &fragment).await;
        }
        Ok(stream.into_text())
    }

    async fn emit_fragment(&self, stage: StageId, index: usize, text: &str) {
        self.emit(
            SwarmEvent::for_stage(SwarmEventKind::Fragment, stage)
                .with_data(serde_json::json!({ "index": index, "text": text })),
        )
        .await;
    }

    /// Replace a failed slot with fallback text, or abort for critical stages
    async fn recover(
        &self,
        handler: &dyn StageHandler,
        index: usize,
        tool_text: &str,
        error: BackendError,
    ) -> Result<StageOutcome, PipelineError> {
        let stage = handler.stage();
        let fallback = {
            let state = self.state.read().await;
            handler.fallback(&PromptContext {
                state: &state,
                tool_text,
                max_restarts: self.config.max_restarts,
            })
        };

        let Some(fallback) = fallback else {
            self.state.write().await.replace_slot(
                stage,
                index,
                format!("[Error] {} failed: {}", stage.display_name(), error),
            );
            return Err(PipelineError::StageFailed {
                stage,
                source: error,
            });
        };

        tracing::warn!(stage = %stage, error = %error, "Completion failed, using fallback text");
        self.state
            .write()
            .await
            .replace_slot(stage, index, fallback.clone());
        self.emit(
            SwarmEvent::for_stage(SwarmEventKind::StageWarning, stage).with_data(
                serde_json::json!({
                    "index": index,
                    "error": error.to_string(),
                    "text": fallback,
                }),
            ),
        )
        .await;

        self.settle(handler, index, fallback, true).await;
        Ok(StageOutcome { fell_back: true })
    }

    /// Mark a stage complete once its slot holds final text
    async fn settle(
        &self,
        handler: &dyn StageHandler,
        index: usize,
        text: String,
        fell_back: bool,
    ) {
        let stage = handler.stage();
        {
            let mut state = self.state.write().await;
            state.completed_stages.insert(stage);
            handler.finish(&mut state, &text);
        }
        tracing::info!(stage = %stage, index, fell_back, "Stage completed");
        self.emit(
            SwarmEvent::for_stage(SwarmEventKind::StageCompleted, stage).with_data(
                serde_json::json!({
                    "index": index,
                    "length": text.len(),
                    "fallback": fell_back,
                }),
            ),
        )
        .await;
    }

    /// Inspect the latest Opportunity Analysis entry. Returns whether the
    /// run loops back to Search.
    async fn apply_restart_decision(&self, marks: PassMarks) -> bool {
        let max = self.config.max_restarts;
        let (decision, count) = {
            let mut state = self.state.write().await;
            let decision = restart::decide(
                state.latest(StageId::OpportunityAnalysis),
                state.restart_count,
                max,
            );
            state.restart_count = decision.new_count;

            if decision.restart {
                state.truncate(StageId::Learnings, marks.learnings);
                state.truncate(StageId::OpportunityAnalysis, marks.opportunity);
                state.completed_stages.remove(&StageId::Search);
                state.completed_stages.remove(&StageId::Learnings);
                state.completed_stages.remove(&StageId::OpportunityAnalysis);
            } else if decision.denied {
                let index = state.count(StageId::OpportunityAnalysis) - 1;
                let noted = format!(
                    "{}{}",
                    state.latest(StageId::OpportunityAnalysis),
                    restart::denial_note(max)
                );
                state.replace_slot(StageId::OpportunityAnalysis, index, noted);
            }
            (decision, state.restart_count)
        };

        if decision.restart {
            tracing::info!(
                restart_count = count,
                max,
                "Opportunity Analysis requested another search"
            );
            self.emit(
                SwarmEvent::for_stage(SwarmEventKind::RestartRequested, StageId::OpportunityAnalysis)
                    .with_data(serde_json::json!({ "restart_count": count, "max_restarts": max })),
            )
            .await;
        } else if decision.denied {
            tracing::warn!(max, "Restart requested past the limit, continuing");
            self.emit(
                SwarmEvent::for_stage(SwarmEventKind::RestartDenied, StageId::OpportunityAnalysis)
                    .with_data(serde_json::json!({ "restart_count": count, "max_restarts": max })),
            )
            .await;
        }
        decision.restart
    }

    async fn finish_run(&self) -> PipelineState {
        let snapshot = {
            let mut state = self.state.write().await;
            state.current_stage = PipelineStage::Feedback;
            state.last_error = None;
            state.clone()
        };

        self.persist(&run_key(&snapshot.thread_id), &snapshot).await;
        if self.config.autosave {
            self.persist(AUTOSAVE_KEY, &snapshot).await;
        }

        tracing::info!(
            iteration = snapshot.iteration_number,
            restarts = snapshot.restart_count,
            "Pipeline reached feedback"
        );
        self.emit(
            SwarmEvent::new(SwarmEventKind::PipelineCompleted).with_data(serde_json::json!({
                "iteration": snapshot.iteration_number,
                "restart_count": snapshot.restart_count,
            })),
        )
        .await;
        snapshot
    }

    async fn abort(&self, error: &PipelineError) {
        let snapshot = {
            let mut state = self.state.write().await;
            state.current_stage = PipelineStage::Idle;
            state.last_error = Some(error.to_string());
            state.clone()
        };
        tracing::error!(error = %error, "Pipeline aborted");
        self.persist(&run_key(&snapshot.thread_id), &snapshot).await;
        self.emit(
            SwarmEvent::new(SwarmEventKind::PipelineFailed)
                .with_data(serde_json::json!({ "error": error.to_string() })),
        )
        .await;
    }

    /// Write the per-run record after a stage
    async fn checkpoint(&self) {
        let snapshot = self.snapshot().await;
        self.persist(&run_key(&snapshot.thread_id), &snapshot).await;
    }

    async fn persist(&self, key: &str, state: &PipelineState) {
        let Some(store) = &self.store else {
            return;
        };
        match store.set(key, &codec::encode(state)) {
            Ok(()) => {
                self.emit(
                    SwarmEvent::new(SwarmEventKind::SnapshotSaved)
                        .with_data(serde_json::json!({ "key": key })),
                )
                .await;
            }
            Err(e) => tracing::warn!("Failed to save snapshot '{}': {}", key, e),
        }
    }

    // ------------------------------------------------------------------
    // Restoring
    // ------------------------------------------------------------------

    /// Replace the owned state while no run is in flight
    pub async fn restore(&self, restored: PipelineState) -> Result<(), PipelineError> {
        restored
            .validate()
            .map_err(|e| PipelineError::Restore(codec::DecodeError::Invalid(e)))?;
        let (stage, thread_id) = (restored.current_stage, restored.thread_id.clone());
        {
            let mut state = self.state.write().await;
            Self::ensure_settled(&state)?;
            *state = restored;
        }
        tracing::info!(thread_id = %thread_id, stage = ?stage, "State restored");
        self.emit(
            SwarmEvent::new(SwarmEventKind::StateRestored)
                .with_data(serde_json::json!({ "thread_id": thread_id, "stage": stage })),
        )
        .await;
        Ok(())
    }

    /// Restore a shared link; the run opens in FEEDBACK
    pub async fn restore_from_link(&self, link: &str) -> Result<(), PipelineError> {
        let state = codec::decode_link(link)?;
        self.restore(state).await
    }

    /// Restore the record written when the last run reached FEEDBACK
    pub async fn restore_autosave(&self) -> Result<(), PipelineError> {
        self.restore_key(AUTOSAVE_KEY).await
    }

    /// Restore the latest checkpoint of a run; an interrupted run comes back
    /// IDLE and can be resumed
    pub async fn restore_run(&self, thread_id: &str) -> Result<(), PipelineError> {
        self.restore_key(&run_key(thread_id)).await
    }

    async fn restore_key(&self, key: &str) -> Result<(), PipelineError> {
        let record = match &self.store {
            Some(store) => store.get(key)?,
            None => None,
        };
        let mut state = codec::decode(&record.ok_or(PipelineError::NoAutosave)?)?;
        if !state.current_stage.is_settled() {
            state.current_stage = PipelineStage::Idle;
        }
        self.restore(state).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::FragmentStream;
    use async_trait::async_trait;
    use futures::stream::{self, StreamExt};

    /// Echoes the stage name; fails every stage listed in `failing`
    struct EchoBackend {
        failing: Vec<StageId>,
    }

    #[async_trait]
    impl CompletionBackend for EchoBackend {
        fn name(&self) -> &str {
            "echo"
        }

        async fn open(&self, request: &CompletionRequest) -> Result<FragmentStream, BackendError> {
            if self.failing.contains(&request.stage) {
                return Err(BackendError::Unreachable("connection refused".to_string()));
            }
            let text = format!("{} output", request.stage);
            Ok(stream::iter(vec![Ok(text)]).boxed())
        }
    }

    fn coordinator(failing: Vec<StageId>) -> Coordinator {
        Coordinator::with_backend(
            CoordinatorConfig::default(),
            Arc::new(EchoBackend { failing }),
        )
        .with_tool_gateway(ToolGateway::disabled())
    }

    #[test]
    fn test_config_defaults() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.max_restarts, 2);
        assert_eq!(config.timeout_for(StageId::Search), Duration::from_secs(30));
        assert_eq!(config.timeout_for(StageId::Proposer), Duration::from_secs(120));
        assert_eq!(config.model_for(StageId::Learnings), "local-model");
        assert!(config.autosave);
    }

    #[test]
    fn test_config_from_partial_json() {
        let config: CoordinatorConfig = serde_json::from_str(
            r#"{"max_restarts": 1, "per_stage_models": {"aggregator": "big-model"},
                "prompt_overrides": {"proposer": "Propose for {topic}"}}"#,
        )
        .unwrap();
        assert_eq!(config.max_restarts, 1);
        assert_eq!(config.model_for(StageId::Aggregator), "big-model");
        assert_eq!(config.template_for(StageId::Proposer), "Propose for {topic}");
        assert_eq!(config.completion_timeout_secs, 120);
    }

    #[tokio::test]
    async fn test_full_run_reaches_feedback() {
        let coordinator = coordinator(vec![]);
        let state = coordinator.start("tides").await.unwrap();

        assert_eq!(state.current_stage, PipelineStage::Feedback);
        for stage in StageId::ORDER {
            assert_eq!(state.count(stage), 1, "{}", stage);
        }
        assert_eq!(state.latest(StageId::Aggregator), "aggregator output");
    }

    #[tokio::test]
    async fn test_aggregator_failure_aborts() {
        let coordinator = coordinator(vec![StageId::Aggregator]);
        let result = coordinator.start("tides").await;

        assert!(matches!(
            result,
            Err(PipelineError::StageFailed {
                stage: StageId::Aggregator,
                ..
            })
        ));
        let state = coordinator.snapshot().await;
        assert_eq!(state.current_stage, PipelineStage::Idle);
        assert!(state.last_error.as_ref().unwrap().contains("connection refused"));
        assert!(state.latest(StageId::Aggregator).starts_with("[Error]"));
        assert_eq!(state.count(StageId::FactsExtractor), 0);
    }

    #[tokio::test]
    async fn test_claim_rejects_concurrent_start() {
        let coordinator = coordinator(vec![]);
        coordinator.prepare_start("tides").await.unwrap();

        let second = coordinator.prepare_start("waves").await;
        assert!(matches!(second, Err(PipelineError::Busy { .. })));
        assert!(coordinator.is_busy().await);
        assert_eq!(coordinator.snapshot().await.topic, "tides");
    }

    #[tokio::test]
    async fn test_input_validation() {
        let coordinator = coordinator(vec![]);
        assert!(matches!(
            coordinator.prepare_start("   ").await,
            Err(PipelineError::EmptyTopic)
        ));
        assert!(matches!(
            coordinator.prepare_revision("more on estuaries").await,
            Err(PipelineError::NothingToRevise)
        ));
        assert!(matches!(
            coordinator.prepare_restart(StageId::Proposer).await,
            Err(PipelineError::StageNeverRan(StageId::Proposer))
        ));
        assert!(matches!(
            coordinator.prepare_resume().await,
            Err(PipelineError::NothingToResume)
        ));
    }

    #[tokio::test]
    async fn test_resume_after_abort() {
        let coordinator = coordinator(vec![StageId::Aggregator]);
        coordinator.start("tides").await.unwrap_err();

        let plan = coordinator.prepare_resume().await.unwrap();
        assert_eq!(plan.entry, StageId::Aggregator);
    }

    #[tokio::test]
    async fn test_set_viewed_clamps() {
        let coordinator = coordinator(vec![]);
        coordinator.start("tides").await.unwrap();
        coordinator.revise("go deeper").await.unwrap();

        assert_eq!(coordinator.set_viewed(StageId::Proposer, 9).await, 1);
        assert_eq!(coordinator.set_viewed(StageId::Proposer, 0).await, 0);
        let state = coordinator.snapshot().await;
        assert_eq!(state.get_viewed(StageId::Proposer), "proposer output");
    }
}
