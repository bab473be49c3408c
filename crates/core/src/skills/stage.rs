//! # Stage Handlers
//!
//! Each pipeline stage is one [`StageHandler`]: it picks its inputs out of
//! [`PipelineState`], optionally asks for tool results, and supplies the
//! values its prompt template is rendered with. Streaming, history slots
//! and failure routing live in the coordinator, so handlers stay pure.

use std::collections::HashMap;

use super::aggregator::AggregatorHandler;
use super::extractors::{FactsExtractorHandler, QuestionsExtractorHandler};
use super::learnings::LearningsHandler;
use super::novelty::NoveltyCheckerHandler;
use super::opportunity::OpportunityAnalysisHandler;
use super::prompts::render;
use super::proposer::ProposerHandler;
use super::search::SearchHandler;
use crate::state::PipelineState;
use crate::swarm::pipeline::StageId;

/// Prefix of every text stored in place of a failed completion
pub const FALLBACK_TAG: &str = "[Fallback]";

/// Inputs available while rendering a stage prompt
pub struct PromptContext<'a> {
    pub state: &'a PipelineState,
    /// Formatted tool output, empty for stages without tools
    pub tool_text: &'a str,
    pub max_restarts: u32,
}

/// What a tool-using stage searches for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolQuery {
    pub query: String,
    pub purpose: &'static str,
}

pub trait StageHandler: Send + Sync {
    fn stage(&self) -> StageId;

    /// Query for the tool gateway; `None` for stages without tools
    fn tool_query(&self, _state: &PipelineState) -> Option<ToolQuery> {
        None
    }

    /// Whether the backend may augment this stage with its own web search
    fn grounded(&self) -> bool {
        false
    }

    /// Fixed output used instead of a completion when inputs are missing
    fn short_circuit(&self, _state: &PipelineState) -> Option<&'static str> {
        None
    }

    /// Values for the prompt template
    fn values(&self, ctx: &PromptContext<'_>) -> HashMap<&'static str, String>;

    /// Text stored when the completion fails. `None` marks the stage as
    /// terminal-critical: its failure aborts the run.
    fn fallback(&self, ctx: &PromptContext<'_>) -> Option<String>;

    /// Post-process the settled output of this stage
    fn finish(&self, _state: &mut PipelineState, _text: &str) {}

    fn render_prompt(&self, template: &str, ctx: &PromptContext<'_>) -> String {
        render(template, &self.values(ctx))
    }
}

/// Handler for a stage
pub fn handler_for(stage: StageId) -> &'static dyn StageHandler {
    match stage {
        StageId::Search => &SearchHandler,
        StageId::Learnings => &LearningsHandler,
        StageId::OpportunityAnalysis => &OpportunityAnalysisHandler,
        StageId::Proposer => &ProposerHandler,
        StageId::NoveltyChecker => &NoveltyCheckerHandler,
        StageId::Aggregator => &AggregatorHandler,
        StageId::FactsExtractor => &FactsExtractorHandler,
        StageId::QuestionsExtractor => &QuestionsExtractorHandler,
    }
}

/// `topic` and `feedback`, shared by most templates
pub(crate) fn base_values(state: &PipelineState) -> HashMap<&'static str, String> {
    HashMap::from([
        ("topic", state.topic.clone()),
        ("feedback", state.feedback.clone()),
    ])
}
