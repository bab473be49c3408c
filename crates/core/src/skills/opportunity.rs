//! Opportunity Analysis - gap assessment over the latest learnings. Its
//! output is what the restart controller inspects.

use std::collections::HashMap;

use super::stage::{base_values, PromptContext, StageHandler, FALLBACK_TAG};
use crate::state::PipelineState;
use crate::swarm::pipeline::StageId;

pub const NO_LEARNINGS: &str = "No learnings available for opportunity analysis.";

pub struct OpportunityAnalysisHandler;

impl StageHandler for OpportunityAnalysisHandler {
    fn stage(&self) -> StageId {
        StageId::OpportunityAnalysis
    }

    fn short_circuit(&self, state: &PipelineState) -> Option<&'static str> {
        state
            .latest(StageId::Learnings)
            .trim()
            .is_empty()
            .then_some(NO_LEARNINGS)
    }

    fn values(&self, ctx: &PromptContext<'_>) -> HashMap<&'static str, String> {
        let mut values = base_values(ctx.state);
        values.insert(
            "generatedAnalysis",
            ctx.state.latest(StageId::Learnings).to_string(),
        );
        values.insert("max_restarts", ctx.max_restarts.to_string());
        values
    }

    // Must not contain any restart signal
    fn fallback(&self, ctx: &PromptContext<'_>) -> Option<String> {
        Some(format!(
            "{FALLBACK_TAG} Opportunity analysis for \"{}\" could not be generated because the \
             language model was unavailable.\n\n\
             **Recommendation**: CONTINUE. Proceed to the proposal with the current learnings.",
            ctx.state.topic
        ))
    }
}
