use std::collections::HashMap;

use super::stage::{base_values, PromptContext, StageHandler, FALLBACK_TAG};
use crate::swarm::pipeline::StageId;

/// Proposer - research directions from the learnings and gap analysis
pub struct ProposerHandler;

impl StageHandler for ProposerHandler {
    fn stage(&self) -> StageId {
        StageId::Proposer
    }

    fn values(&self, ctx: &PromptContext<'_>) -> HashMap<&'static str, String> {
        let state = ctx.state;
        let mut values = base_values(state);
        values.insert("researchSummary", state.research_summary());
        values.insert(
            "generatedAnalysis",
            state.latest(StageId::Learnings).to_string(),
        );
        values.insert(
            "opportunityAnalysis",
            state.latest(StageId::OpportunityAnalysis).to_string(),
        );
        values
    }

    fn fallback(&self, ctx: &PromptContext<'_>) -> Option<String> {
        let topic = &ctx.state.topic;
        Some(format!(
            "{FALLBACK_TAG} Research proposal for \"{topic}\" could not be generated because the \
             language model was unavailable.\n\n\
             **Proposed direction**: address the key open challenges in {topic} by pairing a \
             focused literature review with a small proof-of-concept study."
        ))
    }
}
