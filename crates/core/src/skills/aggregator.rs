//! Aggregator - the final report. The only terminal-critical stage.

use std::collections::HashMap;

use super::stage::{base_values, PromptContext, StageHandler};
use crate::swarm::pipeline::StageId;

pub struct AggregatorHandler;

impl StageHandler for AggregatorHandler {
    fn stage(&self) -> StageId {
        StageId::Aggregator
    }

    fn values(&self, ctx: &PromptContext<'_>) -> HashMap<&'static str, String> {
        let state = ctx.state;
        let mut values = base_values(state);
        values.insert("researchSummary", state.research_summary());
        for (key, stage) in [
            ("learnings", StageId::Learnings),
            ("opportunityAnalysis", StageId::OpportunityAnalysis),
            ("proposal", StageId::Proposer),
            ("noveltyAssessment", StageId::NoveltyChecker),
        ] {
            values.insert(key, state.latest(stage).to_string());
        }
        values
    }

    fn fallback(&self, _ctx: &PromptContext<'_>) -> Option<String> {
        None
    }
}
