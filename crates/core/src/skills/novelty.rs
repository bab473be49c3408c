//! Novelty Checker - searches for prior work resembling the latest proposal.

use std::collections::HashMap;

use super::stage::{PromptContext, StageHandler, ToolQuery, FALLBACK_TAG};
use crate::state::PipelineState;
use crate::swarm::pipeline::StageId;

pub struct NoveltyCheckerHandler;

impl StageHandler for NoveltyCheckerHandler {
    fn stage(&self) -> StageId {
        StageId::NoveltyChecker
    }

    fn tool_query(&self, state: &PipelineState) -> Option<ToolQuery> {
        let proposal = state.latest(StageId::Proposer).trim();
        let query = if proposal.is_empty() {
            state.topic.clone()
        } else {
            proposal.to_string()
        };
        Some(ToolQuery {
            query,
            purpose: "novelty_check",
        })
    }

    fn values(&self, ctx: &PromptContext<'_>) -> HashMap<&'static str, String> {
        HashMap::from([
            ("topic", ctx.state.topic.clone()),
            ("proposal", ctx.state.latest(StageId::Proposer).to_string()),
            ("tool_results", ctx.tool_text.to_string()),
        ])
    }

    fn fallback(&self, ctx: &PromptContext<'_>) -> Option<String> {
        Some(format!(
            "{FALLBACK_TAG} Novelty assessment could not be generated because the language \
             model was unavailable.\n\n\
             The proposal builds on existing work in {} and its novelty has not been verified.",
            ctx.state.topic
        ))
    }
}
