//! Search - the entry stage. Queries the tool service with the topic and
//! lets grounding-capable backends run their own web search too.

use std::collections::HashMap;

use super::stage::{base_values, PromptContext, StageHandler, ToolQuery, FALLBACK_TAG};
use crate::state::PipelineState;
use crate::swarm::pipeline::StageId;

pub struct SearchHandler;

impl StageHandler for SearchHandler {
    fn stage(&self) -> StageId {
        StageId::Search
    }

    fn tool_query(&self, state: &PipelineState) -> Option<ToolQuery> {
        Some(ToolQuery {
            query: state.topic.clone(),
            purpose: "research",
        })
    }

    fn grounded(&self) -> bool {
        true
    }

    fn values(&self, ctx: &PromptContext<'_>) -> HashMap<&'static str, String> {
        let mut values = base_values(ctx.state);
        values.insert("tool_results", ctx.tool_text.to_string());
        values
    }

    fn fallback(&self, ctx: &PromptContext<'_>) -> Option<String> {
        let topic = &ctx.state.topic;
        Some(format!(
            "{FALLBACK_TAG} Search summary for \"{topic}\" could not be generated because the \
             language model was unavailable.\n\n\
             Treat {topic} from general knowledge for now: outline its core definition, main \
             applications and open challenges in later stages.\n\n{}",
            ctx.tool_text
        ))
    }
}
