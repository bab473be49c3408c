//! Learnings - stylized facts drawn from the research gathered so far.

use std::collections::HashMap;

use super::stage::{base_values, PromptContext, StageHandler, FALLBACK_TAG};
use crate::state::PipelineState;
use crate::swarm::pipeline::StageId;

pub const NO_RESEARCH: &str = "No search results available for analysis.";

pub struct LearningsHandler;

impl StageHandler for LearningsHandler {
    fn stage(&self) -> StageId {
        StageId::Learnings
    }

    fn short_circuit(&self, state: &PipelineState) -> Option<&'static str> {
        state
            .research_summary()
            .trim()
            .is_empty()
            .then_some(NO_RESEARCH)
    }

    fn values(&self, ctx: &PromptContext<'_>) -> HashMap<&'static str, String> {
        let mut values = base_values(ctx.state);
        values.insert("researchSummary", ctx.state.research_summary());
        values
    }

    fn fallback(&self, ctx: &PromptContext<'_>) -> Option<String> {
        Some(format!(
            "{FALLBACK_TAG} Learnings for \"{}\" could not be generated because the language \
             model was unavailable.\n\n\
             The search summary above remains the best available foundation. Recent \
             developments and emerging trends are the least covered areas.",
            ctx.state.topic
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_circuits_without_research() {
        let mut state = PipelineState::new("tides");
        assert_eq!(LearningsHandler.short_circuit(&state), Some(NO_RESEARCH));

        state.append(StageId::Search, "   ");
        assert_eq!(LearningsHandler.short_circuit(&state), Some(NO_RESEARCH));

        state.append(StageId::Search, "Tides follow the moon.");
        assert_eq!(LearningsHandler.short_circuit(&state), None);
    }

    #[test]
    fn test_summary_ignores_earlier_revisions() {
        let mut state = PipelineState::new("tides");
        state.append(StageId::Search, "old pass");
        state.research_floor = 1;
        state.append(StageId::Search, "new pass one");
        state.append(StageId::Search, "new pass two");

        let ctx = PromptContext {
            state: &state,
            tool_text: "",
            max_restarts: 2,
        };
        assert_eq!(
            LearningsHandler.values(&ctx)["researchSummary"],
            "new pass one\n\nnew pass two"
        );
    }
}
