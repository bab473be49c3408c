//! Terminal extraction stages. Both read only the latest final report and
//! store their parsed bullets on the state.

use std::collections::HashMap;

use super::extract::{parse_facts, parse_questions};
use super::stage::{PromptContext, StageHandler, FALLBACK_TAG};
use crate::state::PipelineState;
use crate::swarm::pipeline::StageId;

pub const NO_REPORT: &str = "No final report available for extraction.";

fn report_values(state: &PipelineState) -> HashMap<&'static str, String> {
    HashMap::from([(
        "finalReport",
        state.latest(StageId::Aggregator).to_string(),
    )])
}

fn missing_report(state: &PipelineState) -> Option<&'static str> {
    state
        .latest(StageId::Aggregator)
        .trim()
        .is_empty()
        .then_some(NO_REPORT)
}

pub struct FactsExtractorHandler;

impl StageHandler for FactsExtractorHandler {
    fn stage(&self) -> StageId {
        StageId::FactsExtractor
    }

    fn short_circuit(&self, state: &PipelineState) -> Option<&'static str> {
        missing_report(state)
    }

    fn values(&self, ctx: &PromptContext<'_>) -> HashMap<&'static str, String> {
        report_values(ctx.state)
    }

    fn fallback(&self, _ctx: &PromptContext<'_>) -> Option<String> {
        Some(format!(
            "{FALLBACK_TAG} Stylized facts could not be extracted because the language model \
             was unavailable."
        ))
    }

    fn finish(&self, state: &mut PipelineState, text: &str) {
        state.stylized_facts = parse_facts(text);
    }
}

pub struct QuestionsExtractorHandler;

impl StageHandler for QuestionsExtractorHandler {
    fn stage(&self) -> StageId {
        StageId::QuestionsExtractor
    }

    fn short_circuit(&self, state: &PipelineState) -> Option<&'static str> {
        missing_report(state)
    }

    fn values(&self, ctx: &PromptContext<'_>) -> HashMap<&'static str, String> {
        report_values(ctx.state)
    }

    fn fallback(&self, _ctx: &PromptContext<'_>) -> Option<String> {
        Some(format!(
            "{FALLBACK_TAG} Stylized questions could not be extracted because the language \
             model was unavailable."
        ))
    }

    fn finish(&self, state: &mut PipelineState, text: &str) {
        state.stylized_questions = parse_questions(text);
    }
}
