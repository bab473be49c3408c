//! Default prompt templates bundled at compile time, and the renderer that
//! fills their `{key}` tokens.
//!
//! Templates can be replaced per stage through
//! `CoordinatorConfig::prompt_overrides`; the defaults here are used otherwise.

use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::swarm::pipeline::StageId;

/// Substituted for any token whose value is absent or empty
pub const FALLBACK_MARKER: &str = "--- ---";

/// Search - brief literature scan of the topic
pub const SEARCH: &str = include_str!("defaults/search.md");

/// Learnings - stylized facts from the research summary
pub const LEARNINGS: &str = include_str!("defaults/learnings.md");

/// Opportunity Analysis - gap assessment and the continue/research-again call
pub const OPPORTUNITY_ANALYSIS: &str = include_str!("defaults/opportunity_analysis.md");

/// Proposer - concrete research directions
pub const PROPOSER: &str = include_str!("defaults/proposer.md");

/// Novelty Checker - compares the proposal against existing work
pub const NOVELTY_CHECKER: &str = include_str!("defaults/novelty_checker.md");

/// Aggregator - final report
pub const AGGREGATOR: &str = include_str!("defaults/aggregator.md");

/// Facts Extractor - bullet list of facts from the final report
pub const FACTS_EXTRACTOR: &str = include_str!("defaults/facts_extractor.md");

/// Questions Extractor - bullet list of questions from the final report
pub const QUESTIONS_EXTRACTOR: &str = include_str!("defaults/questions_extractor.md");

/// Default template for a stage
pub fn template_for(stage: StageId) -> &'static str {
    match stage {
        StageId::Search => SEARCH,
        StageId::Learnings => LEARNINGS,
        StageId::OpportunityAnalysis => OPPORTUNITY_ANALYSIS,
        StageId::Proposer => PROPOSER,
        StageId::NoveltyChecker => NOVELTY_CHECKER,
        StageId::Aggregator => AGGREGATOR,
        StageId::FactsExtractor => FACTS_EXTRACTOR,
        StageId::QuestionsExtractor => QUESTIONS_EXTRACTOR,
    }
}

/// All default prompts keyed by stage
pub fn all_defaults() -> Vec<(StageId, &'static str)> {
    StageId::ORDER
        .iter()
        .map(|stage| (*stage, template_for(*stage)))
        .collect()
}

static TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([A-Za-z0-9_]+)\}").expect("Invalid regex"));

/// Fill every `{key}` token in one pass.
///
/// Substituted values are never rescanned, so a value containing `{topic}`
/// stays literal.
pub fn render(template: &str, values: &HashMap<&str, String>) -> String {
    TOKEN
        .replace_all(template, |caps: &Captures| {
            match values.get(&caps[1]).map(|v| v.as_str()) {
                Some(value) if !value.is_empty() => value.to_string(),
                _ => FALLBACK_MARKER.to_string(),
            }
        })
        .into_owned()
}
