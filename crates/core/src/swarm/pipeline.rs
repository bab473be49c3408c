//! # Pipeline Stages
//!
//! Defines the stages of the research pipeline and the status machine
//! that walks them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One named agent in the fixed stage sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    /// Literature search over the topic (uses tools)
    Search,
    /// Stylized facts distilled from the search summary
    Learnings,
    /// Gap analysis; may request another search pass
    OpportunityAnalysis,
    /// Research proposal
    Proposer,
    /// Novelty assessment of the proposal (uses tools)
    NoveltyChecker,
    /// Final report; failure here aborts the run
    Aggregator,
    /// Bullet-list facts extracted from the final report
    FactsExtractor,
    /// Bullet-list questions extracted from the final report
    QuestionsExtractor,
}

impl StageId {
    /// Execution order of a full run
    pub const ORDER: [StageId; 8] = [
        StageId::Search,
        StageId::Learnings,
        StageId::OpportunityAnalysis,
        StageId::Proposer,
        StageId::NoveltyChecker,
        StageId::Aggregator,
        StageId::FactsExtractor,
        StageId::QuestionsExtractor,
    ];

    /// Position in [`StageId::ORDER`]
    pub fn position(self) -> usize {
        Self::ORDER
            .iter()
            .position(|s| *s == self)
            .unwrap_or(Self::ORDER.len())
    }

    /// The stage that follows this one, `None` after the last extractor
    pub fn next(self) -> Option<StageId> {
        Self::ORDER.get(self.position() + 1).copied()
    }

    /// This stage and every stage after it
    pub fn downstream(self) -> &'static [StageId] {
        &Self::ORDER[self.position()..]
    }

    /// Stable identifier used in config keys, URLs and events
    pub fn as_str(&self) -> &'static str {
        match self {
            StageId::Search => "search",
            StageId::Learnings => "learnings",
            StageId::OpportunityAnalysis => "opportunity_analysis",
            StageId::Proposer => "proposer",
            StageId::NoveltyChecker => "novelty_checker",
            StageId::Aggregator => "aggregator",
            StageId::FactsExtractor => "facts_extractor",
            StageId::QuestionsExtractor => "questions_extractor",
        }
    }

    /// Display name for reports and the CLI
    pub fn display_name(&self) -> &'static str {
        match self {
            StageId::Search => "Search Agent",
            StageId::Learnings => "Learnings Agent",
            StageId::OpportunityAnalysis => "Opportunity Analysis Agent",
            StageId::Proposer => "Proposer Agent",
            StageId::NoveltyChecker => "Novelty Checker Agent",
            StageId::Aggregator => "Aggregator Agent",
            StageId::FactsExtractor => "Facts Extractor",
            StageId::QuestionsExtractor => "Questions Extractor",
        }
    }

    /// Status the pipeline reports while this stage is live
    pub fn status(self) -> PipelineStage {
        match self {
            StageId::Search => PipelineStage::Searching,
            StageId::Learnings => PipelineStage::Learning,
            StageId::OpportunityAnalysis => PipelineStage::OpportunityAnalyzing,
            StageId::Proposer => PipelineStage::Proposing,
            StageId::NoveltyChecker => PipelineStage::CheckingNovelty,
            StageId::Aggregator => PipelineStage::Aggregating,
            StageId::FactsExtractor => PipelineStage::GeneratingFacts,
            StageId::QuestionsExtractor => PipelineStage::GeneratingQuestions,
        }
    }

    /// Whether the stage consults the search-tool service before prompting
    pub fn uses_tools(self) -> bool {
        matches!(self, StageId::Search | StageId::NoveltyChecker)
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a stage name does not match any [`StageId`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown stage '{0}'")]
pub struct UnknownStage(pub String);

impl FromStr for StageId {
    type Err = UnknownStage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        StageId::ORDER
            .iter()
            .copied()
            .find(|stage| stage.as_str() == normalized)
            .ok_or_else(|| UnknownStage(s.to_string()))
    }
}

/// Status of the pipeline
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    /// Nothing running, no finished run to revise
    #[default]
    Idle,
    Searching,
    Learning,
    OpportunityAnalyzing,
    Proposing,
    CheckingNovelty,
    Aggregating,
    GeneratingFacts,
    GeneratingQuestions,
    /// Every stage finished; waiting for human feedback
    Feedback,
}

impl PipelineStage {
    /// The stage that is live in this status, if any
    pub fn stage(self) -> Option<StageId> {
        StageId::ORDER.iter().copied().find(|s| s.status() == self)
    }

    /// Advance to the next status of a straight run
    pub fn advance(self) -> PipelineStage {
        match self {
            PipelineStage::Idle => PipelineStage::Searching,
            PipelineStage::Feedback => PipelineStage::Feedback,
            live => match live.stage().and_then(StageId::next) {
                Some(next) => next.status(),
                None => PipelineStage::Feedback,
            },
        }
    }

    /// Whether a new run may start from this status
    pub fn is_settled(self) -> bool {
        matches!(self, PipelineStage::Idle | PipelineStage::Feedback)
    }
}
