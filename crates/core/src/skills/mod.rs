//! # Inquiry Skills
//!
//! One stage handler per pipeline agent, plus the prompt templates they
//! render.
//!
//! ## Stages
//!
//! **Research loop** (may repeat, bounded by the restart controller):
//! - `SearchHandler` - topic scan with tool results and grounding
//! - `LearningsHandler` - stylized facts from the research summary
//! - `OpportunityAnalysisHandler` - gap assessment, may ask for another search
//!
//! **Synthesis:**
//! - `ProposerHandler` - research directions
//! - `NoveltyCheckerHandler` - prior-work check with tool results
//! - `AggregatorHandler` - final report (terminal-critical)
//!
//! **Extraction:**
//! - `FactsExtractorHandler`, `QuestionsExtractorHandler` - bullet lists parsed
//!   from the final report

pub mod extract;
pub mod prompts;
pub mod stage;

pub mod aggregator;
pub mod extractors;
pub mod learnings;
pub mod novelty;
pub mod opportunity;
pub mod proposer;
pub mod search;

// Re-exports for convenience
pub use extract::{parse_facts, parse_questions};
pub use prompts::{render, template_for, FALLBACK_MARKER};
pub use stage::{handler_for, PromptContext, StageHandler, ToolQuery, FALLBACK_TAG};
