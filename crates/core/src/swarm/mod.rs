//! # Swarm Orchestration
//!
//! Coordinates the research pipeline.
//!
//! ## Pipeline Flow
//!
//! ```text
//! Search → Learnings → Opportunity Analysis ─┬→ Proposer → Novelty Checker → Aggregator
//!    ↑                                       │      → Facts Extractor → Questions Extractor → FEEDBACK
//!    └──────── restart (bounded) ────────────┘
//! ```

pub mod coordinator;
pub mod error;
pub mod events;
pub mod pipeline;
pub mod restart;

pub use coordinator::{Coordinator, CoordinatorConfig, RunKind, RunPlan};
pub use error::PipelineError;
pub use events::{SwarmEvent, SwarmEventKind};
pub use pipeline::{PipelineStage, StageId, UnknownStage};
pub use restart::{decide, RestartDecision};
