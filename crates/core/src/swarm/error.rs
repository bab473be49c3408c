//! Errors surfaced by the coordinator to its callers.

use thiserror::Error;

use super::pipeline::{PipelineStage, StageId};
use crate::llm::BackendError;
use crate::state::DecodeError;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// A start, revision or restart arrived while a run is in flight
    #[error("a run is already in progress (status: {status:?})")]
    Busy { status: PipelineStage },

    #[error("topic must not be empty")]
    EmptyTopic,

    #[error("feedback must not be empty")]
    EmptyFeedback,

    /// Revision requested before any run reached FEEDBACK
    #[error("there is no finished run to revise")]
    NothingToRevise,

    /// Resume requested but the run has no unfinished stage
    #[error("there is no interrupted run to resume")]
    NothingToResume,

    /// Restart requested from a stage with no history
    #[error("stage '{0}' has not run yet and cannot be restarted from")]
    StageNeverRan(StageId),

    /// A terminal-critical stage failed and the run was aborted
    #[error("{stage} failed: {source}")]
    StageFailed {
        stage: StageId,
        #[source]
        source: BackendError,
    },

    #[error("snapshot could not be restored: {0}")]
    Restore(#[from] DecodeError),

    #[error("no autosaved run found")]
    NoAutosave,

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl PipelineError {
    /// Whether the caller may simply retry later
    pub fn is_busy(&self) -> bool {
        matches!(self, PipelineError::Busy { .. })
    }
}
