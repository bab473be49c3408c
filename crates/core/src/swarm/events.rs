//! # Swarm Events
//!
//! State-delta events emitted by the coordinator to its observer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::pipeline::StageId;

/// Kind of swarm event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SwarmEventKind {
    /// A run claimed the pipeline
    PipelineStarted,
    /// A stage began; its history slot is reserved
    StageStarted,
    /// Tool calls for a stage were joined
    ToolsCompleted,
    /// One streamed fragment appended to the live slot
    Fragment,
    /// A stage resolved with model output
    StageCompleted,
    /// A stage failed and its slot holds fallback text
    StageWarning,
    /// Opportunity Analysis sent the run back to Search
    RestartRequested,
    /// A restart was requested after the limit was reached
    RestartDenied,
    /// The run reached FEEDBACK
    PipelineCompleted,
    /// The run aborted and the pipeline is IDLE again
    PipelineFailed,
    /// A checkpoint or autosave record was written
    SnapshotSaved,
    /// State was replaced from a snapshot
    StateRestored,
    /// The viewed history entry of a stage changed
    ViewChanged,
}

/// An event in the swarm
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmEvent {
    /// Unique event ID
    pub id: String,
    /// Timestamp
    pub timestamp: DateTime<Utc>,
    /// Kind of event
    pub kind: SwarmEventKind,
    /// Stage that produced this event
    #[serde(default)]
    pub stage: Option<StageId>,
    /// Associated data (JSON)
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl SwarmEvent {
    /// Create a new pipeline-level event
    pub fn new(kind: SwarmEventKind) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            kind,
            stage: None,
            data: None,
        }
    }

    /// Create a new event tagged with a stage
    pub fn for_stage(kind: SwarmEventKind, stage: StageId) -> Self {
        Self {
            stage: Some(stage),
            ..Self::new(kind)
        }
    }

    /// Add data to the event
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}
