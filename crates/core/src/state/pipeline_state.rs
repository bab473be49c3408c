//! # Pipeline State
//!
//! The single mutable aggregate for one analysis. The coordinator owns it for
//! the duration of a run; observers only ever see copies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::swarm::pipeline::{PipelineStage, StageId};

/// Snapshot of the most recent tool invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResults {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_text: Option<String>,
    #[serde(default)]
    pub errors: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// A `fact — description` pair extracted from the final report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StylizedFact {
    pub fact: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineState {
    /// Run identifier used for checkpoint keys
    #[serde(default)]
    pub thread_id: String,
    pub topic: String,
    /// Human revisions so far, starting at 1
    pub iteration_number: u32,
    #[serde(default)]
    pub feedback: String,
    /// Internal Opportunity-Analysis restarts in the current human-triggered run
    #[serde(default)]
    pub restart_count: u32,
    pub stage_histories: BTreeMap<StageId, Vec<String>>,
    #[serde(default)]
    pub tool_results: Option<ToolResults>,
    pub current_stage: PipelineStage,
    pub completed_stages: BTreeSet<StageId>,
    #[serde(default)]
    pub viewed_iteration: BTreeMap<StageId, usize>,
    #[serde(default)]
    pub stylized_facts: Vec<StylizedFact>,
    #[serde(default)]
    pub stylized_questions: Vec<String>,
    /// Search entries before this index belong to earlier revisions
    #[serde(default)]
    pub research_floor: usize,
    /// Message of the failure that last aborted a run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::new("")
    }
}

impl PipelineState {
    /// Fresh state for a new analysis: empty histories, first iteration
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            thread_id: uuid::Uuid::new_v4().to_string(),
            topic: topic.into(),
            iteration_number: 1,
            feedback: String::new(),
            restart_count: 0,
            stage_histories: StageId::ORDER.iter().map(|s| (*s, Vec::new())).collect(),
            tool_results: None,
            current_stage: PipelineStage::Idle,
            completed_stages: BTreeSet::new(),
            viewed_iteration: StageId::ORDER.iter().map(|s| (*s, 0)).collect(),
            stylized_facts: Vec::new(),
            stylized_questions: Vec::new(),
            research_floor: 0,
            last_error: None,
        }
    }

    /// Whether every stage has completed in the current run segment
    pub fn all_stages_completed(&self) -> bool {
        StageId::ORDER
            .iter()
            .all(|s| self.completed_stages.contains(s))
    }

    /// Search output produced since the current revision began
    pub fn research_summary(&self) -> String {
        let entries = self.entries(StageId::Search);
        let floor = self.research_floor.min(entries.len());
        entries[floor..].join("\n\n")
    }

    /// Restore the structural guarantees a decoded record may be missing
    pub(crate) fn normalize(&mut self) {
        for stage in StageId::ORDER {
            self.stage_histories.entry(stage).or_default();
            self.viewed_iteration.entry(stage).or_insert(0);
        }
    }

    /// Check the invariants every reachable state satisfies
    pub fn validate(&self) -> Result<(), String> {
        if self.iteration_number == 0 {
            return Err("iteration_number must be at least 1".to_string());
        }

        for stage in StageId::ORDER {
            let count = self.count(stage);
            let viewed = self.viewed_iteration.get(&stage).copied().unwrap_or(0);
            if (count == 0 && viewed != 0) || (count > 0 && viewed >= count) {
                return Err(format!(
                    "viewed index {} out of range for {} ({} entries)",
                    viewed, stage, count
                ));
            }
        }

        if let Some(stage) = self
            .completed_stages
            .iter()
            .find(|stage| self.count(**stage) == 0)
        {
            return Err(format!("{} is marked completed but has no history", stage));
        }

        if self.current_stage == PipelineStage::Feedback && !self.all_stages_completed() {
            return Err("FEEDBACK requires every stage to have completed".to_string());
        }

        Ok(())
    }
}
