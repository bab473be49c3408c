//! # Iteration History
//!
//! Per-stage ordered outputs plus the index each stage is currently showing.
//! This is a projection over [`PipelineState::stage_histories`] and has no
//! storage of its own.
//!
//! The viewed index follows new entries only while it sits on the latest
//! entry, so a reader reviewing an older iteration is not yanked forward by a
//! run that is still appending.

use super::pipeline_state::PipelineState;
use crate::swarm::pipeline::StageId;

impl PipelineState {
    /// All entries of a stage, oldest first
    pub fn entries(&self, stage: StageId) -> &[String] {
        self.stage_histories
            .get(&stage)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn count(&self, stage: StageId) -> usize {
        self.entries(stage).len()
    }

    pub fn get(&self, stage: StageId, index: usize) -> Option<&str> {
        self.entries(stage).get(index).map(String::as_str)
    }

    /// Most recent entry, empty when the stage never ran
    pub fn latest(&self, stage: StageId) -> &str {
        self.entries(stage).last().map(String::as_str).unwrap_or("")
    }

    /// Append a finished entry and return its index
    pub fn append(&mut self, stage: StageId, text: impl Into<String>) -> usize {
        let following_tail = self.is_viewing_latest(stage);
        let entries = self.stage_histories.entry(stage).or_default();
        entries.push(text.into());
        let index = entries.len() - 1;
        if following_tail {
            self.viewed_iteration.insert(stage, index);
        }
        index
    }

    /// Reserve an empty tail slot for a stage that is about to stream
    pub fn reserve_slot(&mut self, stage: StageId) -> usize {
        self.append(stage, String::new())
    }

    /// Append a streamed fragment to a reserved slot
    pub fn append_fragment(&mut self, stage: StageId, index: usize, fragment: &str) {
        if let Some(slot) = self
            .stage_histories
            .get_mut(&stage)
            .and_then(|entries| entries.get_mut(index))
        {
            slot.push_str(fragment);
        }
    }

    /// Overwrite a reserved slot, e.g. with fallback text
    pub fn replace_slot(&mut self, stage: StageId, index: usize, text: impl Into<String>) {
        if let Some(slot) = self
            .stage_histories
            .get_mut(&stage)
            .and_then(|entries| entries.get_mut(index))
        {
            *slot = text.into();
        }
    }

    /// Drop entries beyond `len`; only restart wipes shrink a history
    pub fn truncate(&mut self, stage: StageId, len: usize) {
        let remaining = match self.stage_histories.get_mut(&stage) {
            Some(entries) => {
                entries.truncate(len);
                entries.len()
            }
            None => return,
        };
        let viewed = self.viewed_iteration.entry(stage).or_insert(0);
        *viewed = (*viewed).min(remaining.saturating_sub(1));
    }

    /// Select which entry a stage displays, clamped into range
    pub fn set_viewed(&mut self, stage: StageId, index: usize) {
        let count = self.count(stage);
        if count == 0 {
            return;
        }
        self.viewed_iteration.insert(stage, index.min(count - 1));
    }

    pub fn viewed_index(&self, stage: StageId) -> usize {
        self.viewed_iteration.get(&stage).copied().unwrap_or(0)
    }

    /// Text of the entry currently displayed, empty when the stage never ran
    pub fn get_viewed(&self, stage: StageId) -> &str {
        self.get(stage, self.viewed_index(stage)).unwrap_or("")
    }

    fn is_viewing_latest(&self, stage: StageId) -> bool {
        let count = self.count(stage);
        count == 0 || self.viewed_index(stage) + 1 >= count
    }
}
