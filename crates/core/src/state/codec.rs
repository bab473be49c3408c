//! # Snapshot Codec
//!
//! JSON encoding of [`PipelineState`] for autosave records and share links.
//! Both uses share one versioned envelope; the link form only adds
//! percent-escaping behind a `#snapshot=` fragment.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::pipeline_state::PipelineState;
use crate::swarm::pipeline::PipelineStage;

/// Envelope version written by [`encode`]
pub const SNAPSHOT_VERSION: u32 = 1;

/// URI fragment marker that carries a snapshot
pub const LINK_FRAGMENT: &str = "#snapshot=";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("snapshot is not valid JSON: {0}")]
    Malformed(String),
    #[error("snapshot is missing or has invalid fields: {0}")]
    Schema(String),
    #[error("unsupported snapshot version {0}")]
    UnsupportedVersion(u32),
    #[error("snapshot violates pipeline invariants: {0}")]
    Invalid(String),
    #[error("link does not carry a snapshot fragment")]
    MissingFragment,
}

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    v: u32,
    saved_at: DateTime<Utc>,
    state: &'a PipelineState,
}

#[derive(Deserialize)]
struct Envelope {
    v: u32,
    state: serde_json::Value,
}

/// Encode a state into its durable record
pub fn encode(state: &PipelineState) -> String {
    let envelope = EnvelopeRef {
        v: SNAPSHOT_VERSION,
        saved_at: Utc::now(),
        state,
    };
    serde_json::to_string(&envelope).unwrap_or_default()
}

/// Decode a durable record; unknown fields are ignored
pub fn decode(record: &str) -> Result<PipelineState, DecodeError> {
    let envelope: Envelope = serde_json::from_str(record).map_err(classify)?;
    if envelope.v != SNAPSHOT_VERSION {
        return Err(DecodeError::UnsupportedVersion(envelope.v));
    }

    let mut state: PipelineState =
        serde_json::from_value(envelope.state).map_err(|e| DecodeError::Schema(e.to_string()))?;
    state.normalize();
    state.validate().map_err(DecodeError::Invalid)?;
    Ok(state)
}

/// Build a shareable link: `base#snapshot=<percent-encoded record>`
pub fn share_link(base: &str, state: &PipelineState) -> String {
    let base = base.split('#').next().unwrap_or(base);
    format!(
        "{}{}{}",
        base,
        LINK_FRAGMENT,
        urlencoding::encode(&encode(state))
    )
}

/// Decode a shared link into a state ready for review in FEEDBACK
pub fn decode_link(link: &str) -> Result<PipelineState, DecodeError> {
    let (_, payload) = link
        .split_once(LINK_FRAGMENT)
        .ok_or(DecodeError::MissingFragment)?;
    let record = urlencoding::decode(payload).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    let mut state = decode(&record)?;
    if !state.all_stages_completed() {
        return Err(DecodeError::Invalid(
            "shared snapshot does not contain a finished run".to_string(),
        ));
    }
    state.current_stage = PipelineStage::Feedback;
    Ok(state)
}

fn classify(error: serde_json::Error) -> DecodeError {
    if error.is_data() {
        DecodeError::Schema(error.to_string())
    } else {
        DecodeError::Malformed(error.to_string())
    }
}
