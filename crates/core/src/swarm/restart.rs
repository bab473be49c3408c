//! # Restart Controller
//!
//! Decides whether an Opportunity Analysis pass sends the pipeline back to
//! Search. Detection is a case-insensitive keyword match over the model's
//! prose, so any phrase below anywhere in the text counts as a request.

use serde::{Deserialize, Serialize};

/// Phrases that count as a request for another search pass
pub const RESTART_SIGNALS: &[&str] = &[
    "research_again",
    "research again",
    "restart",
    "search again",
    "new search",
    "insufficient data",
    "need more research",
];

/// Outcome of inspecting one Opportunity Analysis output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartDecision {
    /// Loop back to Search
    pub restart: bool,
    /// Restart counter after this decision
    pub new_count: u32,
    /// A restart was requested but the limit was already reached
    pub denied: bool,
}

/// Whether the text contains any restart signal
pub fn wants_restart(text: &str) -> bool {
    let lower = text.to_lowercase();
    RESTART_SIGNALS.iter().any(|signal| lower.contains(signal))
}

/// Apply the bounded restart rule
pub fn decide(text: &str, restart_count: u32, max_restarts: u32) -> RestartDecision {
    if !wants_restart(text) {
        return RestartDecision {
            restart: false,
            new_count: restart_count,
            denied: false,
        };
    }

    if restart_count < max_restarts {
        RestartDecision {
            restart: true,
            new_count: restart_count + 1,
            denied: false,
        }
    } else {
        RestartDecision {
            restart: false,
            new_count: restart_count,
            denied: true,
        }
    }
}

/// Note appended to a stored Opportunity Analysis entry whose restart was capped
pub fn denial_note(max_restarts: u32) -> String {
    format!(
        "\n\n[Note: Restart request denied - maximum of {} search restarts reached. Proceeding with current research.]",
        max_restarts
    )
}
