//! Markdown export of a run.

use chrono::Utc;

use super::pipeline_state::PipelineState;
use crate::swarm::pipeline::StageId;

/// Render the exportable run report from the latest output of every stage
pub fn render_report(state: &PipelineState) -> String {
    let mut out = String::new();
    out.push_str("# Multi-Agent Run Report\n\n");
    out.push_str(&format!("- **Topic**: {}\n", state.topic));
    out.push_str(&format!("- **Iteration**: {}\n", state.iteration_number));
    out.push_str(&format!("- **Date**: {}\n", Utc::now().to_rfc3339()));
    out.push_str(&format!("- **Thread ID**: {}\n\n---\n\n", state.thread_id));

    out.push_str("## Agent Outputs\n\n");
    for stage in StageId::ORDER {
        if matches!(stage, StageId::FactsExtractor | StageId::QuestionsExtractor) {
            continue;
        }
        let latest = state.latest(stage);
        out.push_str(&format!(
            "### {}\n**Output:**\n{}\n\n---\n\n",
            stage.display_name(),
            if latest.is_empty() { "No output" } else { latest }
        ));
    }

    out.push_str("## Human-in-the-Loop Feedback\n\n```\n");
    if state.iteration_number > 1 && !state.feedback.is_empty() {
        out.push_str(&state.feedback);
    } else {
        out.push_str("No feedback provided for the first iteration.");
    }
    out.push_str("\n```\n\n---\n\n## Final Results\n\n### Stylized Facts\n");

    if state.stylized_facts.is_empty() {
        out.push_str("No stylized facts were generated.\n");
    } else {
        for fact in &state.stylized_facts {
            out.push_str(&format!("- **{}**: {}\n", fact.fact, fact.description));
        }
    }

    out.push_str("\n### Stylized Questions\n");
    if state.stylized_questions.is_empty() {
        out.push_str("No stylized questions were generated.\n");
    } else {
        for question in &state.stylized_questions {
            out.push_str(&format!("- {}\n", question));
        }
    }

    let completed: Vec<&str> = state.completed_stages.iter().map(StageId::as_str).collect();
    out.push_str("\n---\n\n## Workflow Stats\n\n");
    out.push_str(&format!(
        "- **Completed Stages**: {}\n",
        if completed.is_empty() {
            "None".to_string()
        } else {
            completed.join(", ")
        }
    ));
    out.push_str(&format!("- **Restart Count**: {}\n", state.restart_count));
    out
}
