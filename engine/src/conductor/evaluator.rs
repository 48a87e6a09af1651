//! Conductor Evaluator
//!
//! Judges a finished plan and renders its outcome for the model.

use serde_json::json;

use super::types::{ExecutionReport, Step, StepStatus};

/// Longest rendering of a single step result fed back to the model
const MAX_RESULT_CHARS: usize = 4000;

pub struct Evaluator;

impl Evaluator {
    /// True iff no required step failed or was skipped and nothing interrupted
    /// the run.
    pub fn goal_achieved(steps: &[Step], interrupted: bool) -> bool {
        !interrupted
            && steps.iter().all(|s| {
                s.optional || !matches!(s.status, StepStatus::Failed | StepStatus::Skipped)
            })
    }

    /// Tool-result text describing the report, for the follow-up model call
    pub fn feedback(report: &ExecutionReport) -> String {
        let steps: Vec<_> = report
            .steps
            .iter()
            .map(|s| {
                let mut entry = json!({
                    "step_id": s.step_id,
                    "action": s.action,
                    "status": s.status,
                });
                if let Some(result) = &s.result {
                    entry["result"] = json!(truncate(&result.to_string(), MAX_RESULT_CHARS));
                }
                if let Some(error) = &s.error {
                    entry["error"] = json!(error.to_string());
                }
                entry
            })
            .collect();

        json!({
            "goal": report.goal,
            "goal_achieved": report.goal_achieved,
            "interrupted": report.interrupted,
            "steps": steps,
        })
        .to_string()
    }

    /// One line per step, for the terminal
    pub fn summary(report: &ExecutionReport) -> String {
        let done = report
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Succeeded)
            .count();
        let verdict = if report.interrupted {
            "interrupted"
        } else if report.goal_achieved {
            "goal achieved"
        } else {
            "goal not achieved"
        };
        format!("{}/{} steps succeeded, {}", done, report.steps.len(), verdict)
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}... (truncated)", cut)
}
