//! Frontend seam
//!
//! The loop never prints. It emits [`AgentEvent`]s and asks for decisions
//! through a [`Frontend`], which the binary implements for the terminal and
//! tests implement with scripts.

use async_trait::async_trait;
use sdk::SideEffect;
use serde::Serialize;
use serde_json::Value;

use crate::conductor::{Complexity, StepStatus};
use crate::todo::TodoItem;

/// Planned step as announced to the user
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedStep {
    pub id: String,
    pub action: String,
    pub label: String,
    pub dependencies: Vec<String>,
}

/// Everything the user can be told about
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AgentEvent {
    TurnStarted {
        input: String,
    },
    PlanProposed {
        goal: String,
        complexity: Complexity,
        steps: Vec<PlannedStep>,
    },
    StepStatus {
        step_id: String,
        action: String,
        status: StepStatus,
    },
    ToolStarted {
        call_id: String,
        tool: String,
    },
    ToolFinished {
        call_id: String,
        tool: String,
        ok: bool,
        summary: String,
    },
    TodoSnapshot {
        items: Vec<TodoItem>,
    },
    TodosCompleted {
        items: Vec<TodoItem>,
    },
    AssistantText {
        text: String,
    },
    Notice {
        message: String,
    },
    Warning {
        message: String,
    },
    Error {
        message: String,
        hint: Option<String>,
    },
    ModelSwitched {
        provider: String,
        model: String,
    },
    HistoryCleared,
}

/// A mutating or destructive call waiting for the user
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfirmRequest {
    pub tool: String,
    pub side_effect: SideEffect,
    /// One-line description, e.g. "Edit src/auth.rs"
    pub title: String,
    /// Diff or command line
    pub preview: String,
    /// Arguments as they will be dispatched
    pub args: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Accept,
    Reject,
    /// Replace the arguments; they are re-validated and shown again
    Edit(Value),
}

#[async_trait]
pub trait Frontend: Send + Sync {
    fn emit(&self, event: AgentEvent);

    /// Decide on a previewed tool call
    async fn confirm(&self, request: ConfirmRequest) -> Decision;

    /// Yes/no question, e.g. before clearing history
    async fn ask(&self, question: &str) -> bool;
}
