//! Conductor Planner
//!
//! Turns what the model returned into a [`Proposal`]. A multi-step plan
//! arrives as a single call to the `execute_plan` pseudo-tool whose arguments
//! are parsed strictly: unknown fields, graph errors and unknown tools all
//! reject the plan before anything runs.

use serde::Deserialize;
use serde_json::{Map, Value};
use sdk::{ParamSpec, ParamType, SideEffect, ToolSchema};
use tracing::debug;

use super::graph::PlanValidationError;
use super::types::{Complexity, Plan, Step};
use crate::llm::{RawProposal, ToolCall};

/// Name of the pseudo-tool the model calls to submit a plan
pub const EXECUTE_PLAN: &str = "execute_plan";

/// What the model wants to happen next
#[derive(Debug, Clone, PartialEq)]
pub enum Proposal {
    /// Run these calls in order
    DirectToolCalls { text: String, calls: Vec<ToolCall> },
    /// Run a step graph; `call` is the `execute_plan` call it came from
    Plan {
        text: String,
        call: ToolCall,
        plan: Plan,
    },
    /// Final natural-language reply
    Answer(String),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPlan {
    goal: String,
    #[serde(default)]
    complexity: Option<Complexity>,
    steps: Vec<RawStep>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawStep {
    id: String,
    action: String,
    #[serde(default)]
    args: Map<String, Value>,
    #[serde(default, alias = "depends_on")]
    dependencies: Vec<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    optional: bool,
}

/// Schema advertised to the model next to the real tools
pub fn execute_plan_schema() -> ToolSchema {
    ToolSchema::new(
        EXECUTE_PLAN,
        "Run a multi-step plan. Each step calls one tool. Steps run in dependency order; \
         a step whose dependency fails is skipped. A step argument may use the result of a \
         dependency: {\"$step\": \"<id>\"} or {\"$step\": \"<id>\", \"pointer\": \"/json/pointer\"}. \
         Step fields: id, action (tool name), args, dependencies (ids), description, optional.",
        SideEffect::ReadOnly,
    )
    .param(ParamSpec::required("goal", ParamType::String, "What the plan achieves"))
    .param(ParamSpec::required("steps", ParamType::Array, "Steps in declared order"))
    .param(ParamSpec::optional(
        "complexity",
        ParamType::String,
        "simple, moderate or complex",
    ))
}

/// Validate a raw model reply against the tools that exist
pub fn interpret(
    raw: RawProposal,
    known_tools: &[&str],
) -> Result<Proposal, PlanValidationError> {
    if raw.tool_calls.is_empty() {
        return Ok(Proposal::Answer(raw.text));
    }

    let plan_calls = raw
        .tool_calls
        .iter()
        .filter(|c| c.name == EXECUTE_PLAN)
        .count();
    if plan_calls == 0 {
        return Ok(Proposal::DirectToolCalls {
            text: raw.text,
            calls: raw.tool_calls,
        });
    }
    if raw.tool_calls.len() > 1 {
        return Err(PlanValidationError::Malformed(format!(
            "{} must be the only call in a reply",
            EXECUTE_PLAN
        )));
    }

    let mut calls = raw.tool_calls;
    let call = calls.remove(0);
    let plan = parse_plan(&call.arguments, known_tools)?;
    debug!(
        "Model proposed plan '{}' with {} steps ({})",
        plan.goal,
        plan.len(),
        plan.complexity
    );
    Ok(Proposal::Plan {
        text: raw.text,
        call,
        plan,
    })
}

/// Parse and validate `execute_plan` arguments
pub fn parse_plan(arguments: &str, known_tools: &[&str]) -> Result<Plan, PlanValidationError> {
    let raw: RawPlan = serde_json::from_str(arguments)
        .map_err(|e| PlanValidationError::Malformed(format!("invalid plan: {}", e)))?;

    let steps = raw
        .steps
        .into_iter()
        .map(|s| {
            if s.action == EXECUTE_PLAN || !known_tools.contains(&s.action.as_str()) {
                return Err(PlanValidationError::UnknownTool {
                    step: s.id,
                    tool: s.action,
                });
            }
            let mut step = Step::new(s.id, s.action, Value::Object(s.args));
            step.dependencies = s.dependencies.into_iter().collect();
            step.description = s.description;
            step.optional = s.optional;
            Ok(step)
        })
        .collect::<Result<Vec<_>, _>>()?;

    Plan::new(raw.goal, raw.complexity, steps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conductor::types::Complexity;
    use serde_json::json;

    const TOOLS: &[&str] = &["file_read", "file_edit", "shell_exec"];

    fn plan_call(args: Value) -> RawProposal {
        RawProposal::calls(
            "Here's the plan.",
            vec![ToolCall::new("call_1", EXECUTE_PLAN, args.to_string())],
        )
    }

    #[test]
    fn test_plain_text_is_answer() {
        let proposal = interpret(RawProposal::answer("All done."), TOOLS).unwrap();
        assert_eq!(proposal, Proposal::Answer("All done.".into()));
    }

    #[test]
    fn test_direct_calls_pass_through() {
        let raw = RawProposal::calls(
            "",
            vec![ToolCall::new("c1", "file_read", r#"{"path":"a"}"#)],
        );
        match interpret(raw, TOOLS).unwrap() {
            Proposal::DirectToolCalls { calls, .. } => assert_eq!(calls[0].name, "file_read"),
            other => panic!("unexpected proposal: {other:?}"),
        }
    }

    #[test]
    fn test_valid_plan() {
        let raw = plan_call(json!({
            "goal": "fix the build",
            "steps": [
                {"id": "build", "action": "shell_exec", "args": {"command": "cargo build"}},
                {"id": "read", "action": "file_read", "args": {"path": "src/lib.rs"},
                 "depends_on": ["build"], "description": "look at the error site"},
            ]
        }));
        match interpret(raw, TOOLS).unwrap() {
            Proposal::Plan { call, plan, text } => {
                assert_eq!(call.id, "call_1");
                assert_eq!(text, "Here's the plan.");
                assert_eq!(plan.complexity, Complexity::Simple);
                assert!(plan.get("read").unwrap().dependencies.contains("build"));
                assert_eq!(plan.get("read").unwrap().label(), "look at the error site");
            }
            other => panic!("unexpected proposal: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let raw = plan_call(json!({
            "goal": "x",
            "steps": [{"id": "a", "action": "file_read", "args": {}, "retries": 3}]
        }));
        assert!(matches!(
            interpret(raw, TOOLS),
            Err(PlanValidationError::Malformed(_))
        ));
    }

    #[test]
    fn test_unknown_tool_rejected() {
        let raw = plan_call(json!({
            "goal": "x",
            "steps": [{"id": "a", "action": "rm_everything"}]
        }));
        assert_eq!(
            interpret(raw, TOOLS),
            Err(PlanValidationError::UnknownTool {
                step: "a".into(),
                tool: "rm_everything".into()
            })
        );
    }

    #[test]
    fn test_cyclic_plan_rejected() {
        let raw = plan_call(json!({
            "goal": "x",
            "steps": [
                {"id": "a", "action": "file_read", "dependencies": ["b"]},
                {"id": "b", "action": "file_read", "dependencies": ["a"]},
            ]
        }));
        assert!(matches!(
            interpret(raw, TOOLS),
            Err(PlanValidationError::Cycle(_))
        ));
    }

    #[test]
    fn test_plan_must_be_alone() {
        let raw = RawProposal::calls(
            "",
            vec![
                ToolCall::new("c1", "file_read", "{}"),
                ToolCall::new("c2", EXECUTE_PLAN, "{}"),
            ],
        );
        assert!(matches!(
            interpret(raw, TOOLS),
            Err(PlanValidationError::Malformed(_))
        ));
    }

    #[test]
    fn test_schema_is_advertised_shape() {
        let schema = execute_plan_schema();
        assert_eq!(schema.name, EXECUTE_PLAN);
        assert!(schema
            .validate(&json!({"goal": "g", "steps": []}))
            .is_ok());
    }
}
