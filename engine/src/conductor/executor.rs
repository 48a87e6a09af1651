//! Conductor Executor
//!
//! Runs a validated [`Plan`] step by step. Steps run one at a time: the first
//! ready step in declared order goes next. A failed step takes all of its
//! transitive dependents down with it (they become `skipped`) while
//! independent branches carry on.
//!
//! Dispatch goes through a [`StepDispatcher`] so the conversation loop can put
//! confirmation in front of the tool registry.

use std::collections::HashMap;

use async_trait::async_trait;
use sdk::{Interrupt, ToolError, ToolOutput};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::evaluator::Evaluator;
use super::graph::{self, PlanValidationError};
use super::types::{ExecutionReport, Plan, Step, StepOutcome, StepStatus};

/// Where plan steps are sent to run
#[async_trait]
pub trait StepDispatcher: Send + Sync {
    /// Run `step.action` with already-resolved `args`
    async fn dispatch(
        &self,
        step: &Step,
        args: Value,
        interrupt: &Interrupt,
    ) -> Result<ToolOutput, ToolError>;

    /// Called after every status transition
    fn on_status(&self, _step: &Step) {}
}

/// Executes plans through a dispatcher
pub struct Executor;

impl Executor {
    /// Run every step of `plan`, updating step statuses in place.
    ///
    /// The graph is re-validated first; an invalid plan runs nothing.
    pub async fn execute(
        plan: &mut Plan,
        dispatcher: &dyn StepDispatcher,
        interrupt: &Interrupt,
    ) -> Result<ExecutionReport, PlanValidationError> {
        graph::validate(plan.steps())?;
        info!("Executing plan '{}' ({} steps)", plan.goal, plan.len());

        let mut results: HashMap<String, Value> = HashMap::new();
        let mut interrupted = false;

        loop {
            if interrupt.is_triggered() {
                interrupted = true;
                break;
            }

            promote_ready(plan, dispatcher);
            let Some(position) = plan
                .steps()
                .iter()
                .position(|s| s.status == StepStatus::Ready)
            else {
                break;
            };

            set_status(plan, position, StepStatus::Running, dispatcher);
            let step = plan.steps()[position].clone();
            debug!("Running step {} ({})", step.id, step.action);

            let outcome = match graph::resolve(&Value::Object(step.args.clone()), &results) {
                Ok(args) => dispatcher.dispatch(&step, args, interrupt).await,
                Err(e) => Err(e),
            };

            match outcome {
                Ok(output) => {
                    results.insert(step.id.clone(), output.data.clone());
                    plan.step_mut(position).result = Some(output.data);
                    set_status(plan, position, StepStatus::Succeeded, dispatcher);
                }
                Err(ToolError::Interrupted) => {
                    plan.step_mut(position).error = Some(ToolError::Interrupted);
                    set_status(plan, position, StepStatus::Skipped, dispatcher);
                    interrupted = true;
                    break;
                }
                Err(e) => {
                    warn!("Step {} failed: {}", step.id, e);
                    plan.step_mut(position).error = Some(e);
                    set_status(plan, position, StepStatus::Failed, dispatcher);
                    for dependent in graph::transitive_dependents(plan.steps(), &step.id) {
                        if let Some(dep_position) = plan.position(&dependent) {
                            if !plan.steps()[dep_position].status.is_terminal() {
                                set_status(plan, dep_position, StepStatus::Skipped, dispatcher);
                            }
                        }
                    }
                }
            }
        }

        // Whatever hasn't finished by now never will.
        for position in 0..plan.len() {
            if !plan.steps()[position].status.is_terminal() {
                set_status(plan, position, StepStatus::Skipped, dispatcher);
            }
        }

        let goal_achieved = Evaluator::goal_achieved(plan.steps(), interrupted);
        info!(
            "Plan '{}' finished: goal_achieved={}, interrupted={}",
            plan.goal, goal_achieved, interrupted
        );

        Ok(ExecutionReport {
            goal: plan.goal.clone(),
            steps: plan
                .steps()
                .iter()
                .map(|s| StepOutcome {
                    step_id: s.id.clone(),
                    action: s.action.clone(),
                    status: s.status,
                    result: s.result.clone(),
                    error: s.error.clone(),
                })
                .collect(),
            goal_achieved,
            interrupted,
        })
    }
}

/// Pending steps whose dependencies all succeeded become ready
fn promote_ready(plan: &mut Plan, dispatcher: &dyn StepDispatcher) {
    for position in 0..plan.len() {
        let step = &plan.steps()[position];
        let ready = step.status == StepStatus::Pending
            && step
                .dependencies
                .iter()
                .all(|d| plan.status(d) == Some(StepStatus::Succeeded));
        if ready {
            set_status(plan, position, StepStatus::Ready, dispatcher);
        }
    }
}

fn set_status(
    plan: &mut Plan,
    position: usize,
    status: StepStatus,
    dispatcher: &dyn StepDispatcher,
) {
    let step = plan.step_mut(position);
    step.status = status;
    dispatcher.on_status(step);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    /// Records dispatch order; fails the steps listed in `fail`
    #[derive(Default)]
    struct Recorder {
        fail: Vec<&'static str>,
        dispatched: Mutex<Vec<String>>,
        transitions: Mutex<Vec<(String, StepStatus)>>,
    }

    #[async_trait]
    impl StepDispatcher for Recorder {
        async fn dispatch(
            &self,
            step: &Step,
            args: Value,
            _interrupt: &Interrupt,
        ) -> Result<ToolOutput, ToolError> {
            self.dispatched.lock().unwrap().push(step.id.clone());
            if self.fail.contains(&step.id.as_str()) {
                return Err(ToolError::execution_failed("boom"));
            }
            Ok(ToolOutput::json(json!({"step": step.id, "args": args})))
        }

        fn on_status(&self, step: &Step) {
            self.transitions
                .lock()
                .unwrap()
                .push((step.id.clone(), step.status));
        }
    }

    fn fan_out() -> Plan {
        Plan::new(
            "fan out",
            None,
            vec![
                Step::new("a", "list_dir", json!({})),
                Step::new("b", "file_read", json!({"path": "b"})).depends_on("a"),
                Step::new("c", "file_read", json!({"path": "c"})).depends_on("a"),
            ],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_dependents_run_after_root() {
        let mut plan = fan_out();
        let recorder = Recorder::default();
        let report = Executor::execute(&mut plan, &recorder, &Interrupt::new())
            .await
            .unwrap();

        assert_eq!(*recorder.dispatched.lock().unwrap(), vec!["a", "b", "c"]);
        assert!(report.goal_achieved);
        assert_eq!(report.results().len(), 3);

        let a_done = recorder
            .transitions
            .lock()
            .unwrap()
            .iter()
            .position(|t| t == &("a".to_string(), StepStatus::Succeeded))
            .unwrap();
        let b_running = recorder
            .transitions
            .lock()
            .unwrap()
            .iter()
            .position(|t| t == &("b".to_string(), StepStatus::Running))
            .unwrap();
        assert!(a_done < b_running);
    }

    #[tokio::test]
    async fn test_failed_root_skips_dependents() {
        let mut plan = fan_out();
        let recorder = Recorder {
            fail: vec!["a"],
            ..Default::default()
        };
        let report = Executor::execute(&mut plan, &recorder, &Interrupt::new())
            .await
            .unwrap();

        assert_eq!(*recorder.dispatched.lock().unwrap(), vec!["a"]);
        assert_eq!(report.status("a"), Some(StepStatus::Failed));
        assert_eq!(report.status("b"), Some(StepStatus::Skipped));
        assert_eq!(report.status("c"), Some(StepStatus::Skipped));
        assert!(!report.goal_achieved);
        assert_eq!(report.errors().len(), 1);
    }

    #[tokio::test]
    async fn test_independent_branch_continues() {
        let mut plan = Plan::new(
            "two branches",
            None,
            vec![
                Step::new("a", "list_dir", json!({})),
                Step::new("b", "list_dir", json!({})).depends_on("a"),
                Step::new("x", "list_dir", json!({})),
            ],
        )
        .unwrap();
        let recorder = Recorder {
            fail: vec!["a"],
            ..Default::default()
        };
        let report = Executor::execute(&mut plan, &recorder, &Interrupt::new())
            .await
            .unwrap();
        assert_eq!(report.status("b"), Some(StepStatus::Skipped));
        assert_eq!(report.status("x"), Some(StepStatus::Succeeded));
    }

    #[tokio::test]
    async fn test_optional_failure_keeps_goal() {
        let mut plan = Plan::new(
            "optional lint",
            None,
            vec![
                Step::new("build", "shell_exec", json!({"command": "make"})),
                Step::new("lint", "shell_exec", json!({"command": "lint"})).optional(),
            ],
        )
        .unwrap();
        let recorder = Recorder {
            fail: vec!["lint"],
            ..Default::default()
        };
        let report = Executor::execute(&mut plan, &recorder, &Interrupt::new())
            .await
            .unwrap();
        assert!(report.goal_achieved);
    }

    #[tokio::test]
    async fn test_references_resolve_from_results() {
        let mut plan = Plan::new(
            "chain",
            None,
            vec![
                Step::new("a", "list_dir", json!({})),
                Step::new(
                    "b",
                    "file_read",
                    json!({"path": {"$step": "a", "pointer": "/step"}}),
                )
                .depends_on("a"),
                Step::new(
                    "c",
                    "file_read",
                    json!({"path": {"$step": "a", "pointer": "/missing"}}),
                )
                .depends_on("a"),
            ],
        )
        .unwrap();
        let recorder = Recorder::default();
        let report = Executor::execute(&mut plan, &recorder, &Interrupt::new())
            .await
            .unwrap();

        assert_eq!(plan.get("b").unwrap().result.as_ref().unwrap()["args"]["path"], "a");
        assert_eq!(report.status("c"), Some(StepStatus::Failed));
        assert!(matches!(
            plan.get("c").unwrap().error,
            Some(ToolError::InvalidArgs { .. })
        ));
        // c never reached the dispatcher
        assert_eq!(*recorder.dispatched.lock().unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_pre_triggered_interrupt_runs_nothing() {
        let mut plan = fan_out();
        let recorder = Recorder::default();
        let interrupt = Interrupt::new();
        interrupt.trigger();
        let report = Executor::execute(&mut plan, &recorder, &interrupt)
            .await
            .unwrap();
        assert!(report.interrupted);
        assert!(!report.goal_achieved);
        assert!(recorder.dispatched.lock().unwrap().is_empty());
        assert!(report.steps.iter().all(|s| s.status == StepStatus::Skipped));
    }
}
