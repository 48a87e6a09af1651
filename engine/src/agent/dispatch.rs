//! Confirmation-aware dispatch
//!
//! Every tool call of a turn, direct or planned, goes through
//! [`ToolDispatcher`]. Read-only tools run immediately. Anything else is
//! previewed and put to the frontend; an accepted file edit commits exactly
//! the transaction that was shown. Every call is recorded for the session
//! store with its exact input and output text.

use async_trait::async_trait;
use sdk::{Interrupt, SideEffect, ToolError, ToolOutput};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::frontend::{AgentEvent, ConfirmRequest, Decision, Frontend};
use crate::conductor::{Step, StepDispatcher};
use crate::db::ToolCallRecord;
use crate::tools::{ToolContext, ToolRegistry};

pub struct ToolDispatcher<'a> {
    registry: &'a ToolRegistry,
    frontend: &'a dyn Frontend,
    auto_apply: bool,
    records: Mutex<Vec<ToolCallRecord>>,
}

impl<'a> ToolDispatcher<'a> {
    pub fn new(registry: &'a ToolRegistry, frontend: &'a dyn Frontend, auto_apply: bool) -> Self {
        Self {
            registry,
            frontend,
            auto_apply,
            records: Mutex::new(Vec::new()),
        }
    }

    /// Records of every call made so far, in call order
    pub fn into_records(self) -> Vec<ToolCallRecord> {
        self.records.into_inner()
    }

    /// Record a call that never reached dispatch, e.g. unparseable arguments
    pub async fn record_failure(&self, call_id: &str, tool: &str, input: &str, error: &ToolError) {
        self.records.lock().await.push(ToolCallRecord {
            call_id: call_id.to_string(),
            tool: tool.to_string(),
            input: input.to_string(),
            output: render_error(error),
            ok: false,
        });
    }

    /// Confirm if needed, dispatch, and record the call
    pub async fn dispatch_call(
        &self,
        call_id: &str,
        tool: &str,
        args: Value,
        interrupt: &Interrupt,
    ) -> Result<ToolOutput, ToolError> {
        self.frontend.emit(AgentEvent::ToolStarted {
            call_id: call_id.to_string(),
            tool: tool.to_string(),
        });

        let (dispatched, result) = self.confirm_and_call(tool, args, interrupt).await;

        let (output, summary) = match &result {
            Ok(out) => (
                out.to_json(),
                out.summary.clone().unwrap_or_else(|| "done".to_string()),
            ),
            Err(e) => (render_error(e), e.to_string()),
        };
        self.records.lock().await.push(ToolCallRecord {
            call_id: call_id.to_string(),
            tool: tool.to_string(),
            input: dispatched.to_string(),
            output,
            ok: result.is_ok(),
        });
        self.frontend.emit(AgentEvent::ToolFinished {
            call_id: call_id.to_string(),
            tool: tool.to_string(),
            ok: result.is_ok(),
            summary,
        });
        result
    }

    /// Returns the arguments finally dispatched alongside the result
    async fn confirm_and_call(
        &self,
        tool: &str,
        mut args: Value,
        interrupt: &Interrupt,
    ) -> (Value, Result<ToolOutput, ToolError>) {
        let Some(side_effect) = self.registry.side_effect(tool) else {
            return (
                args,
                Err(ToolError::UnknownTool {
                    name: tool.to_string(),
                }),
            );
        };
        if interrupt.is_triggered() {
            return (args, Err(ToolError::Interrupted));
        }

        if !side_effect.requires_confirmation() {
            let result = self
                .registry
                .invoke_with(tool, args.clone(), ToolContext::new(interrupt.clone()))
                .await;
            return (args, result);
        }

        loop {
            let preview = match self.registry.preview(tool, args.clone()).await {
                Ok(preview) => preview,
                Err(e) => return (args, Err(e)),
            };

            let decision = if self.auto_apply && side_effect == SideEffect::Mutating {
                debug!("Auto-applying {}", tool);
                Decision::Accept
            } else {
                let request = ConfirmRequest {
                    tool: tool.to_string(),
                    side_effect,
                    title: preview
                        .as_ref()
                        .map(|p| p.title.clone())
                        .unwrap_or_else(|| tool.to_string()),
                    preview: preview
                        .as_ref()
                        .map(|p| p.body.clone())
                        .unwrap_or_else(|| pretty(&args)),
                    args: args.clone(),
                };
                tokio::select! {
                    decision = self.frontend.confirm(request) => decision,
                    _ = interrupt.triggered() => {
                        debug!("Interrupted while confirming {}; staged changes discarded", tool);
                        return (args, Err(ToolError::Interrupted));
                    }
                }
            };

            match decision {
                Decision::Accept => {
                    if interrupt.is_triggered() {
                        return (args, Err(ToolError::Interrupted));
                    }
                    let ctx = ToolContext {
                        interrupt: interrupt.clone(),
                        staged: preview.and_then(|p| p.transaction),
                    };
                    let result = self.registry.invoke_with(tool, args.clone(), ctx).await;
                    return (args, result);
                }
                Decision::Reject => {
                    info!("User rejected {}", tool);
                    return (args, Err(ToolError::rejected("declined by the user")));
                }
                Decision::Edit(edited) => {
                    debug!("User edited the arguments of {}", tool);
                    args = edited;
                }
            }
        }
    }
}

#[async_trait]
impl StepDispatcher for ToolDispatcher<'_> {
    async fn dispatch(
        &self,
        step: &Step,
        args: Value,
        interrupt: &Interrupt,
    ) -> Result<ToolOutput, ToolError> {
        self.dispatch_call(&step.id, &step.action, args, interrupt)
            .await
    }

    fn on_status(&self, step: &Step) {
        self.frontend.emit(AgentEvent::StepStatus {
            step_id: step.id.clone(),
            action: step.action.clone(),
            status: step.status,
        });
    }
}

/// Stored and fed-back form of a tool error
pub fn render_error(error: &ToolError) -> String {
    serde_json::to_string(error).unwrap_or_else(|_| format!("{{\"error\":{:?}}}", error.to_string()))
}

fn pretty(args: &Value) -> String {
    serde_json::to_string_pretty(args).unwrap_or_else(|_| args.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{Preview, ToolHandler};
    use sdk::{ParamSpec, ParamType, ToolInput, ToolSchema};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex as StdMutex};

    struct Counter {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ToolHandler for Counter {
        async fn preview(&self, input: &ToolInput) -> Result<Option<Preview>, ToolError> {
            Ok(Some(Preview {
                title: format!("Write {}", input.param_str("path")?),
                body: "+ new line".into(),
                transaction: None,
            }))
        }

        async fn call(&self, input: ToolInput, _ctx: ToolContext) -> Result<ToolOutput, ToolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ToolOutput::json(input.args()).with_summary("wrote"))
        }
    }

    #[derive(Default)]
    struct Scripted {
        decisions: StdMutex<VecDeque<Decision>>,
        requests: StdMutex<Vec<ConfirmRequest>>,
        events: StdMutex<Vec<AgentEvent>>,
    }

    #[async_trait]
    impl Frontend for Scripted {
        fn emit(&self, event: AgentEvent) {
            self.events.lock().unwrap().push(event);
        }

        async fn confirm(&self, request: ConfirmRequest) -> Decision {
            self.requests.lock().unwrap().push(request);
            self.decisions
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Decision::Reject)
        }

        async fn ask(&self, _question: &str) -> bool {
            false
        }
    }

    fn setup(side_effect: SideEffect) -> (ToolRegistry, Arc<Counter>) {
        let counter = Arc::new(Counter {
            calls: AtomicUsize::new(0),
        });
        let mut registry = ToolRegistry::empty();
        registry.register(
            "write",
            ToolSchema::new("write", "Write", side_effect)
                .param(ParamSpec::required("path", ParamType::String, "Path")),
            Arc::clone(&counter) as Arc<dyn ToolHandler>,
        );
        (registry, counter)
    }

    fn scripted(decisions: Vec<Decision>) -> Scripted {
        Scripted {
            decisions: StdMutex::new(decisions.into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_read_only_skips_confirmation() {
        let (registry, counter) = setup(SideEffect::ReadOnly);
        let frontend = scripted(vec![]);
        let dispatcher = ToolDispatcher::new(&registry, &frontend, false);
        dispatcher
            .dispatch_call("c1", "write", json!({"path": "a"}), &Interrupt::new())
            .await
            .unwrap();
        assert_eq!(counter.calls.load(Ordering::SeqCst), 1);
        assert!(frontend.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reject_never_dispatches() {
        let (registry, counter) = setup(SideEffect::Mutating);
        let frontend = scripted(vec![Decision::Reject]);
        let dispatcher = ToolDispatcher::new(&registry, &frontend, false);
        let err = dispatcher
            .dispatch_call("c1", "write", json!({"path": "a"}), &Interrupt::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Rejected { .. }));
        assert_eq!(counter.calls.load(Ordering::SeqCst), 0);

        let records = dispatcher.into_records();
        assert_eq!(records.len(), 1);
        assert!(!records[0].ok);
        assert!(records[0].output.contains("\"kind\":\"rejected\""));
    }

    #[tokio::test]
    async fn test_edit_revalidates_and_asks_again() {
        let (registry, counter) = setup(SideEffect::Mutating);
        let frontend = scripted(vec![
            Decision::Edit(json!({"path": 7})),
            Decision::Edit(json!({"path": "b"})),
            Decision::Accept,
        ]);
        let dispatcher = ToolDispatcher::new(&registry, &frontend, false);

        // the invalid edit fails validation before a second prompt
        let err = dispatcher
            .dispatch_call("c1", "write", json!({"path": "a"}), &Interrupt::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArgs { .. }));
        assert_eq!(counter.calls.load(Ordering::SeqCst), 0);

        let out = dispatcher
            .dispatch_call("c2", "write", json!({"path": "a"}), &Interrupt::new())
            .await
            .unwrap();
        assert_eq!(out.data, json!({"path": "b"}));
        assert_eq!(frontend.requests.lock().unwrap().len(), 3);
        assert_eq!(frontend.requests.lock().unwrap()[2].title, "Write b");

        let records = dispatcher.into_records();
        assert_eq!(records[1].input, r#"{"path":"b"}"#);
    }

    #[tokio::test]
    async fn test_auto_apply_covers_mutating_only() {
        let (registry, counter) = setup(SideEffect::Mutating);
        let frontend = scripted(vec![]);
        let dispatcher = ToolDispatcher::new(&registry, &frontend, true);
        dispatcher
            .dispatch_call("c1", "write", json!({"path": "a"}), &Interrupt::new())
            .await
            .unwrap();
        assert_eq!(counter.calls.load(Ordering::SeqCst), 1);
        assert!(frontend.requests.lock().unwrap().is_empty());

        let (registry, counter) = setup(SideEffect::Destructive);
        let frontend = scripted(vec![Decision::Reject]);
        let dispatcher = ToolDispatcher::new(&registry, &frontend, true);
        assert!(dispatcher
            .dispatch_call("c1", "write", json!({"path": "a"}), &Interrupt::new())
            .await
            .is_err());
        assert_eq!(frontend.requests.lock().unwrap().len(), 1);
        assert_eq!(counter.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_interrupted_before_dispatch() {
        let (registry, counter) = setup(SideEffect::ReadOnly);
        let frontend = scripted(vec![]);
        let dispatcher = ToolDispatcher::new(&registry, &frontend, false);
        let interrupt = Interrupt::new();
        interrupt.trigger();
        let err = dispatcher
            .dispatch_call("c1", "write", json!({"path": "a"}), &interrupt)
            .await
            .unwrap_err();
        assert_eq!(err, ToolError::Interrupted);
        assert_eq!(counter.calls.load(Ordering::SeqCst), 0);
    }
}
