//! Agent Core
//!
//! The conversation loop. For every user input:
//!
//! 1. Handle `/` directives locally; they never reach the model
//! 2. Sync the todo ledger against the user's message
//! 3. Assemble context and ask the active backend for a proposal
//! 4. Dispatch direct tool calls, or run a proposed plan through the executor
//! 5. Feed results back, up to `max_tool_rounds` rounds, until a plain answer
//! 6. Persist the user turn and the assistant turn, then return
//!
//! An interrupt or a backend failure ends the turn early; whatever happened so
//! far is still persisted, with status `interrupted` or `failed`.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use sdk::{EngineError, EngineErrorExt, Interrupt, ToolError, ToolSchema};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::directive::{self, Directive};
use super::dispatch::{render_error, ToolDispatcher};
use super::frontend::{AgentEvent, Frontend, PlannedStep};
use super::session::SessionContext;
use crate::conductor::context;
use crate::conductor::{
    execute_plan_schema, interpret, ContextAssembler, Evaluator, Executor, Plan,
    ProjectSummary, Proposal,
};
use crate::config::AgentConfig;
use crate::db::{Database, SessionRepository, TodoDelta, TodoRepository, ToolCallRecord, Turn, TurnStatus};
use crate::llm::{Message, ModelRouter, RawProposal};
use crate::todo::inference::infer_completions;
use crate::tools::ToolRegistry;

/// Loop limits and policy
#[derive(Debug, Clone)]
pub struct AgentSettings {
    /// Skip confirmation for mutating (not destructive) tools
    pub auto_apply: bool,
    pub max_tool_rounds: usize,
    pub context_turns: usize,
    pub context_token_budget: usize,
    pub llm_timeout: Duration,
}

impl From<&AgentConfig> for AgentSettings {
    fn from(config: &AgentConfig) -> Self {
        Self {
            auto_apply: config.auto_apply,
            max_tool_rounds: config.max_tool_rounds,
            context_turns: config.context_turns,
            context_token_budget: config.context_token_budget,
            llm_timeout: config.llm_timeout(),
        }
    }
}

/// What one turn did
#[derive(Debug, Clone, PartialEq)]
pub struct TurnReport {
    pub status: TurnStatus,
    /// Final reply, or the last text the model produced before the turn ended
    pub reply: String,
    pub tool_calls: Vec<ToolCallRecord>,
    pub todo_delta: TodoDelta,
}

/// Mutable state of the turn in flight
#[derive(Default)]
struct TurnState {
    reply: String,
    completed: Vec<String>,
}

pub struct AgentCore {
    router: ModelRouter,
    tools: ToolRegistry,
    sessions: SessionRepository,
    todos: TodoRepository,
    frontend: Arc<dyn Frontend>,
    session: SessionContext,
    assembler: ContextAssembler,
    system_prompt: String,
    settings: AgentSettings,
}

impl AgentCore {
    /// `tools` must have been built over `session.ledger()`
    pub fn new(
        router: ModelRouter,
        tools: ToolRegistry,
        db: &Database,
        frontend: Arc<dyn Frontend>,
        session: SessionContext,
        project: &ProjectSummary,
        settings: AgentSettings,
    ) -> Self {
        Self {
            router,
            tools,
            sessions: db.sessions(),
            todos: db.todos(),
            frontend,
            session,
            assembler: ContextAssembler::new(settings.context_token_budget, settings.context_turns),
            system_prompt: context::system_prompt(project),
            settings,
        }
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub fn router(&self) -> &ModelRouter {
        &self.router
    }

    /// Process one line of user input.
    ///
    /// Returns `None` for directives and blank input, which are not turns.
    /// Errors are storage failures only; everything else is reported through
    /// the frontend and reflected in the turn's status.
    pub async fn handle_input(
        &mut self,
        input: &str,
        interrupt: Interrupt,
    ) -> Result<Option<TurnReport>> {
        let input = input.trim();
        if input.is_empty() {
            return Ok(None);
        }
        if let Some(parsed) = directive::parse(input) {
            match parsed {
                Ok(directive) => self.handle_directive(directive).await?,
                Err(message) => self.frontend.emit(AgentEvent::Warning { message }),
            }
            return Ok(None);
        }

        self.run_turn(input, &interrupt).await.map(Some)
    }

    async fn handle_directive(&mut self, directive: Directive) -> Result<()> {
        match directive {
            Directive::ShowModel => {
                let message = self.describe_models().await;
                self.frontend.emit(AgentEvent::Notice { message });
            }
            Directive::SwitchModel(selection) => {
                let (provider, model) = self.router.resolve_selection(&selection);
                if let Err(e) = self.router.switch(&provider, model.as_deref()) {
                    self.frontend.emit(AgentEvent::Error {
                        message: e.to_string(),
                        hint: Some(e.user_hint().to_string()),
                    });
                    return Ok(());
                }
                if let Some(session_id) = self.session.session_id() {
                    self.sessions
                        .set_model(
                            session_id,
                            self.router.active_provider(),
                            self.router.active_model(),
                        )
                        .await?;
                }
                self.frontend.emit(AgentEvent::ModelSwitched {
                    provider: self.router.active_provider().to_string(),
                    model: self.router.active_model().to_string(),
                });
            }
            Directive::Clear { force } => {
                if !force && !self.frontend.ask("Clear the conversation history?").await {
                    self.frontend.emit(AgentEvent::Notice {
                        message: "History kept".to_string(),
                    });
                    return Ok(());
                }
                if let Some(session_id) = self.session.session_id() {
                    let removed = self.sessions.clear_turns(session_id).await?;
                    info!("Cleared {} turns from session {}", removed, session_id);
                }
                self.session.clear_history();
                self.frontend.emit(AgentEvent::HistoryCleared);
            }
            Directive::Help => {
                self.frontend.emit(AgentEvent::Notice {
                    message: directive::HELP.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Active backend plus what every provider can serve, `*` marking the
    /// active model
    async fn describe_models(&self) -> String {
        let active = (self.router.active_provider(), self.router.active_model());
        let mut lines = vec![format!("Active model: {}:{}", active.0, active.1)];
        for (provider, models) in self.router.list_models().await {
            match models {
                Ok(models) if models.is_empty() => {
                    lines.push(format!("{}: no models installed", provider))
                }
                Ok(models) => {
                    lines.push(format!("{}:", provider));
                    for model in models {
                        let marker = if (provider.as_str(), model.as_str()) == active {
                            '*'
                        } else {
                            ' '
                        };
                        lines.push(format!("  {} {}", marker, model));
                    }
                }
                Err(e) => {
                    debug!("Model listing for {} failed: {}", provider, e);
                    lines.push(format!("{}: unavailable ({})", provider, e));
                }
            }
        }
        lines.join("\n")
    }

    async fn run_turn(&mut self, input: &str, interrupt: &Interrupt) -> Result<TurnReport> {
        self.frontend.emit(AgentEvent::TurnStarted {
            input: input.to_string(),
        });

        let ledger = self.session.ledger();
        let known_todos: HashSet<String> = ledger
            .lock()
            .await
            .list()
            .iter()
            .map(|i| i.id.clone())
            .collect();

        // Completions land before the first proposal so the reply sees them.
        let mut state = TurnState::default();
        self.sync_todos(input, &mut state, interrupt).await;
        let snapshot = ledger.lock().await.snapshot_text();

        let mut messages =
            self.assembler
                .assemble(&self.system_prompt, self.session.history(), &snapshot, input);
        let mut schemas = self.tools.schemas();
        schemas.push(execute_plan_schema());

        let dispatcher =
            ToolDispatcher::new(&self.tools, self.frontend.as_ref(), self.settings.auto_apply);

        let status = match self
            .converse(&mut messages, &schemas, &dispatcher, &mut state, interrupt)
            .await
        {
            Ok(TurnStatus::Interrupted) => {
                self.frontend.emit(AgentEvent::Warning {
                    message: "Interrupted. The partial turn was saved".to_string(),
                });
                TurnStatus::Interrupted
            }
            Ok(status) => status,
            Err(e) => {
                warn!("Turn failed: {}", e);
                self.frontend.emit(AgentEvent::Error {
                    message: e.to_string(),
                    hint: Some(e.user_hint().to_string()),
                });
                TurnStatus::Failed
            }
        };
        let tool_calls = dispatcher.into_records();

        let (ledger_snapshot, created) = {
            let ledger = ledger.lock().await;
            let created: Vec<String> = ledger
                .list()
                .iter()
                .filter(|i| !known_todos.contains(&i.id))
                .map(|i| i.id.clone())
                .collect();
            (ledger.clone(), created)
        };
        let todo_delta = TodoDelta {
            created,
            completed: state.completed,
        };

        self.persist(input, &state.reply, status, &tool_calls, &todo_delta)
            .await?;
        self.todos.save(&ledger_snapshot).await?;
        if !todo_delta.is_empty() {
            self.frontend.emit(AgentEvent::TodoSnapshot {
                items: ledger_snapshot.list().to_vec(),
            });
        }

        Ok(TurnReport {
            status,
            reply: state.reply,
            tool_calls,
            todo_delta,
        })
    }

    /// Propose and dispatch until the model answers in plain text
    async fn converse(
        &self,
        messages: &mut Vec<Message>,
        schemas: &[ToolSchema],
        dispatcher: &ToolDispatcher<'_>,
        state: &mut TurnState,
        interrupt: &Interrupt,
    ) -> Result<TurnStatus, EngineError> {
        let known_tools = self.tools.names();

        for round in 1..=self.settings.max_tool_rounds {
            if interrupt.is_triggered() {
                return Ok(TurnStatus::Interrupted);
            }
            debug!("Proposal round {}/{}", round, self.settings.max_tool_rounds);

            let Some(raw) = self.propose(messages, schemas, interrupt).await? else {
                return Ok(TurnStatus::Interrupted);
            };

            let proposal = match interpret(raw, &known_tools) {
                Ok(proposal) => proposal,
                Err(e) => {
                    let err = EngineError::from(e);
                    self.frontend.emit(AgentEvent::Error {
                        message: err.to_string(),
                        hint: Some(err.user_hint().to_string()),
                    });
                    state.reply = err.to_string();
                    return Ok(TurnStatus::Failed);
                }
            };

            match proposal {
                Proposal::Answer(text) => {
                    state.reply = text.clone();
                    self.frontend.emit(AgentEvent::AssistantText { text });
                    return Ok(TurnStatus::Complete);
                }
                Proposal::DirectToolCalls { text, calls } => {
                    self.note_text(&text, state);
                    messages.push(Message::assistant_with_calls(text, calls.clone()));
                    for call in calls {
                        let result = match call.parse_arguments() {
                            Ok(args) => {
                                dispatcher
                                    .dispatch_call(&call.id, &call.name, args, interrupt)
                                    .await
                            }
                            Err(e) => {
                                dispatcher
                                    .record_failure(&call.id, &call.name, &call.arguments, &e)
                                    .await;
                                Err(e)
                            }
                        };
                        let content = match &result {
                            Ok(output) => output.to_json(),
                            Err(e) => render_error(e),
                        };
                        messages.push(Message::tool_result(content, &call.id));
                        if matches!(result, Err(ToolError::Interrupted)) {
                            return Ok(TurnStatus::Interrupted);
                        }
                    }
                }
                Proposal::Plan { text, call, mut plan } => {
                    self.note_text(&text, state);
                    self.announce(&plan);
                    messages.push(Message::assistant_with_calls(text, vec![call.clone()]));

                    let report = match Executor::execute(&mut plan, dispatcher, interrupt).await {
                        Ok(report) => report,
                        Err(e) => {
                            let err = EngineError::from(e);
                            self.frontend.emit(AgentEvent::Error {
                                message: err.to_string(),
                                hint: Some(err.user_hint().to_string()),
                            });
                            state.reply = err.to_string();
                            return Ok(TurnStatus::Failed);
                        }
                    };
                    self.frontend.emit(AgentEvent::Notice {
                        message: Evaluator::summary(&report),
                    });
                    messages.push(Message::tool_result(Evaluator::feedback(&report), &call.id));
                    if report.interrupted {
                        return Ok(TurnStatus::Interrupted);
                    }
                }
            }
        }

        warn!(
            "No final answer after {} tool rounds",
            self.settings.max_tool_rounds
        );
        self.frontend.emit(AgentEvent::Warning {
            message: format!(
                "Stopped after {} tool rounds without a final answer",
                self.settings.max_tool_rounds
            ),
        });
        Ok(TurnStatus::Complete)
    }

    /// One backend call, bounded by the timeout and the interrupt.
    /// `None` means interrupted.
    async fn propose(
        &self,
        messages: &[Message],
        schemas: &[ToolSchema],
        interrupt: &Interrupt,
    ) -> Result<Option<RawProposal>, EngineError> {
        let provider = self.router.active();
        tokio::select! {
            result = timeout(self.settings.llm_timeout, provider.propose(messages, schemas)) => {
                match result {
                    Ok(Ok(raw)) => Ok(Some(raw)),
                    Ok(Err(e)) => Err(e.into()),
                    Err(_) => Err(EngineError::LLMTimeout(self.settings.llm_timeout.as_secs())),
                }
            }
            _ = interrupt.triggered() => {
                debug!("Interrupted while waiting for {}", provider.name());
                Ok(None)
            }
        }
    }

    /// Ask the backend which pending todos the user's message completes.
    /// Runs once per turn, before the first proposal; failures complete nothing.
    async fn sync_todos(&self, input: &str, state: &mut TurnState, interrupt: &Interrupt) {
        if interrupt.is_triggered() {
            return;
        }

        let ledger = self.session.ledger();
        let items = ledger.lock().await.list().to_vec();
        let inference = timeout(
            self.settings.llm_timeout,
            infer_completions(self.router.active(), input, &items),
        );
        let ids = tokio::select! {
            result = inference => match result {
                Ok(ids) => ids,
                Err(_) => {
                    debug!("Todo inference timed out");
                    return;
                }
            },
            _ = interrupt.triggered() => return,
        };
        if ids.is_empty() {
            return;
        }

        let mut ledger = ledger.lock().await;
        let applied = ledger.apply_completions(&ids);
        if applied.is_empty() {
            return;
        }
        let items = applied
            .iter()
            .filter_map(|id| ledger.get(id).cloned())
            .collect();
        self.frontend.emit(AgentEvent::TodosCompleted { items });
        state.completed.extend(applied);
    }

    fn note_text(&self, text: &str, state: &mut TurnState) {
        if text.trim().is_empty() {
            return;
        }
        state.reply = text.to_string();
        self.frontend.emit(AgentEvent::AssistantText {
            text: text.to_string(),
        });
    }

    fn announce(&self, plan: &Plan) {
        self.frontend.emit(AgentEvent::PlanProposed {
            goal: plan.goal.clone(),
            complexity: plan.complexity,
            steps: plan
                .steps()
                .iter()
                .map(|s| PlannedStep {
                    id: s.id.clone(),
                    action: s.action.clone(),
                    label: s.label().to_string(),
                    dependencies: s.dependencies.iter().cloned().collect(),
                })
                .collect(),
        });
    }

    async fn persist(
        &mut self,
        input: &str,
        reply: &str,
        status: TurnStatus,
        tool_calls: &[ToolCallRecord],
        todo_delta: &TodoDelta,
    ) -> Result<()> {
        let session_id = match self.session.session_id() {
            Some(id) => id.to_string(),
            None => {
                let info = self
                    .sessions
                    .create_session(
                        &self.session.project.id,
                        self.router.active_provider(),
                        self.router.active_model(),
                    )
                    .await?;
                info!("Started session {}", info.id);
                self.session.set_session_id(info.id.clone());
                info.id
            }
        };

        let mut turn = Turn::assistant(reply).with_status(status);
        turn.tool_calls = tool_calls.to_vec();
        turn.todo_delta = todo_delta.clone();
        self.sessions
            .append_turns(&session_id, &[Turn::user(input), turn])
            .await?;

        self.session.push_history(Message::user(input));
        if !reply.is_empty() {
            self.session.push_history(Message::assistant(reply));
        }
        Ok(())
    }
}
