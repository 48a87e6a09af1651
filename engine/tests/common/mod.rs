//! Shared fixtures for the integration tests: a scripted LLM backend, a
//! recording frontend and a helper that wires a full agent over a temp
//! workspace and database.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sdk::{Interrupt, ToolSchema};
use serde_json::Value;
use tempfile::TempDir;

use wren_engine::agent::{
    AgentCore, AgentEvent, AgentSettings, ConfirmRequest, Decision, Frontend, Resume,
    SessionContext,
};
use wren_engine::conductor::{ProjectIdentity, ProjectSummary, EXECUTE_PLAN};
use wren_engine::config::ToolsConfig;
use wren_engine::db::Database;
use wren_engine::llm::{LLMError, LLMProvider, Message, ModelRouter, RawProposal, Result, ToolCall};
use wren_engine::tools::ToolRegistry;

/// Backend that replays canned proposals and inference replies
pub struct ScriptedProvider {
    name: &'static str,
    model: String,
    proposals: Mutex<VecDeque<Result<RawProposal>>>,
    inferences: Mutex<VecDeque<String>>,
    hang: bool,
    /// Every context passed to `propose`
    pub seen: Arc<Mutex<Vec<Vec<Message>>>>,
    /// Every prompt passed to `infer`
    pub prompts: Arc<Mutex<Vec<String>>>,
}

impl ScriptedProvider {
    pub fn new(proposals: Vec<RawProposal>) -> Self {
        Self::named("ollama", proposals)
    }

    pub fn named(name: &'static str, proposals: Vec<RawProposal>) -> Self {
        Self {
            name,
            model: "scripted".to_string(),
            proposals: Mutex::new(proposals.into_iter().map(Ok).collect()),
            inferences: Mutex::new(VecDeque::new()),
            hang: false,
            seen: Arc::new(Mutex::new(Vec::new())),
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Fails every `propose` with `error`
    pub fn failing(error: LLMError) -> Self {
        let provider = Self::new(vec![]);
        provider.proposals.lock().unwrap().push_back(Err(error));
        provider
    }

    /// Never answers `propose`
    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::new(vec![])
        }
    }

    pub fn with_inferences(self, replies: Vec<&str>) -> Self {
        self.inferences
            .lock()
            .unwrap()
            .extend(replies.into_iter().map(String::from));
        self
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    fn name(&self) -> &str {
        self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn set_model(&mut self, model: &str) {
        self.model = model.to_string();
    }

    fn is_local(&self) -> bool {
        true
    }

    async fn propose(&self, messages: &[Message], _tools: &[ToolSchema]) -> Result<RawProposal> {
        self.seen.lock().unwrap().push(messages.to_vec());
        if self.hang {
            std::future::pending::<()>().await;
        }
        let next = self.proposals.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(RawProposal::answer("Done.")))
    }

    async fn infer(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let next = self.inferences.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| "[]".to_string()))
    }
}

/// Frontend that records events and answers confirmations from a script
#[derive(Default)]
pub struct RecordingFrontend {
    pub events: Mutex<Vec<AgentEvent>>,
    pub requests: Mutex<Vec<ConfirmRequest>>,
    decisions: Mutex<VecDeque<Decision>>,
    /// Triggered when a confirmation is requested
    interrupt_on_confirm: Mutex<Option<Interrupt>>,
    answer: bool,
}

impl RecordingFrontend {
    pub fn with_decisions(decisions: Vec<Decision>) -> Self {
        Self {
            decisions: Mutex::new(decisions.into()),
            ..Default::default()
        }
    }

    pub fn answering(answer: bool) -> Self {
        Self {
            answer,
            ..Default::default()
        }
    }

    pub fn interrupt_on_confirm(&self, interrupt: Interrupt) {
        *self.interrupt_on_confirm.lock().unwrap() = Some(interrupt);
    }

    pub fn events(&self) -> Vec<AgentEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn has_event(&self, predicate: impl Fn(&AgentEvent) -> bool) -> bool {
        self.events.lock().unwrap().iter().any(predicate)
    }
}

#[async_trait]
impl Frontend for RecordingFrontend {
    fn emit(&self, event: AgentEvent) {
        self.events.lock().unwrap().push(event);
    }

    async fn confirm(&self, request: ConfirmRequest) -> Decision {
        self.requests.lock().unwrap().push(request);
        if let Some(interrupt) = self.interrupt_on_confirm.lock().unwrap().as_ref() {
            interrupt.trigger();
            return Decision::Accept;
        }
        self.decisions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Decision::Reject)
    }

    async fn ask(&self, _question: &str) -> bool {
        self.answer
    }
}

/// Temp workspace plus a database kept outside it
pub struct Fixture {
    pub workspace: TempDir,
    pub data: TempDir,
    pub db: Database,
    pub project: ProjectIdentity,
}

impl Fixture {
    pub async fn new() -> Self {
        let workspace = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        let db = Database::new(&data.path().join("wren.db")).await.unwrap();
        let project = ProjectIdentity::for_root(workspace.path().canonicalize().unwrap());
        Self {
            workspace,
            data,
            db,
            project,
        }
    }

    pub fn root(&self) -> &Path {
        &self.project.root
    }

    pub fn write(&self, relative: &str, content: &str) {
        let path = self.root().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    pub fn read(&self, relative: &str) -> Option<String> {
        std::fs::read_to_string(self.root().join(relative)).ok()
    }

    /// Agent over this fixture with `providers`; the first is active
    pub async fn agent(
        &self,
        providers: Vec<ScriptedProvider>,
        frontend: Arc<RecordingFrontend>,
        resume: Resume,
        settings: AgentSettings,
    ) -> AgentCore {
        let default = providers[0].name;
        let router = ModelRouter::new(
            providers
                .into_iter()
                .map(|p| Box::new(p) as Box<dyn LLMProvider>)
                .collect(),
            default,
        )
        .unwrap();
        let (session, _) = SessionContext::open(&self.db, self.project.clone(), resume)
            .await
            .unwrap();
        let tools = ToolRegistry::builtin(self.root(), &ToolsConfig::default(), session.ledger())
            .unwrap();
        let summary = ProjectSummary::scan(self.root()).await.unwrap();
        AgentCore::new(
            router,
            tools,
            &self.db,
            frontend as Arc<dyn Frontend>,
            session,
            &summary,
            settings,
        )
    }
}

pub fn settings() -> AgentSettings {
    AgentSettings {
        auto_apply: false,
        max_tool_rounds: 6,
        context_turns: 20,
        context_token_budget: 6000,
        llm_timeout: Duration::from_secs(5),
    }
}

pub fn call(id: &str, tool: &str, args: Value) -> ToolCall {
    ToolCall::new(id, tool, args.to_string())
}

/// A reply consisting of one `execute_plan` call
pub fn plan(id: &str, plan: Value) -> RawProposal {
    RawProposal::calls("", vec![call(id, EXECUTE_PLAN, plan)])
}
