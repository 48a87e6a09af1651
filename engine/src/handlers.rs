//! Command handlers for CLI operations
//!
//! - chat: interactive conversation in the current project
//! - sessions: list the project's sessions
//! - replay: print a stored session with its tool calls
//! - todos: show the project's todo ledger
//! - doctor: validate configuration and check backends

use anyhow::{Context, Result};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::agent::{AgentCore, AgentSettings, Frontend, Resume, SessionContext};
use crate::conductor::{ProjectIdentity, ProjectSummary};
use crate::config::Config;
use crate::console::ConsoleFrontend;
use crate::db::{Database, SessionRecord};
use crate::llm::{LLMProvider, ModelRouter, OllamaProvider, OpenAIProvider};
use crate::tools::ToolRegistry;
use sdk::{EngineError, Interrupt};

/// Output format for command results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// Options of `wren chat`
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    pub resume: Option<Resume>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub auto_apply: bool,
}

/// Every configured backend, with `default_provider` active
pub fn build_router(config: &Config) -> Result<ModelRouter> {
    let timeout = config.agent.llm_timeout();
    let providers: Vec<Box<dyn LLMProvider>> = vec![
        Box::new(OllamaProvider::new(
            config.llm.ollama.base_url.clone(),
            config.llm.ollama.model.clone(),
            timeout,
        )),
        Box::new(OpenAIProvider::from_env(
            config.llm.openai.base_url.clone(),
            config.llm.openai.model.clone(),
            &config.llm.openai.api_key_env,
            timeout,
        )),
    ];
    Ok(ModelRouter::new(providers, &config.llm.default_provider)?)
}

async fn open_database(config: &Config) -> Result<Database> {
    let db_path = config.database_path();
    Database::new(&db_path)
        .await
        .with_context(|| format!("Failed to open database at {}", db_path.display()))
}

fn current_project() -> Result<ProjectIdentity> {
    let cwd = std::env::current_dir().context("Failed to read the current directory")?;
    ProjectIdentity::discover(&cwd)
}

/// Run the interactive loop until end of input or `exit`
pub async fn handle_chat(config: &Config, options: ChatOptions, format: OutputFormat) -> Result<()> {
    let project = current_project()?;
    let database = open_database(config).await?;
    let resume = options.resume.clone().unwrap_or(Resume::New);
    let (session, record) = SessionContext::open(&database, project.clone(), resume).await?;

    let mut router = build_router(config)?;
    select_model(&mut router, record.as_ref(), &options)?;

    let tools = ToolRegistry::builtin(&project.root, &config.tools, session.ledger())?;
    let summary = ProjectSummary::scan(&project.root).await?;
    let mut settings = AgentSettings::from(&config.agent);
    settings.auto_apply |= options.auto_apply;

    let console = Arc::new(ConsoleFrontend::new(format));
    let frontend: Arc<dyn Frontend> = Arc::clone(&console) as Arc<dyn Frontend>;
    let mut agent = AgentCore::new(
        router,
        tools,
        &database,
        frontend,
        session,
        &summary,
        settings,
    );

    info!("Chat started in {} ({})", project.root.display(), project.id);
    if format == OutputFormat::Text {
        println!(
            "wren in {} using {}:{}. /help for commands, Ctrl-D to quit.",
            project.root.display(),
            agent.router().active_provider(),
            agent.router().active_model()
        );
        if let Some(record) = &record {
            println!("Resumed session {} ({} turns)", record.id, record.turns.len());
        }
    }

    loop {
        let line = tokio::select! {
            line = console.read_line("> ") => line,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };
        if matches!(line.trim(), "exit" | "quit") {
            break;
        }

        let interrupt = Interrupt::new();
        let watcher = {
            let interrupt = interrupt.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    interrupt.trigger();
                }
            })
        };
        let result = agent.handle_input(&line, interrupt).await;
        watcher.abort();

        if let Some(report) = result? {
            info!(
                "Turn finished: {} ({} tool calls)",
                report.status,
                report.tool_calls.len()
            );
        }
    }

    database.close().await?;
    Ok(())
}

/// Explicit flags win over the resumed session's model
fn select_model(
    router: &mut ModelRouter,
    record: Option<&SessionRecord>,
    options: &ChatOptions,
) -> Result<()> {
    if options.provider.is_some() || options.model.is_some() {
        let provider = options
            .provider
            .clone()
            .unwrap_or_else(|| router.active_provider().to_string());
        router.switch(&provider, options.model.as_deref())?;
    } else if let Some(record) = record {
        if let Err(e) = router.switch(&record.active_provider, Some(&record.active_model)) {
            warn!("Keeping the default model: {}", e);
        }
    }
    Ok(())
}

/// List the project's sessions, newest first
pub async fn handle_sessions(config: &Config, format: OutputFormat) -> Result<()> {
    let project = current_project()?;
    let database = open_database(config).await?;
    let sessions = database.sessions().list_sessions(&project.id).await?;

    match format {
        OutputFormat::Text => {
            if sessions.is_empty() {
                println!("No sessions for {}", project.root.display());
                return Ok(());
            }
            println!("Sessions for {}:", project.root.display());
            println!();
            for session in &sessions {
                println!("{}", session.id);
                println!(
                    "  Model:   {}:{}",
                    session.active_provider, session.active_model
                );
                println!("  Turns:   {}", session.turn_count);
                println!(
                    "  Updated: {}",
                    session.updated_at.format("%Y-%m-%d %H:%M:%S")
                );
                println!();
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "project_id": project.id,
                "sessions": sessions,
                "count": sessions.len(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

/// Print every turn of a session with its tool calls exactly as stored
pub async fn handle_replay(session_id: &str, config: &Config, format: OutputFormat) -> Result<()> {
    let database = open_database(config).await?;
    let record = database
        .sessions()
        .load_session(session_id)
        .await?
        .ok_or_else(|| EngineError::SessionNotFound(session_id.to_string()))?;

    match format {
        OutputFormat::Text => print!("{}", render_replay(&record)),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&record)?),
    }
    Ok(())
}

/// Text form of a stored session
pub fn render_replay(record: &SessionRecord) -> String {
    let mut out = String::new();
    out.push_str(&format!("Session {}\n", record.id));
    out.push_str(&format!("Project: {}\n", record.project_id));
    out.push_str(&format!(
        "Model:   {}:{}\n",
        record.active_provider, record.active_model
    ));
    out.push_str(&format!("Turns:   {}\n", record.turns.len()));

    for turn in &record.turns {
        out.push_str(&format!(
            "\n[{}] {} ({})\n",
            turn.seq, turn.role, turn.status
        ));
        if !turn.content.is_empty() {
            out.push_str(&format!("{}\n", turn.content));
        }
        for call in &turn.tool_calls {
            let mark = if call.ok { "ok" } else { "failed" };
            out.push_str(&format!("  tool {} [{}] {}\n", call.tool, call.call_id, mark));
            out.push_str(&format!("    input:  {}\n", call.input));
            out.push_str(&format!("    output: {}\n", call.output));
        }
        if !turn.todo_delta.is_empty() {
            out.push_str(&format!(
                "  todos: created {:?}, completed {:?}\n",
                turn.todo_delta.created, turn.todo_delta.completed
            ));
        }
    }
    out
}

/// Show the project's todos
pub async fn handle_todos(all: bool, config: &Config, format: OutputFormat) -> Result<()> {
    let project = current_project()?;
    let database = open_database(config).await?;
    let ledger = database.todos().load(&project.id).await?;
    let items: Vec<_> = ledger
        .list()
        .iter()
        .filter(|item| all || item.is_pending())
        .collect();

    match format {
        OutputFormat::Text => {
            if items.is_empty() {
                println!("No todos");
                return Ok(());
            }
            for item in &items {
                println!(
                    "[{}] {:<9} {:<6} {}",
                    item.id,
                    item.status.as_str(),
                    item.priority.as_str(),
                    item.content
                );
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "project_id": project.id,
                "todos": items,
                "pending": ledger.pending().len(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

/// Run system diagnostics
///
/// Configuration is already validated by the time this runs; the checks
/// cover storage, the project and every backend.
pub async fn handle_doctor(config: &Config, format: OutputFormat) -> Result<()> {
    let mut issues = Vec::new();
    let mut checks: Vec<(String, String)> = Vec::new();

    checks.push(("Configuration".into(), "Valid".into()));

    if config.core.data_dir.exists() {
        checks.push(("Data directory".into(), "Exists".into()));
    } else {
        checks.push(("Data directory".into(), "Missing".into()));
        issues.push(format!(
            "Data directory does not exist: {}",
            config.core.data_dir.display()
        ));
    }

    match open_database(config).await {
        Ok(database) => {
            checks.push(("Database".into(), "OK".into()));
            database.close().await.ok();
        }
        Err(e) => {
            checks.push(("Database".into(), "Failed".into()));
            issues.push(format!("Cannot open database: {:#}", e));
        }
    }

    match current_project() {
        Ok(project) => checks.push(("Project".into(), project.id)),
        Err(e) => {
            checks.push(("Project".into(), "Unknown".into()));
            issues.push(format!("Cannot determine the project: {:#}", e));
        }
    }

    let router = build_router(config)?;
    let health = router.check_health().await;
    for (name, model, healthy) in &health {
        let status = if *healthy { "Available" } else { "Not available" };
        checks.push((format!("{} ({})", name, model), status.into()));
    }
    let default_ok = health
        .iter()
        .any(|(name, _, healthy)| *healthy && name == &config.llm.default_provider);
    if !default_ok {
        issues.push(format!(
            "Default provider '{}' is not reachable",
            config.llm.default_provider
        ));
    }
    if std::env::var(&config.llm.openai.api_key_env).is_err() {
        checks.push((
            "OpenAI API key".into(),
            format!("{} not set", config.llm.openai.api_key_env),
        ));
    }

    match format {
        OutputFormat::Text => {
            println!("Wren System Diagnostics");
            println!("=======================");
            println!();
            for (check, status) in &checks {
                println!("  {:<30} {}", format!("{}:", check), status);
            }
            println!();
            if issues.is_empty() {
                println!("All checks passed");
            } else {
                println!("Issues found:");
                for (i, issue) in issues.iter().enumerate() {
                    println!("  {}. {}", i + 1, issue);
                }
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "checks": checks.iter().map(|(name, status)| json!({
                    "name": name,
                    "status": status,
                })).collect::<Vec<_>>(),
                "issues": issues,
                "healthy": issues.is_empty(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

/// Load the config named on the command line, or the default one
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load_or_create()?,
    };
    Ok(config)
}
