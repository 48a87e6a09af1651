//! Terminal frontend
//!
//! Plain-text rendering of agent events and line-based confirmation prompts
//! on stdin. With `--json` every event is printed as one JSON object per line.

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;
use tracing::debug;

use crate::agent::{AgentEvent, ConfirmRequest, Decision, Frontend};
use crate::handlers::OutputFormat;

pub struct ConsoleFrontend {
    format: OutputFormat,
    input: Mutex<Lines<BufReader<Stdin>>>,
}

impl ConsoleFrontend {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            input: Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
        }
    }

    /// Print `prompt` and read one line. `None` on end of input.
    pub async fn read_line(&self, prompt: &str) -> Option<String> {
        let mut stdout = tokio::io::stdout();
        if stdout.write_all(prompt.as_bytes()).await.is_err() {
            return None;
        }
        stdout.flush().await.ok();
        match self.input.lock().await.next_line().await {
            Ok(line) => line,
            Err(e) => {
                debug!("Failed to read stdin: {}", e);
                None
            }
        }
    }

    fn render(event: &AgentEvent) -> Option<String> {
        let text = match event {
            AgentEvent::TurnStarted { .. } => return None,
            AgentEvent::PlanProposed {
                goal,
                complexity,
                steps,
            } => {
                let mut lines = vec![format!("Plan: {} ({})", goal, complexity)];
                for step in steps {
                    let after = if step.dependencies.is_empty() {
                        String::new()
                    } else {
                        format!(" after {}", step.dependencies.join(", "))
                    };
                    lines.push(format!("  {}. {} [{}]{}", step.id, step.label, step.action, after));
                }
                lines.join("\n")
            }
            AgentEvent::StepStatus {
                step_id, status, ..
            } => format!("  step {}: {}", step_id, status),
            AgentEvent::ToolStarted { tool, .. } => format!("-> {}", tool),
            AgentEvent::ToolFinished {
                tool, ok, summary, ..
            } => {
                let mark = if *ok { "ok" } else { "failed" };
                format!("<- {} {}: {}", tool, mark, summary)
            }
            AgentEvent::TodoSnapshot { items } => {
                let pending = items.iter().filter(|i| i.is_pending()).count();
                format!("Todos: {} pending, {} total", pending, items.len())
            }
            AgentEvent::TodosCompleted { items } => items
                .iter()
                .map(|i| format!("Completed todo [{}] {}", i.id, i.content))
                .collect::<Vec<_>>()
                .join("\n"),
            AgentEvent::AssistantText { text } => format!("\n{}\n", text),
            AgentEvent::Notice { message } => message.clone(),
            AgentEvent::Warning { message } => format!("warning: {}", message),
            AgentEvent::Error { message, hint } => match hint {
                Some(hint) => format!("error: {}\n  hint: {}", message, hint),
                None => format!("error: {}", message),
            },
            AgentEvent::ModelSwitched { provider, model } => {
                format!("Now using {}:{}", provider, model)
            }
            AgentEvent::HistoryCleared => "History cleared".to_string(),
        };
        Some(text)
    }
}

#[async_trait]
impl Frontend for ConsoleFrontend {
    fn emit(&self, event: AgentEvent) {
        match self.format {
            OutputFormat::Json => match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => debug!("Failed to encode event: {}", e),
            },
            OutputFormat::Text => {
                if let Some(text) = Self::render(&event) {
                    println!("{}", text);
                }
            }
        }
    }

    async fn confirm(&self, request: ConfirmRequest) -> Decision {
        println!("\n{} ({})", request.title, request.side_effect);
        println!("{}", request.preview);
        loop {
            let Some(answer) = self.read_line("Apply? [y]es / [n]o / [e]dit: ").await else {
                return Decision::Reject;
            };
            match answer.trim().to_lowercase().as_str() {
                "y" | "yes" => return Decision::Accept,
                "n" | "no" | "" => return Decision::Reject,
                "e" | "edit" => {
                    println!(
                        "Current arguments:\n{}",
                        serde_json::to_string(&request.args).unwrap_or_default()
                    );
                    let Some(line) = self.read_line("New arguments (JSON, one line): ").await
                    else {
                        return Decision::Reject;
                    };
                    match serde_json::from_str::<Value>(&line) {
                        Ok(args) => return Decision::Edit(args),
                        Err(e) => println!("Not valid JSON: {}", e),
                    }
                }
                _ => println!("Please answer y, n or e"),
            }
        }
    }

    async fn ask(&self, question: &str) -> bool {
        matches!(
            self.read_line(&format!("{} [y/N]: ", question))
                .await
                .map(|a| a.trim().to_lowercase())
                .as_deref(),
            Some("y" | "yes")
        )
    }
}
