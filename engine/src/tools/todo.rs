//! `todo_read` / `todo_create`: the model's view of the todo ledger
//!
//! Both only touch the in-memory ledger, never the workspace, so they are
//! read-only for confirmation purposes. No tool completes an item.

use std::sync::Arc;

use async_trait::async_trait;
use sdk::{ParamSpec, ParamType, SideEffect, ToolError, ToolInput, ToolOutput, ToolSchema};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::info;

use super::{ToolContext, ToolHandler, ToolRegistry};
use crate::todo::{Priority, TodoLedger};

/// Ledger shared between the agent and the todo tools
pub type SharedLedger = Arc<Mutex<TodoLedger>>;

pub struct TodoReadTool {
    ledger: SharedLedger,
}

impl TodoReadTool {
    pub fn new(ledger: SharedLedger) -> Self {
        Self { ledger }
    }

    pub fn register(self: Arc<Self>, registry: &mut ToolRegistry) {
        registry.register(
            "todo_read",
            ToolSchema::new(
                "todo_read",
                "List the project's todos with their ids, priorities and status.",
                SideEffect::ReadOnly,
            )
            .param(ParamSpec::optional(
                "include_completed",
                ParamType::Boolean,
                "Include completed items (default true)",
            )),
            self,
        );
    }
}

#[async_trait]
impl ToolHandler for TodoReadTool {
    async fn call(&self, input: ToolInput, _ctx: ToolContext) -> Result<ToolOutput, ToolError> {
        let include_completed = input.param_bool_opt("include_completed").unwrap_or(true);
        let ledger = self.ledger.lock().await;
        let items: Vec<_> = ledger
            .list()
            .iter()
            .filter(|item| include_completed || item.is_pending())
            .collect();
        let pending = ledger.pending().len();

        Ok(ToolOutput::json(json!({
            "todos": items,
            "pending": pending,
        }))
        .with_summary(format!("{} todos, {} pending", ledger.list().len(), pending)))
    }
}

pub struct TodoCreateTool {
    ledger: SharedLedger,
}

impl TodoCreateTool {
    pub fn new(ledger: SharedLedger) -> Self {
        Self { ledger }
    }

    pub fn register(self: Arc<Self>, registry: &mut ToolRegistry) {
        registry.register(
            "todo_create",
            ToolSchema::new(
                "todo_create",
                "Add a todo to the project's list. Near-duplicates of existing todos are skipped.",
                SideEffect::ReadOnly,
            )
            .param(ParamSpec::required("content", ParamType::String, "What needs doing"))
            .param(ParamSpec::optional(
                "priority",
                ParamType::String,
                "low, medium or high; inferred from the wording when omitted",
            )),
            self,
        );
    }
}

#[async_trait]
impl ToolHandler for TodoCreateTool {
    async fn call(&self, input: ToolInput, _ctx: ToolContext) -> Result<ToolOutput, ToolError> {
        let content = input.param_str("content")?;
        let priority = input
            .param_str_opt("priority")
            .map(str::parse::<Priority>)
            .transpose()?;

        let mut ledger = self.ledger.lock().await;
        if let Some(existing) = ledger.find_similar(content) {
            info!("Skipping duplicate todo, matches {}", existing.id);
            return Ok(ToolOutput::json(json!({
                "created": false,
                "duplicate_of": existing,
            }))
            .with_summary(format!("Already tracked as {}", existing.id)));
        }

        let item = ledger.create(content, priority)?;
        Ok(ToolOutput::json(json!({
            "created": true,
            "todo": item,
        }))
        .with_summary(format!("Added todo {} ({})", item.id, item.priority)))
    }
}
