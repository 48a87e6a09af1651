pub mod filesystem;
pub mod search;
pub mod terminal;
pub mod todo;

pub use filesystem::FilesystemTool;
pub use search::FileSearchTool;
pub use terminal::ShellTool;
pub use todo::{TodoCreateTool, TodoReadTool};

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use sdk::{EngineError, Interrupt, SideEffect, ToolError, ToolInput, ToolOutput, ToolSchema};
use serde_json::Value;
use tracing::{debug, warn};

use crate::command_executor::BashRunner;
use crate::config::ToolsConfig;
use crate::fs_guard::FileSystemGuard;
use crate::transaction::{EditManager, EditTransaction, LocalFileStore};
use todo::SharedLedger;

/// What the user is shown before a mutating or destructive tool runs
#[derive(Debug, Clone)]
pub struct Preview {
    pub title: String,
    /// Diff or command line
    pub body: String,
    /// For file tools: the staged transaction that will be committed on accept
    pub transaction: Option<EditTransaction>,
}

/// Per-call context handed to a handler
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    pub interrupt: Interrupt,
    /// Transaction staged (and shown) during preview
    pub staged: Option<EditTransaction>,
}

impl ToolContext {
    pub fn new(interrupt: Interrupt) -> Self {
        Self {
            interrupt,
            staged: None,
        }
    }
}

/// A tool implementation. Opaque to the registry.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Render what the call would do without doing it.
    async fn preview(&self, _input: &ToolInput) -> Result<Option<Preview>, ToolError> {
        Ok(None)
    }

    async fn call(&self, input: ToolInput, ctx: ToolContext) -> Result<ToolOutput, ToolError>;
}

struct RegisteredTool {
    schema: ToolSchema,
    handler: Arc<dyn ToolHandler>,
}

/// Registry of available tools that can be dispatched by the agent.
///
/// Arguments are validated against the tool's schema before any handler runs;
/// registration order is the order tools are advertised in.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    /// Create an empty registry with no tools enabled.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Every built-in tool, sandboxed to `workspace`
    pub fn builtin(
        workspace: &Path,
        limits: &ToolsConfig,
        ledger: SharedLedger,
    ) -> Result<Self, EngineError> {
        let guard = FileSystemGuard::new(workspace.to_path_buf())?;
        let edits = Arc::new(
            EditManager::new(Arc::new(LocalFileStore::new())).with_root(guard.workspace()),
        );

        let mut registry = Self::empty();
        Arc::new(FilesystemTool::new(guard.clone(), edits, limits.max_read_bytes))
            .register(&mut registry);
        Arc::new(FileSearchTool::new(guard.clone(), limits.max_search_results))
            .register(&mut registry);
        Arc::new(TodoReadTool::new(Arc::clone(&ledger))).register(&mut registry);
        Arc::new(TodoCreateTool::new(ledger)).register(&mut registry);
        Arc::new(ShellTool::new(
            Arc::new(BashRunner),
            guard.workspace().to_path_buf(),
            limits.shell_timeout(),
            limits.max_output_bytes,
        ))
        .register(&mut registry);
        Ok(registry)
    }

    /// Register `handler` under `name`. A second registration replaces the first.
    pub fn register(&mut self, name: &str, mut schema: ToolSchema, handler: Arc<dyn ToolHandler>) {
        schema.name = name.to_string();
        let entry = RegisteredTool { schema, handler };
        if let Some(&position) = self.index.get(name) {
            warn!("Tool '{}' registered twice; replacing", name);
            self.tools[position] = entry;
        } else {
            self.index.insert(name.to_string(), self.tools.len());
            self.tools.push(entry);
        }
    }

    fn lookup(&self, name: &str) -> Result<&RegisteredTool, ToolError> {
        self.index
            .get(name)
            .map(|&i| &self.tools[i])
            .ok_or_else(|| ToolError::UnknownTool {
                name: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn schema(&self, name: &str) -> Option<&ToolSchema> {
        self.lookup(name).ok().map(|t| &t.schema)
    }

    pub fn side_effect(&self, name: &str) -> Option<SideEffect> {
        self.schema(name).map(|s| s.side_effect)
    }

    /// Schemas in registration order
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools.iter().map(|t| t.schema.clone()).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.schema.name.as_str()).collect()
    }

    /// Validate `args` for `name` and build the handler input.
    pub fn validate(&self, name: &str, args: Value) -> Result<ToolInput, ToolError> {
        let tool = self.lookup(name)?;
        tool.schema.validate(&args)?;
        ToolInput::from_args(name, args)
    }

    /// Validated preview; `None` when the tool has nothing to show.
    pub async fn preview(&self, name: &str, args: Value) -> Result<Option<Preview>, ToolError> {
        let input = self.validate(name, args)?;
        self.lookup(name)?.handler.preview(&input).await
    }

    /// Validate and dispatch with a fresh context.
    pub async fn invoke(&self, name: &str, args: Value) -> Result<ToolOutput, ToolError> {
        self.invoke_with(name, args, ToolContext::default()).await
    }

    /// Validate and dispatch. The handler is never called on invalid arguments.
    pub async fn invoke_with(
        &self,
        name: &str,
        args: Value,
        ctx: ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let input = match self.validate(name, args) {
            Ok(input) => input,
            Err(e) => {
                warn!("Rejected call to '{}': {}", name, e);
                return Err(e);
            }
        };
        debug!("Dispatching tool '{}'", name);
        self.lookup(name)?.handler.call(input, ctx).await
    }
}
