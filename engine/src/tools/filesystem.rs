//! Filesystem tools
//!
//! Reads go straight to disk; every write goes through the edit manager as a
//! transaction, so `file_edit`, `multi_edit` and friends inherit its
//! all-or-nothing commit and conflict detection. All paths are validated by
//! `FileSystemGuard` before any I/O.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use sdk::{ParamSpec, ParamType, SideEffect, ToolError, ToolInput, ToolOutput, ToolSchema};
use serde_json::{json, Value};
use tokio::fs;
use tracing::{debug, info};

use super::{Preview, ToolContext, ToolHandler, ToolRegistry};
use crate::fs_guard::FileSystemGuard;
use crate::transaction::{EditManager, EditTransaction, Mutation};

/// Shared state behind the filesystem tools
pub struct FilesystemTool {
    guard: FileSystemGuard,
    edits: Arc<EditManager>,
    max_read_bytes: u64,
}

impl FilesystemTool {
    pub fn new(guard: FileSystemGuard, edits: Arc<EditManager>, max_read_bytes: u64) -> Self {
        Self {
            guard,
            edits,
            max_read_bytes,
        }
    }

    /// Register `file_read`, `list_dir`, `file_create`, `file_edit`,
    /// `multi_edit` and `file_delete`.
    pub fn register(self: Arc<Self>, registry: &mut ToolRegistry) {
        registry.register(
            "file_read",
            ToolSchema::new(
                "file_read",
                "Read a text file in the project. Use start_line (1-indexed) and lines to read a slice.",
                SideEffect::ReadOnly,
            )
            .param(ParamSpec::required("path", ParamType::String, "File path relative to the project root"))
            .param(ParamSpec::optional("start_line", ParamType::Integer, "First line to return, 1-indexed"))
            .param(ParamSpec::optional("lines", ParamType::Integer, "Number of lines to return")),
            Arc::new(FileRead(Arc::clone(&self))),
        );
        registry.register(
            "list_dir",
            ToolSchema::new("list_dir", "List the entries of a directory.", SideEffect::ReadOnly)
                .param(ParamSpec::optional("path", ParamType::String, "Directory path, defaults to the project root")),
            Arc::new(ListDir(Arc::clone(&self))),
        );
        registry.register(
            "file_create",
            ToolSchema::new("file_create", "Create a new file. Fails if the file exists.", SideEffect::Mutating)
                .param(ParamSpec::required("path", ParamType::String, "Path of the new file"))
                .param(ParamSpec::required("content", ParamType::String, "Full file content")),
            Arc::new(FileWrite {
                fs: Arc::clone(&self),
                kind: WriteKind::Create,
            }),
        );
        registry.register(
            "file_edit",
            ToolSchema::new(
                "file_edit",
                "Edit an existing file. Pass either the full new `content`, or `old_text` (which must occur exactly once) and `new_text`.",
                SideEffect::Mutating,
            )
            .param(ParamSpec::required("path", ParamType::String, "Path of the file to edit"))
            .param(ParamSpec::optional("content", ParamType::String, "Full replacement content"))
            .param(ParamSpec::optional("old_text", ParamType::String, "Exact text to replace"))
            .param(ParamSpec::optional("new_text", ParamType::String, "Replacement text")),
            Arc::new(FileWrite {
                fs: Arc::clone(&self),
                kind: WriteKind::Edit,
            }),
        );
        registry.register(
            "multi_edit",
            ToolSchema::new(
                "multi_edit",
                "Apply edits to several files as one all-or-nothing change. `edits` is an array of objects shaped like file_edit arguments; files that do not exist yet are created from `content`.",
                SideEffect::Mutating,
            )
            .param(ParamSpec::required("edits", ParamType::Array, "List of {path, content} or {path, old_text, new_text}"))
            .param(ParamSpec::optional("description", ParamType::String, "What the change does")),
            Arc::new(FileWrite {
                fs: Arc::clone(&self),
                kind: WriteKind::Multi,
            }),
        );
        registry.register(
            "file_delete",
            ToolSchema::new("file_delete", "Delete a file.", SideEffect::Destructive)
                .param(ParamSpec::required("path", ParamType::String, "Path of the file to delete")),
            Arc::new(FileWrite {
                fs: self,
                kind: WriteKind::Delete,
            }),
        );
    }

    /// Read (a slice of) a file within the workspace.
    pub async fn read_file(
        &self,
        path: &str,
        start_line: Option<i64>,
        lines: Option<i64>,
    ) -> Result<ToolOutput, ToolError> {
        let path = self.guard.resolve(path)?;
        let shown = self.guard.display(&path);
        info!("Reading file: {}", shown);

        let metadata = fs::metadata(&path)
            .await
            .map_err(|e| ToolError::execution_failed(format!("cannot read {}: {}", shown, e)))?;
        if metadata.is_dir() {
            return Err(ToolError::invalid_args(format!(
                "{} is a directory; use list_dir",
                shown
            )));
        }
        if metadata.len() > self.max_read_bytes {
            return Err(ToolError::execution_failed(format!(
                "{} is {} bytes, over the {} byte read limit; read a slice instead",
                shown,
                metadata.len(),
                self.max_read_bytes
            )));
        }

        let content = fs::read_to_string(&path)
            .await
            .map_err(|e| ToolError::execution_failed(format!("cannot read {}: {}", shown, e)))?;
        let all_lines: Vec<&str> = content.lines().collect();
        let total = all_lines.len();

        let start = match start_line {
            Some(n) if n < 1 => {
                return Err(ToolError::invalid_args("start_line is 1-indexed"));
            }
            Some(n) => (n as usize).min(total.max(1)),
            None => 1,
        };
        let count = match lines {
            Some(n) if n < 0 => return Err(ToolError::invalid_args("lines must be positive")),
            Some(n) => n as usize,
            None => total,
        };

        let slice = if start_line.is_none() && lines.is_none() {
            content.clone()
        } else {
            all_lines
                .iter()
                .skip(start - 1)
                .take(count)
                .copied()
                .collect::<Vec<_>>()
                .join("\n")
        };
        let end = (start - 1 + count).min(total);

        debug!("Read {} bytes from {}", slice.len(), shown);
        Ok(ToolOutput::json(json!({
            "path": shown,
            "content": slice,
            "start_line": start,
            "end_line": end,
            "total_lines": total,
        }))
        .with_summary(format!("{} ({} lines)", shown, total)))
    }

    /// List files and directories at the given path within the workspace.
    pub async fn list_dir(&self, path: &str) -> Result<ToolOutput, ToolError> {
        let path = self.guard.resolve(path)?;
        let shown = self.guard.display(&path);
        info!("Listing directory: {}", shown);

        let mut entries = fs::read_dir(&path)
            .await
            .map_err(|e| ToolError::execution_failed(format!("cannot list {}: {}", shown, e)))?;

        let mut listing = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ToolError::execution_failed(e.to_string()))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            let Ok(file_type) = entry.file_type().await else {
                continue;
            };
            let (kind, size) = if file_type.is_dir() {
                ("dir", None)
            } else if file_type.is_symlink() {
                ("symlink", None)
            } else {
                ("file", entry.metadata().await.ok().map(|m| m.len()))
            };
            listing.push((kind, name, size));
        }

        // Directories first, then by name.
        listing.sort_by(|a, b| (a.0 != "dir", &a.1).cmp(&(b.0 != "dir", &b.1)));

        let text = listing
            .iter()
            .map(|(kind, name, size)| match (kind, size) {
                (&"dir", _) => format!("d  {}/", name),
                (_, Some(size)) => format!("f  {:>8}  {}", format_size(*size), name),
                _ => format!("l  {}", name),
            })
            .collect::<Vec<_>>()
            .join("\n");
        let entries: Vec<Value> = listing
            .iter()
            .map(|(kind, name, size)| json!({"name": name, "kind": kind, "size": size}))
            .collect();

        Ok(ToolOutput::json(json!({
            "path": if shown.is_empty() { ".".to_string() } else { shown },
            "entries": entries,
            "listing": text,
        }))
        .with_summary(format!("{} entries", listing.len())))
    }

    async fn mutations(&self, kind: WriteKind, input: &ToolInput) -> Result<Vec<Mutation>, ToolError> {
        match kind {
            WriteKind::Create => {
                let path = self.guard.resolve(input.param_str("path")?)?;
                if path.exists() {
                    return Err(ToolError::invalid_args(format!(
                        "{} already exists; use file_edit",
                        self.guard.display(&path)
                    )));
                }
                Ok(vec![Mutation::write(path, input.param_str("content")?)])
            }
            WriteKind::Edit => Ok(vec![self.edit_mutation(&input.args(), false).await?]),
            WriteKind::Multi => {
                let edits = input
                    .param_json("edits")?
                    .as_array()
                    .ok_or_else(|| ToolError::invalid_args("edits must be an array"))?;
                if edits.is_empty() {
                    return Err(ToolError::invalid_args("edits is empty"));
                }
                let mut mutations = Vec::with_capacity(edits.len());
                for edit in edits {
                    mutations.push(self.edit_mutation(edit, true).await?);
                }
                Ok(mutations)
            }
            WriteKind::Delete => {
                let path = self.guard.resolve(input.param_str("path")?)?;
                Ok(vec![Mutation::delete(path)])
            }
        }
    }

    /// One `{path, content}` or `{path, old_text, new_text}` edit.
    async fn edit_mutation(&self, edit: &Value, allow_create: bool) -> Result<Mutation, ToolError> {
        let raw_path = str_field(edit, "path").ok_or_else(|| ToolError::invalid_args("edit is missing `path`"))?;
        let path = self.guard.resolve(raw_path)?;
        let shown = self.guard.display(&path);
        let current = self.edits.store().read(&path).await.map_err(|e| {
            ToolError::execution_failed(format!("cannot read {}: {}", shown, e))
        })?;

        match (
            str_field(edit, "content"),
            str_field(edit, "old_text"),
            str_field(edit, "new_text"),
            current,
        ) {
            (Some(content), None, None, Some(_)) => Ok(Mutation::write(path, content)),
            (Some(content), None, None, None) if allow_create => Ok(Mutation::write(path, content)),
            (_, _, _, None) => Err(ToolError::invalid_args(format!(
                "{} does not exist; use file_create",
                shown
            ))),
            (None, Some(old), Some(new), Some(current)) => {
                let occurrences = current.matches(old).count();
                match occurrences {
                    0 => Err(ToolError::invalid_args(format!(
                        "old_text not found in {}",
                        shown
                    ))),
                    1 => Ok(Mutation::write(path, current.replacen(old, new, 1))),
                    n => Err(ToolError::invalid_args(format!(
                        "old_text occurs {} times in {}; include more context",
                        n, shown
                    ))),
                }
            }
            _ => Err(ToolError::invalid_args(
                "pass either `content`, or both `old_text` and `new_text`",
            )),
        }
    }

    async fn stage(&self, kind: WriteKind, input: &ToolInput) -> Result<EditTransaction, ToolError> {
        let mutations = self.mutations(kind, input).await?;
        let name = input
            .param_str_opt("description")
            .map(String::from)
            .unwrap_or_else(|| format!("{} {}", input.tool, input.param_str_opt("path").unwrap_or("")));
        Ok(self.edits.stage(name.trim(), mutations).await?)
    }
}

struct FileRead(Arc<FilesystemTool>);

#[async_trait]
impl ToolHandler for FileRead {
    async fn call(&self, input: ToolInput, _ctx: ToolContext) -> Result<ToolOutput, ToolError> {
        self.0
            .read_file(
                input.param_str("path")?,
                input.param_i64_opt("start_line"),
                input.param_i64_opt("lines"),
            )
            .await
    }
}

struct ListDir(Arc<FilesystemTool>);

#[async_trait]
impl ToolHandler for ListDir {
    async fn call(&self, input: ToolInput, _ctx: ToolContext) -> Result<ToolOutput, ToolError> {
        self.0.list_dir(input.param_str_opt("path").unwrap_or(".")).await
    }
}

#[derive(Debug, Clone, Copy)]
enum WriteKind {
    Create,
    Edit,
    Multi,
    Delete,
}

/// Any tool that stages and commits an edit transaction
struct FileWrite {
    fs: Arc<FilesystemTool>,
    kind: WriteKind,
}

#[async_trait]
impl ToolHandler for FileWrite {
    async fn preview(&self, input: &ToolInput) -> Result<Option<Preview>, ToolError> {
        let tx = self.fs.stage(self.kind, input).await?;
        let title = match self.kind {
            WriteKind::Delete => format!("Delete {}", tx.edits()[0].display_path),
            _ if tx.edits().len() == 1 => {
                format!("{} {}", verb(&tx), tx.edits()[0].display_path)
            }
            _ => format!("Edit {}", tx.summary()),
        };
        Ok(Some(Preview {
            title,
            body: tx.diff(),
            transaction: Some(tx),
        }))
    }

    async fn call(&self, input: ToolInput, ctx: ToolContext) -> Result<ToolOutput, ToolError> {
        let tx = match ctx.staged {
            Some(tx) => tx,
            None => self.fs.stage(self.kind, &input).await?,
        };
        let summary = tx.summary();
        let files: Vec<String> = tx.edits().iter().map(|e| e.display_path.clone()).collect();

        let written: Vec<PathBuf> = self
            .fs
            .edits
            .commit(tx, &ctx.interrupt)
            .await
            .into_tool_result()?;

        Ok(ToolOutput::json(json!({
            "files": files,
            "written": written.len(),
            "summary": summary,
        }))
        .with_summary(summary))
    }
}

fn str_field<'a>(value: &'a Value, name: &str) -> Option<&'a str> {
    value.get(name).and_then(Value::as_str)
}

fn verb(tx: &EditTransaction) -> &'static str {
    match tx.edits().first() {
        Some(edit) if edit.is_create() => "Create",
        Some(edit) if edit.is_delete() => "Delete",
        _ => "Edit",
    }
}

/// Format a byte count into a human-readable size string.
fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
