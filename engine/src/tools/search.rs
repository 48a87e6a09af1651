//! `file_search`: regex search over file contents, glob search over file names
//!
//! Traversal is .gitignore-aware and skips hidden files, `target/` and
//! `node_modules/`. An optional `file_pattern` glob narrows either mode. The
//! walk runs on the blocking pool.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use ignore::overrides::{Override, OverrideBuilder};
use ignore::Match;
use regex::{Regex, RegexBuilder};
use sdk::{ParamSpec, ParamType, SideEffect, ToolError, ToolInput, ToolOutput, ToolSchema};
use serde::Serialize;
use serde_json::json;
use tracing::debug;

use super::{ToolContext, ToolHandler, ToolRegistry};
use crate::fs_guard::FileSystemGuard;

const SKIPPED_DIRS: &[&str] = &["target", "node_modules"];
const MAX_SEARCH_FILE_BYTES: u64 = 1024 * 1024;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SearchHit {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

pub struct FileSearchTool {
    guard: FileSystemGuard,
    max_results: usize,
}

impl FileSearchTool {
    pub fn new(guard: FileSystemGuard, max_results: usize) -> Self {
        Self { guard, max_results }
    }

    pub fn register(self: Arc<Self>, registry: &mut ToolRegistry) {
        registry.register(
            "file_search",
            ToolSchema::new(
                "file_search",
                "Search the project. mode \"content\" (default) greps file contents with a regex; mode \"filename\" matches file names against a glob such as \"*.rs\" (a bare word matches anywhere in the name).",
                SideEffect::ReadOnly,
            )
            .param(ParamSpec::required("pattern", ParamType::String, "Regex for content, glob for filename"))
            .param(ParamSpec::optional("mode", ParamType::String, "\"content\" or \"filename\""))
            .param(ParamSpec::optional("file_pattern", ParamType::String, "Only search files matching this glob, e.g. \"*.py\""))
            .param(ParamSpec::optional("path", ParamType::String, "Directory to search, defaults to the project root"))
            .param(ParamSpec::optional("case_sensitive", ParamType::Boolean, "Defaults to false"))
            .param(ParamSpec::optional("max_results", ParamType::Integer, "Maximum number of hits")),
            self,
        );
    }
}

#[async_trait]
impl ToolHandler for FileSearchTool {
    async fn call(&self, input: ToolInput, _ctx: ToolContext) -> Result<ToolOutput, ToolError> {
        let pattern = input.param_str("pattern")?;
        let by_name = match input.param_str_opt("mode").unwrap_or("content") {
            "content" => false,
            "filename" => true,
            other => {
                return Err(ToolError::invalid_args(format!(
                    "mode must be \"content\" or \"filename\", got {:?}",
                    other
                )))
            }
        };
        let case_sensitive = input.param_bool_opt("case_sensitive").unwrap_or(false);
        let root = self.guard.resolve(input.param_str_opt("path").unwrap_or("."))?;

        let matcher = if by_name {
            Matcher::Name(glob(&root, &name_glob(pattern), case_sensitive)?)
        } else {
            Matcher::Content(
                RegexBuilder::new(pattern)
                    .case_insensitive(!case_sensitive)
                    .build()
                    .map_err(|e| ToolError::invalid_args(format!("invalid regex: {}", e)))?,
            )
        };
        let file_filter = input
            .param_str_opt("file_pattern")
            .map(|p| glob(&root, p, case_sensitive))
            .transpose()?;
        let limit = input
            .param_i64_opt("max_results")
            .filter(|n| *n > 0)
            .map(|n| (n as usize).min(self.max_results))
            .unwrap_or(self.max_results);

        let workspace = self.guard.workspace().to_path_buf();
        debug!("Searching {} for {:?}", root.display(), pattern);

        let (hits, truncated) = tokio::task::spawn_blocking(move || {
            search(&root, &workspace, &matcher, file_filter.as_ref(), limit)
        })
        .await
        .map_err(|e| ToolError::execution_failed(format!("search task failed: {}", e)))?;

        let summary = format!(
            "{} match{}{}",
            hits.len(),
            if hits.len() == 1 { "" } else { "es" },
            if truncated { " (truncated)" } else { "" }
        );
        Ok(ToolOutput::json(json!({
            "hits": hits,
            "truncated": truncated,
        }))
        .with_summary(summary))
    }
}

enum Matcher {
    Content(Regex),
    Name(Override),
}

/// A filename pattern without glob syntax matches as a substring.
fn name_glob(pattern: &str) -> String {
    if pattern.contains(['*', '?', '[']) {
        pattern.to_string()
    } else {
        format!("*{}*", pattern)
    }
}

fn glob(root: &Path, pattern: &str, case_sensitive: bool) -> Result<Override, ToolError> {
    let invalid =
        |e: ignore::Error| ToolError::invalid_args(format!("invalid glob {:?}: {}", pattern, e));
    let mut builder = OverrideBuilder::new(root);
    builder.case_insensitive(!case_sensitive).map_err(invalid)?;
    builder.add(pattern).map_err(invalid)?;
    builder.build().map_err(invalid)
}

fn globbed(glob: &Override, path: &Path) -> bool {
    matches!(glob.matched(path, false), Match::Whitelist(_))
}

fn search(
    root: &Path,
    workspace: &Path,
    matcher: &Matcher,
    file_filter: Option<&Override>,
    limit: usize,
) -> (Vec<SearchHit>, bool) {
    let relative = |path: &Path| -> String {
        path.strip_prefix(workspace)
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned()
    };

    let walker = ignore::WalkBuilder::new(root)
        .hidden(true)
        .git_ignore(true)
        .git_exclude(true)
        .require_git(false)
        .filter_entry(|entry| {
            !(entry.file_type().is_some_and(|ft| ft.is_dir())
                && entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| SKIPPED_DIRS.contains(&name)))
        })
        .build();

    let mut files: Vec<PathBuf> = walker
        .flatten()
        .filter(|entry| entry.file_type().is_some_and(|ft| ft.is_file()))
        .map(|entry| entry.into_path())
        .collect();
    files.sort();

    if let Some(filter) = file_filter {
        files.retain(|path| globbed(filter, path));
    }

    let mut hits = Vec::new();
    for path in files {
        let regex = match matcher {
            Matcher::Name(name) => {
                if globbed(name, &path) {
                    if hits.len() == limit {
                        return (hits, true);
                    }
                    hits.push(SearchHit {
                        path: relative(&path),
                        line: None,
                        text: None,
                    });
                }
                continue;
            }
            Matcher::Content(regex) => regex,
        };

        let too_big = std::fs::metadata(&path)
            .map(|m| m.len() > MAX_SEARCH_FILE_BYTES)
            .unwrap_or(true);
        if too_big {
            continue;
        }
        // Binary and non-UTF-8 files are skipped.
        let Ok(content) = std::fs::read_to_string(&path) else {
            continue;
        };
        for (index, line) in content.lines().enumerate() {
            if regex.is_match(line) {
                if hits.len() == limit {
                    return (hits, true);
                }
                hits.push(SearchHit {
                    path: relative(&path),
                    line: Some(index + 1),
                    text: Some(line.trim_end().chars().take(200).collect()),
                });
            }
        }
    }
    (hits, false)
}
