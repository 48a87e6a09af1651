//! Todo ledger
//!
//! A per-project, insertion-ordered task list. The model can add items through
//! `todo_create` but never completes them directly: completion is inferred from
//! what the user says (see [`inference`]) and applied here.

pub mod inference;

pub use inference::infer_completions;

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Word-set overlap at or above which two todos count as the same task
pub const DUPLICATE_THRESHOLD: f64 = 0.75;

const HIGH_PRIORITY_KEYWORDS: &[&str] = &[
    "urgent", "critical", "important", "fix", "bug", "error", "broken", "failing", "security",
    "deploy", "release",
];

const LOW_PRIORITY_KEYWORDS: &[&str] = &[
    "cleanup",
    "refactor",
    "documentation",
    "docs",
    "comment",
    "optimize",
    "improve",
    "enhance",
    "consider",
    "maybe",
];

/// Leading filler stripped before comparing contents
const FILLER_PREFIXES: &[&str] = &[
    "todo:", "task:", "step:", "action:", "next:", "now:", "please", "need to", "should", "must",
    "will", "going to", "plan to",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }

    /// Keyword-based guess used when the caller gives no priority
    pub fn infer(content: &str) -> Self {
        let lower = content.to_lowercase();
        if HIGH_PRIORITY_KEYWORDS.iter().any(|k| lower.contains(k)) {
            Priority::High
        } else if LOW_PRIORITY_KEYWORDS.iter().any(|k| lower.contains(k)) {
            Priority::Low
        } else {
            Priority::Medium
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = TodoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            other => Err(TodoError::InvalidPriority(other.to_string())),
        }
    }
}

/// Todo status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    Completed,
}

impl TodoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for TodoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum TodoError {
    #[error("Todo content is empty")]
    EmptyContent,

    #[error("Unknown priority `{0}` (expected low, medium or high)")]
    InvalidPriority(String),
}

impl From<TodoError> for sdk::ToolError {
    fn from(err: TodoError) -> Self {
        sdk::ToolError::invalid_args(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TodoItem {
    pub id: String,
    pub content: String,
    pub priority: Priority,
    pub status: TodoStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl TodoItem {
    pub fn is_pending(&self) -> bool {
        self.status == TodoStatus::Pending
    }
}

/// The task list of one project
#[derive(Debug, Clone, PartialEq)]
pub struct TodoLedger {
    project_id: String,
    items: Vec<TodoItem>,
}

impl TodoLedger {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            items: Vec::new(),
        }
    }

    /// Rebuild a ledger from stored items, already in insertion order
    pub fn from_items(project_id: impl Into<String>, items: Vec<TodoItem>) -> Self {
        Self {
            project_id: project_id.into(),
            items,
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Add an item. Without a priority, one is inferred from the wording.
    pub fn create(
        &mut self,
        content: &str,
        priority: Option<Priority>,
    ) -> Result<TodoItem, TodoError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(TodoError::EmptyContent);
        }

        let item = TodoItem {
            id: self.fresh_id(),
            content: content.to_string(),
            priority: priority.unwrap_or_else(|| Priority::infer(content)),
            status: TodoStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
        };
        debug!("Created todo {} ({}): {}", item.id, item.priority, item.content);
        self.items.push(item.clone());
        Ok(item)
    }

    fn fresh_id(&self) -> String {
        loop {
            let id = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
            if self.get(&id).is_none() {
                return id;
            }
        }
    }

    /// All items in insertion order
    pub fn list(&self) -> &[TodoItem] {
        &self.items
    }

    pub fn pending(&self) -> Vec<&TodoItem> {
        self.items.iter().filter(|i| i.is_pending()).collect()
    }

    pub fn get(&self, id: &str) -> Option<&TodoItem> {
        self.items.iter().find(|i| i.id == id)
    }

    /// Existing item whose content nearly matches `content`
    pub fn find_similar(&self, content: &str) -> Option<&TodoItem> {
        self.items
            .iter()
            .map(|item| (item, similarity(content, &item.content)))
            .filter(|(_, score)| *score >= DUPLICATE_THRESHOLD)
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(item, _)| item)
    }

    /// Mark the given items completed. Only `pending -> completed` happens;
    /// unknown and already-completed ids are ignored. Returns the ids that
    /// changed, in ledger order.
    pub fn apply_completions<'a, I>(&mut self, ids: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let wanted: HashSet<&str> = ids.into_iter().map(String::as_str).collect();
        let now = Utc::now();
        let mut applied = Vec::new();
        for item in self.items.iter_mut() {
            if item.is_pending() && wanted.contains(item.id.as_str()) {
                item.status = TodoStatus::Completed;
                item.completed_at = Some(now);
                applied.push(item.id.clone());
            }
        }
        if !applied.is_empty() {
            debug!("Completed todos: {:?}", applied);
        }
        applied
    }

    /// Compact text rendering for the model's context
    pub fn snapshot_text(&self) -> String {
        if self.items.is_empty() {
            return "No todos.".to_string();
        }
        self.items
            .iter()
            .map(|item| {
                format!(
                    "[{}] {} ({}, {})",
                    item.id, item.content, item.priority, item.status
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Lowercase, strip filler prefixes and punctuation, collapse whitespace
pub fn normalize_content(content: &str) -> String {
    let mut normalized = content.trim().to_lowercase();
    for prefix in FILLER_PREFIXES {
        if let Some(rest) = normalized.strip_prefix(prefix) {
            normalized = rest.trim().to_string();
        }
    }
    normalized
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Jaccard similarity of the normalized word sets, in `[0, 1]`
pub fn similarity(a: &str, b: &str) -> f64 {
    let a = normalize_content(a);
    let b = normalize_content(b);
    let words_a: HashSet<&str> = a.split(' ').filter(|w| !w.is_empty()).collect();
    let words_b: HashSet<&str> = b.split(' ').filter(|w| !w.is_empty()).collect();
    if words_a.is_empty() || words_b.is_empty() {
        return 0.0;
    }
    let intersection = words_a.intersection(&words_b).count();
    let union = words_a.union(&words_b).count();
    intersection as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_inference() {
        assert_eq!(Priority::infer("Fix the login bug"), Priority::High);
        assert_eq!(Priority::infer("Refactor the parser"), Priority::Low);
        assert_eq!(Priority::infer("Add user registration"), Priority::Medium);
        // high keywords win over low ones
        assert_eq!(Priority::infer("Refactor to fix security hole"), Priority::High);
    }

    #[test]
    fn test_create_assigns_unique_ids_in_order() {
        let mut ledger = TodoLedger::new("proj");
        let a = ledger.create("Implement JWT authentication", None).unwrap();
        let b = ledger
            .create("Add user registration", Some(Priority::High))
            .unwrap();

        assert_ne!(a.id, b.id);
        assert_eq!(a.id.len(), 8);
        assert_eq!(b.priority, Priority::High);
        let contents: Vec<_> = ledger.list().iter().map(|i| i.content.as_str()).collect();
        assert_eq!(contents, vec!["Implement JWT authentication", "Add user registration"]);
        assert_eq!(ledger.create("   ", None), Err(TodoError::EmptyContent));
    }

    #[test]
    fn test_apply_completions_is_idempotent() {
        let mut ledger = TodoLedger::new("proj");
        let a = ledger.create("Write tests", None).unwrap();
        let b = ledger.create("Ship it", None).unwrap();

        let applied = ledger.apply_completions(&[a.id.clone(), "nope".to_string()]);
        assert_eq!(applied, vec![a.id.clone()]);
        let first_completed_at = ledger.get(&a.id).unwrap().completed_at;
        assert!(first_completed_at.is_some());

        let snapshot = ledger.clone();
        assert!(ledger.apply_completions(&[a.id.clone()]).is_empty());
        assert_eq!(ledger, snapshot);
        assert_eq!(ledger.pending().len(), 1);
        assert_eq!(ledger.pending()[0].id, b.id);
    }

    #[test]
    fn test_similarity_and_duplicates() {
        assert_eq!(similarity("TODO: Fix the login bug!", "fix the login bug"), 1.0);
        assert!(similarity("Add user registration", "Implement JWT authentication") < 0.1);
        assert_eq!(similarity("", "anything"), 0.0);

        let mut ledger = TodoLedger::new("proj");
        let item = ledger.create("Write unit tests for the parser", None).unwrap();
        assert_eq!(
            ledger.find_similar("write unit tests for parser").map(|i| i.id.clone()),
            Some(item.id)
        );
        assert!(ledger.find_similar("Deploy to staging").is_none());
    }

    #[test]
    fn test_normalize_strips_filler() {
        assert_eq!(normalize_content("Need to: update   README."), "update readme");
        assert_eq!(normalize_content("please, run_tests"), "run_tests");
    }

    #[test]
    fn test_priority_parse() {
        assert_eq!("HIGH".parse::<Priority>(), Ok(Priority::High));
        assert!("urgent".parse::<Priority>().is_err());
    }
}
