//! Semantic todo completion
//!
//! The model is shown only the pending items and the user's message and asked
//! which ids the message says are done. Anything that goes wrong (backend
//! error, prose instead of JSON, ids that aren't pending) degrades to "nothing
//! completed".

use std::collections::HashSet;

use regex::Regex;
use serde_json::Value;
use tracing::debug;

use super::TodoItem;
use crate::llm::LLMProvider;

/// Prompt asking which pending items `message` reports as finished
pub fn completion_prompt(message: &str, pending: &[&TodoItem]) -> String {
    let listing = pending
        .iter()
        .map(|item| format!("  \"{}\": {}", item.id, serde_json::json!(item.content)))
        .collect::<Vec<_>>()
        .join(",\n");

    format!(
        "You track a developer's todo list. Decide which of these pending todos the \
         developer's message says are finished.\n\n\
         Pending todos (id: content):\n{{\n{listing}\n}}\n\n\
         Developer message:\n\"\"\"\n{message}\n\"\"\"\n\n\
         Only count a todo as finished when the message clearly states that work is done. \
         Plans, questions and partial progress do not count.\n\
         Reply with only a JSON array of the finished ids, e.g. [\"a1b2c3d4\"], or [] if none."
    )
}

/// First JSON array in `text`, as the list of string ids it contains
pub fn extract_ids(text: &str) -> Option<Vec<String>> {
    let re = Regex::new(r"(?s)\[.*?\]").ok()?;
    let array = re.find(text)?.as_str();
    let values: Vec<Value> = serde_json::from_str(array).ok()?;
    Some(
        values
            .into_iter()
            .filter_map(|v| v.as_str().map(|s| s.trim().to_string()))
            .collect(),
    )
}

/// Ask the backend which pending items `message` completes.
///
/// Returns only ids that are pending in `items`. With nothing pending the
/// backend is not called.
pub async fn infer_completions(
    provider: &dyn LLMProvider,
    message: &str,
    items: &[TodoItem],
) -> HashSet<String> {
    let pending: Vec<&TodoItem> = items.iter().filter(|i| i.is_pending()).collect();
    if pending.is_empty() || message.trim().is_empty() {
        return HashSet::new();
    }

    let prompt = completion_prompt(message, &pending);
    let reply = match provider.infer(&prompt).await {
        Ok(reply) => reply,
        Err(e) => {
            debug!("Todo inference skipped, backend failed: {}", e);
            return HashSet::new();
        }
    };

    let Some(ids) = extract_ids(&reply) else {
        debug!("Todo inference reply had no id array: {:?}", reply);
        return HashSet::new();
    };

    ids.into_iter()
        .filter(|id| pending.iter().any(|item| &item.id == id))
        .collect()
}
