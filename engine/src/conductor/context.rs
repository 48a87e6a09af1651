//! Context Assembler
//!
//! Packs the system prompt, the todo snapshot and as much recent conversation
//! as fits into the token budget for one model call.

use crate::conductor::project::ProjectSummary;
use crate::llm::Message;

/// Rough token estimate: four characters per token
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

pub struct ContextAssembler {
    /// Budget for the conversation history
    token_budget: usize,
    /// Hard cap on history messages regardless of budget
    max_turns: usize,
}

impl ContextAssembler {
    pub fn new(token_budget: usize, max_turns: usize) -> Self {
        Self {
            token_budget,
            max_turns,
        }
    }

    /// Assemble the messages to send to the model.
    ///
    /// Layout: system prompt (with todo snapshot), the newest history that
    /// fits the budget in chronological order, then the user message.
    pub fn assemble(
        &self,
        system_prompt: &str,
        history: &[Message],
        todo_snapshot: &str,
        user_message: &str,
    ) -> Vec<Message> {
        let mut sys_prompt = String::from(system_prompt);
        sys_prompt.push_str("\n\n--- Todos ---\n");
        sys_prompt.push_str(todo_snapshot);

        let mut messages = vec![Message::system(sys_prompt)];

        let mut accumulated_tokens = 0;
        let mut kept = Vec::new();
        for msg in history.iter().rev().take(self.max_turns) {
            let tokens = estimate_tokens(&msg.content);
            if accumulated_tokens + tokens > self.token_budget {
                break;
            }
            accumulated_tokens += tokens;
            kept.push(msg.clone());
        }
        kept.reverse();
        messages.extend(kept);

        messages.push(Message::user(user_message));
        messages
    }
}

/// Base system prompt: how to work, how to plan, and what the project is
pub fn system_prompt(project: &ProjectSummary) -> String {
    format!(
        "You are wren, a coding agent working inside the user's project.\n\
         \n\
         Rules:\n\
         - Use the provided tools to read, search, edit and run things. Paths are relative to the project root.\n\
         - For a single action, call the tool directly.\n\
         - For work that needs several dependent actions, call `execute_plan` once with all steps. \
         A step may use an earlier step's result through {{\"$step\": \"<id>\", \"pointer\": \"/json/pointer\"}}, \
         and must then list that step in its dependencies.\n\
         - Mutating tools are shown to the user for approval; a rejected call is final for this turn.\n\
         - Record follow-up work with `todo_create`. You cannot complete todos yourself.\n\
         - When done, answer in plain text.\n\
         \n\
         --- Project ---\n{}",
        project.format_for_prompt()
    )
}
