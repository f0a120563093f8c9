//! Notification routing: editor question → chat message.

use super::Bridge;
use crate::protocol::{Followup, Suggestion};
use tracing::{info, warn};

/// Characters of the task id shown to the human.
const TASK_PREFIX_LEN: usize = 8;

impl Bridge {
    /// Route a question to the chat registered for its task.
    ///
    /// The pending entry is recorded before the send is attempted, and stays
    /// in place when the send fails for a transient reason. Nothing is
    /// reported back to the editor.
    pub async fn route_question(&mut self, followup: Followup) {
        let Followup {
            task_id,
            question,
            suggestions,
        } = followup;

        let Some(chat_id) = self.registrations.lookup(&task_id) else {
            warn!(%task_id, "question for unregistered task, ignoring");
            return;
        };

        self.pending.set(chat_id, &task_id);
        info!(%task_id, chat_id, "stored pending question");

        let text = format_question(&task_id, &question, &suggestions);
        if self.deliver(chat_id, &text).await.is_ok() {
            info!(%task_id, chat_id, "question sent");
        }
    }
}

/// Render a question the way it is shown in the chat.
pub fn format_question(task_id: &str, question: &str, suggestions: &[Suggestion]) -> String {
    let mut text = format!("Task ({}...):\n\n{question}", short_task_id(task_id));
    if !suggestions.is_empty() {
        text.push_str("\n\nSuggestions:");
        for (i, suggestion) in suggestions.iter().enumerate() {
            text.push_str(&format!("\n{}. {}", i + 1, suggestion.text()));
        }
    }
    text.push_str("\n\nPlease reply with your answer.");
    text
}

/// First eight characters of a task id.
pub(crate) fn short_task_id(task_id: &str) -> &str {
    match task_id.char_indices().nth(TASK_PREFIX_LEN) {
        Some((idx, _)) => &task_id[..idx],
        None => task_id,
    }
}
