//! Slash commands typed into the chat.

use super::Bridge;
use tracing::info;

pub(super) const USAGE: &str = "Welcome to the editor task bridge!\n\
     Use /register <task_id> to link this chat to a task.\n\
     Use /unregister <task_id> to remove the link.\n\
     You can copy the task ID from the editor.";

impl Bridge {
    /// Handle a slash command from `chat_id`.
    pub async fn handle_command(&mut self, chat_id: i64, command: &str, args: &str) {
        let task_id = args.split_whitespace().next();
        let text = match (command, task_id) {
            ("start" | "help", _) => USAGE.to_owned(),
            ("register", None) => {
                "Please provide the task ID.\nUsage: /register <task_id>".to_owned()
            }
            ("register", Some(task_id)) => {
                self.register(task_id, chat_id);
                format!(
                    "Task ID '{task_id}' is now linked to this chat ({chat_id}). \
                     You will receive prompts for this task here."
                )
            }
            ("unregister", None) => {
                "Please provide the task ID to unregister.\nUsage: /unregister <task_id>"
                    .to_owned()
            }
            ("unregister", Some(task_id)) => self.unregister_from_chat(chat_id, task_id),
            _ => format!("Unknown command: /{command}\nSend /start for usage."),
        };
        let _ = self.deliver(chat_id, &text).await;
    }

    /// Unlink `task_id`, but only when it is linked to the asking chat.
    fn unregister_from_chat(&mut self, chat_id: i64, task_id: &str) -> String {
        if self.registrations.lookup(task_id) != Some(chat_id) {
            info!(task_id, chat_id, "refusing to unregister task not linked to this chat");
            return format!("Task ID '{task_id}' is not currently linked to *this* chat.");
        }
        if self.unregister(task_id) {
            format!("Task ID '{task_id}' has been unlinked from this chat.")
        } else {
            format!("Could not find Task ID '{task_id}' to unregister.")
        }
    }
}
