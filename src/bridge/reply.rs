//! Reply routing: chat message → editor reply frame.

use super::Bridge;
use super::notify::short_task_id;
use crate::link::LinkError;
use crate::protocol::ReplyEnvelope;
use chrono::Utc;
use tracing::{error, info};

pub(super) const NOTHING_PENDING: &str = "Thanks for your message! I wasn't waiting for a response from you right now. \
     Use /register <task_id> to link a task.";

pub(super) const REPLY_SENT: &str = "Your response has been sent to the task.";

/// What happened to a message typed into a chat.
#[derive(Debug)]
pub enum ReplyOutcome {
    /// No task was waiting on this chat; nothing was sent to the editor.
    NothingPending,
    /// The reply frame went out to the editor.
    Delivered { task_id: String },
    /// The editor could not be reached; the question is pending again.
    Failed { task_id: String, error: LinkError },
}

impl Bridge {
    /// Forward a chat message to the task waiting on that chat.
    ///
    /// The pending entry is popped before sending and put back when the send
    /// fails, so the human can simply reply again once the editor reconnects.
    pub async fn route_reply(&mut self, chat_id: i64, text: &str) -> ReplyOutcome {
        let Some(question) = self.pending.pop(chat_id) else {
            info!(chat_id, "message with no pending question");
            let _ = self.deliver(chat_id, NOTHING_PENDING).await;
            return ReplyOutcome::NothingPending;
        };

        let task_id = question.task_id.clone();
        let waited = Utc::now() - question.asked_at;
        info!(%task_id, chat_id, waited_secs = waited.num_seconds(), "routing reply");

        match self.send_reply(&task_id, text).await {
            Ok(()) => {
                info!(%task_id, chat_id, "reply delivered to editor");
                let _ = self.deliver(chat_id, REPLY_SENT).await;
                ReplyOutcome::Delivered { task_id }
            }
            Err(error) => {
                error!(%task_id, chat_id, error = %error, "reply not delivered, restoring pending question");
                self.pending.restore(chat_id, question);
                let notice = delivery_failure_notice(&task_id, &error);
                let _ = self.deliver(chat_id, &notice).await;
                ReplyOutcome::Failed { task_id, error }
            }
        }
    }

    async fn send_reply(&self, task_id: &str, text: &str) -> Result<(), LinkError> {
        let frame = ReplyEnvelope::new(task_id, text)
            .to_frame()
            .map_err(|e| LinkError::Transport(e.to_string()))?;
        self.link.send_frame(frame).await
    }
}

fn delivery_failure_notice(task_id: &str, error: &LinkError) -> String {
    let reason = match error {
        LinkError::NotConnected => "The editor is not connected.".to_owned(),
        LinkError::Closed(_) => "The editor connection was closed.".to_owned(),
        LinkError::Transport(detail) => format!("An unexpected error occurred ({detail})."),
    };
    format!(
        "Error: Could not deliver your response for Task '{}...'. {reason} \
         Send your reply again once the editor is back.",
        short_task_id(task_id)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_notice_names_short_task_and_reason() {
        let notice = delivery_failure_notice("abcdefghijkl", &LinkError::NotConnected);
        assert!(notice.starts_with("Error: Could not deliver your response for Task 'abcdefgh...'."));
        assert!(notice.contains("not connected"));

        let notice = delivery_failure_notice("t1", &LinkError::Transport("boom".into()));
        assert!(notice.contains("(boom)"));
    }
}
