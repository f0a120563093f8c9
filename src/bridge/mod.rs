//! Bridge: routes questions from editor tasks to chats and replies back.
//!
//! Owns the registration store and the pending-question tracker. All routing
//! runs on the daemon's event loop through `&mut self`, so no locking is
//! needed around the lookup → set and pop → send sequences.

mod commands;
mod notify;
mod reply;

#[cfg(test)]
mod tests;

pub use notify::format_question;
pub use reply::ReplyOutcome;

use crate::channel::{Channel, ChannelError, ChannelEvent, OutboundMessage};
use crate::link::{EditorLink, LinkEvent};
use crate::pending::PendingQuestions;
use crate::protocol::{FrameError, parse_frame};
use crate::registration::RegistrationStore;
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct Bridge {
    registrations: RegistrationStore,
    pending: PendingQuestions,
    channel: Arc<dyn Channel>,
    link: Arc<dyn EditorLink>,
}

impl Bridge {
    pub fn new(
        registrations: RegistrationStore,
        channel: Arc<dyn Channel>,
        link: Arc<dyn EditorLink>,
    ) -> Self {
        Self {
            registrations,
            pending: PendingQuestions::new(),
            channel,
            link,
        }
    }

    pub fn registrations(&self) -> &RegistrationStore {
        &self.registrations
    }

    pub fn pending(&self) -> &PendingQuestions {
        &self.pending
    }

    /// Bind `task_id` to `chat_id` (last registration wins).
    pub fn register(&mut self, task_id: &str, chat_id: i64) {
        self.registrations.register(task_id, chat_id);
    }

    /// Unbind `task_id`. Also drops the chat's pending question when it was
    /// asked by this task. Returns whether a binding existed.
    pub fn unregister(&mut self, task_id: &str) -> bool {
        let Some(chat_id) = self.registrations.remove(task_id) else {
            return false;
        };
        if self.pending.clear_if(chat_id, task_id) {
            info!(task_id, chat_id, "cleared pending question for unregistered task");
        }
        true
    }

    /// Dispatch one event from the chat channel.
    pub async fn handle_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Command {
                chat_id,
                user_name,
                command,
                args,
                ..
            } => {
                info!(chat_id, user = %user_name, "command /{command} {args}");
                self.handle_command(chat_id, &command, &args).await;
            }
            ChannelEvent::Message {
                chat_id,
                user_name,
                text,
                ..
            } => {
                info!(chat_id, user = %user_name, "message: {}", truncate(&text, 80));
                self.route_reply(chat_id, &text).await;
            }
        }
    }

    /// Dispatch one event from the editor link.
    pub async fn handle_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Connected { peer } => info!(%peer, "editor link up"),
            LinkEvent::Disconnected { peer } => info!(%peer, "editor link down"),
            LinkEvent::Frame(text) => self.handle_frame(&text).await,
        }
    }

    /// Parse an inbound frame and route it. Bad frames are logged and dropped.
    pub async fn handle_frame(&mut self, text: &str) {
        match parse_frame(text) {
            Ok(followup) => self.route_question(followup).await,
            Err(FrameError::UnknownType(kind)) => {
                warn!(kind = kind.as_deref().unwrap_or("<none>"), "ignoring unknown message type");
            }
            Err(e @ FrameError::MissingField(_)) => {
                warn!(error = %e, "ignoring invalid followup frame");
            }
            Err(e) => error!(error = %e, frame = %truncate(text, 200), "failed to decode frame"),
        }
    }

    /// Send `text` to a chat. A chat that rejects us permanently loses its
    /// task binding.
    async fn deliver(&mut self, chat_id: i64, text: &str) -> Result<(), ChannelError> {
        let msg = OutboundMessage::new(chat_id, text);
        match self.channel.send_message(&msg).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_permanent() => {
                error!(chat_id, error = %e, "chat unreachable");
                if let Some(task_id) = self.registrations.task_for_chat(chat_id).map(str::to_owned)
                {
                    self.unregister(&task_id);
                }
                Err(e)
            }
            Err(e) => {
                error!(chat_id, error = %e, "failed to send message");
                Err(e)
            }
        }
    }
}

/// Shorten `s` to at most `max` characters for logging.
fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_owned(),
    }
}
