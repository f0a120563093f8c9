//! Channel abstraction for the chat side of the bridge (Telegram today).

pub mod telegram;

use async_trait::async_trait;
use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;

/// An event received from a channel.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// A regular text message from a user.
    Message {
        chat_id: i64,
        message_id: i64,
        user_id: i64,
        user_name: String,
        text: String,
    },

    /// A slash command from a user (e.g. /register abc123).
    Command {
        chat_id: i64,
        message_id: i64,
        user_id: i64,
        user_name: String,
        command: String,
        args: String,
    },
}

/// A message to send back through a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub chat_id: i64,
    pub text: String,
}

impl OutboundMessage {
    pub fn new(chat_id: i64, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            text: text.into(),
        }
    }
}

/// Why a message could not be delivered.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The chat will never accept messages from us (bot blocked, chat gone).
    #[error("recipient unreachable: {0}")]
    Unreachable(String),

    #[error("telegram API error: {0}")]
    Api(String),

    #[error("telegram request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl ChannelError {
    /// Permanent failures unlink the chat's task instead of being retried.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Unreachable(_))
    }
}

/// Trait for messaging channel integrations.
///
/// Implementations run a background loop that produces `ChannelEvent`s
/// and can send outbound messages.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Channel: Send + Sync {
    /// Human-readable name for logging.
    fn name(&self) -> &'static str;

    /// Run the channel's receive loop, sending events to `tx`.
    /// Should run until `cancel` is triggered.
    async fn run(&self, tx: Sender<ChannelEvent>, cancel: CancellationToken);

    /// Send a message through this channel. Transient failures are retried
    /// by the implementation before an error is returned.
    async fn send_message(&self, msg: &OutboundMessage) -> Result<(), ChannelError>;
}
