//! Editor link: the duplex frame channel to the editor extension.
//!
//! The router only sees this trait, so the mechanism underneath (WebSocket
//! today) can change without touching routing logic.

pub mod websocket;

use async_trait::async_trait;
use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;

/// An event produced by the link's receive loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// An editor connected and now owns the link.
    Connected { peer: String },
    /// A text frame from the connected editor.
    Frame(String),
    /// The connected editor went away; replies cannot be delivered.
    Disconnected { peer: String },
}

/// Why a frame could not be delivered to the editor.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("no editor is connected")]
    NotConnected,

    #[error("editor connection closed: {0}")]
    Closed(String),

    #[error("editor link error: {0}")]
    Transport(String),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EditorLink: Send + Sync {
    /// Accept editors and forward their frames to `tx` until `cancel` fires.
    async fn run(&self, tx: Sender<LinkEvent>, cancel: CancellationToken);

    /// Send one text frame to the connected editor.
    async fn send_frame(&self, frame: String) -> Result<(), LinkError>;
}
