//! WebSocket server side of the editor link.
//!
//! Holds at most one live editor connection. A second connection attempt while
//! one is active is closed straight away with a policy close frame.

use super::{EditorLink, LinkError, LinkEvent};
use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::sync::mpsc::Sender;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{WebSocketStream, accept_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// The one editor currently allowed to talk to us.
struct Endpoint {
    id: u64,
    peer: SocketAddr,
    sink: WsSink,
}

type Slot = Arc<Mutex<Option<Endpoint>>>;

pub struct WebSocketLink {
    listener: TcpListener,
    slot: Slot,
}

impl WebSocketLink {
    /// Bind the listening socket (e.g. `"localhost:8765"`).
    pub async fn bind(addr: &str) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            slot: Arc::new(Mutex::new(None)),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Close the active connection, if any, with `reason`.
    pub async fn close_active(&self, reason: &'static str) {
        let Some(mut endpoint) = self.slot.lock().await.take() else {
            return;
        };
        let frame = CloseFrame {
            code: CloseCode::Away,
            reason: reason.into(),
        };
        if let Err(e) = endpoint.sink.send(Message::Close(Some(frame))).await {
            debug!(peer = %endpoint.peer, error = %e, "close frame not delivered");
        }
        info!(peer = %endpoint.peer, reason, "closed editor connection");
    }
}

#[async_trait]
impl EditorLink for WebSocketLink {
    async fn run(&self, tx: Sender<LinkEvent>, cancel: CancellationToken) {
        match self.local_addr() {
            Ok(addr) => info!(%addr, "editor socket listening"),
            Err(e) => warn!(error = %e, "editor socket listening on unknown address"),
        }

        // Connection tasks stop only after the shutdown close frame is out.
        let connections = CancellationToken::new();
        let mut next_id: u64 = 0;
        loop {
            let (stream, peer) = tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!(error = %e, "failed to accept editor connection");
                        continue;
                    }
                }
            };

            next_id += 1;
            tokio::spawn(serve_connection(
                next_id,
                stream,
                peer,
                self.slot.clone(),
                tx.clone(),
                connections.child_token(),
            ));
        }

        self.close_active("Server shutdown").await;
        connections.cancel();
    }

    async fn send_frame(&self, frame: String) -> Result<(), LinkError> {
        let mut slot = self.slot.lock().await;
        let Some(endpoint) = slot.as_mut() else {
            return Err(LinkError::NotConnected);
        };
        match endpoint.sink.send(Message::text(frame)).await {
            Ok(()) => {
                debug!(peer = %endpoint.peer, "frame sent to editor");
                Ok(())
            }
            Err(e @ (WsError::ConnectionClosed | WsError::AlreadyClosed)) => {
                Err(LinkError::Closed(e.to_string()))
            }
            Err(e) => Err(LinkError::Transport(e.to_string())),
        }
    }
}

/// Handshake, claim the slot, then pump frames until the editor leaves.
async fn serve_connection(
    id: u64,
    stream: TcpStream,
    peer: SocketAddr,
    slot: Slot,
    tx: Sender<LinkEvent>,
    cancel: CancellationToken,
) {
    let ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(%peer, error = %e, "editor handshake failed");
            return;
        }
    };
    let (mut sink, mut stream) = ws.split();

    {
        let mut guard = slot.lock().await;
        if guard.is_some() {
            warn!(%peer, "rejecting editor connection, already connected");
            let frame = CloseFrame {
                code: CloseCode::Policy,
                reason: "Already connected".into(),
            };
            let _ = sink.send(Message::Close(Some(frame))).await;
            return;
        }
        *guard = Some(Endpoint { id, peer, sink });
    }

    info!(%peer, "editor connected");
    let peer_label = peer.to_string();
    if tx
        .send(LinkEvent::Connected {
            peer: peer_label.clone(),
        })
        .await
        .is_err()
    {
        release(&slot, id).await;
        return;
    }

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = stream.next() => next,
        };
        match next {
            Some(Ok(Message::Text(text))) => {
                debug!(%peer, len = text.len(), "frame from editor");
                if tx.send(LinkEvent::Frame(text.as_str().to_owned())).await.is_err() {
                    break;
                }
            }
            Some(Ok(Message::Close(_))) | None => {
                info!(%peer, "editor disconnected normally");
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                error!(%peer, error = %e, "editor disconnected with error");
                break;
            }
        }
    }

    release(&slot, id).await;
    let _ = tx.send(LinkEvent::Disconnected { peer: peer_label }).await;
}

/// Empty the slot if it still belongs to connection `id`.
async fn release(slot: &Slot, id: u64) {
    let mut guard = slot.lock().await;
    if guard.as_ref().is_some_and(|ep| ep.id == id) {
        *guard = None;
    }
}
