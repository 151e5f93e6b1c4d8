use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::constants::OUTBOUND_QUEUE_SIZE;
use crate::error::RoomError;
use crate::room_registry::{deliver, OutboundMessage, PeerSender, RoomRegistry, SharedRegistry};
use crate::server_protocol::{parse_client_message, ClientMessage};
use crate::server_utils::{clamp_chat_text, now_ms};
use crate::types::{PeerPosition, PeerProfile, PeerUpdate, ServerMessage};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Active { peer_id: String, room_id: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionControl {
    Continue,
    Close,
}

/// Protocol state of one WebSocket connection.
///
/// Frames are handled one at a time in receive order. Until a `join`
/// succeeds every other message is a no-op.
pub struct Session {
    registry: SharedRegistry,
    tx: PeerSender,
    state: SessionState,
}

impl Session {
    pub fn new(registry: SharedRegistry, tx: PeerSender) -> Self {
        Self {
            registry,
            tx,
            state: SessionState::Disconnected,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn peer_id(&self) -> Option<&str> {
        match &self.state {
            SessionState::Active { peer_id, .. } => Some(peer_id),
            SessionState::Disconnected => None,
        }
    }

    pub async fn handle_text(&mut self, raw: &str) -> SessionControl {
        match parse_client_message(raw) {
            Ok(message) => self.dispatch(message).await,
            Err(error) => {
                tracing::debug!(peer_id = ?self.peer_id(), %error, "ignoring client frame");
                SessionControl::Continue
            }
        }
    }

    async fn dispatch(&mut self, message: ClientMessage) -> SessionControl {
        let SessionState::Active { peer_id, room_id } = &self.state else {
            if let ClientMessage::Join { room, profile } = message {
                return self.join(room, profile).await;
            }
            return SessionControl::Continue;
        };
        if matches!(message, ClientMessage::Join { .. }) {
            tracing::debug!(%peer_id, "ignoring repeated join");
            return SessionControl::Continue;
        }

        let (peer_id, room_id) = (peer_id.clone(), room_id.clone());
        self.relay(&peer_id, &room_id, message).await;
        SessionControl::Continue
    }

    async fn join(&mut self, room_id: String, profile: PeerProfile) -> SessionControl {
        let mut registry = self.registry.lock().await;
        match registry.join(&room_id, profile, self.tx.clone()) {
            Ok(joined) => {
                registry.send_to(
                    &joined.peer_id,
                    &ServerMessage::Welcome {
                        id: joined.peer_id.clone(),
                        peers: joined.peers,
                        history: joined.history,
                    },
                );
                if let Some(peer) = registry.peer(&joined.peer_id).cloned() {
                    registry.broadcast(
                        &room_id,
                        &ServerMessage::PeerJoined { peer },
                        Some(&joined.peer_id),
                    );
                }
                tracing::info!(peer_id = %joined.peer_id, %room_id, "peer joined");
                self.state = SessionState::Active {
                    peer_id: joined.peer_id,
                    room_id,
                };
                SessionControl::Continue
            }
            Err(error @ RoomError::Full { .. }) => {
                tracing::info!(%error, "join rejected");
                deliver(&self.tx, &ServerMessage::RoomFull);
                let _ = self.tx.try_send(OutboundMessage::Close {
                    code: 1000,
                    reason: "room full".to_string(),
                });
                SessionControl::Close
            }
        }
    }

    async fn relay(&self, peer_id: &str, room_id: &str, message: ClientMessage) {
        let mut registry = self.registry.lock().await;
        match message {
            ClientMessage::Join { .. } => {}
            ClientMessage::Signal { to, signal } => {
                if registry.room_of(&to) != Some(room_id) {
                    tracing::debug!(peer_id, %to, "signal target not in room");
                    return;
                }
                registry.send_to(
                    &to,
                    &ServerMessage::Signal {
                        from: peer_id.to_string(),
                        signal,
                    },
                );
            }
            ClientMessage::Chat { text } => {
                let Some(text) = clamp_chat_text(&text) else {
                    return;
                };
                if let Some(entry) = registry.record_chat(peer_id, text, now_ms()) {
                    registry.broadcast(room_id, &ServerMessage::Chat(entry), None);
                }
            }
            ClientMessage::Position { pos, stage } => {
                relay_position(&mut registry, peer_id, room_id, pos, stage);
            }
            ClientMessage::Update(update) => {
                relay_update(&mut registry, peer_id, room_id, update);
            }
        }
    }

    /// Removes the peer (if any) and tells the survivors.
    pub async fn close(&mut self) {
        let SessionState::Active { peer_id, room_id } =
            std::mem::replace(&mut self.state, SessionState::Disconnected)
        else {
            return;
        };
        let mut registry = self.registry.lock().await;
        let Some(departure) = registry.leave(&peer_id) else {
            return;
        };
        if !departure.room_closed {
            registry.broadcast(&room_id, &ServerMessage::PeerLeft { id: peer_id.clone() }, None);
        }
        tracing::info!(
            %peer_id,
            %room_id,
            room_closed = departure.room_closed,
            "peer left"
        );
    }
}

fn relay_position(
    registry: &mut RoomRegistry,
    peer_id: &str,
    room_id: &str,
    pos: PeerPosition,
    stage: Option<i64>,
) {
    let Some(peer) = registry.set_position(peer_id, pos, stage) else {
        return;
    };
    registry.broadcast(
        room_id,
        &ServerMessage::Position {
            id: peer.id,
            pos,
            stage: peer.stage,
        },
        Some(peer_id),
    );
}

fn relay_update(
    registry: &mut RoomRegistry,
    peer_id: &str,
    room_id: &str,
    update: PeerUpdate,
) {
    let Some(peer) = registry.update_peer(peer_id, update) else {
        return;
    };
    registry.broadcast(room_id, &ServerMessage::PeerUpdated { peer }, Some(peer_id));
}

/// Drives one upgraded socket until the client goes away.
pub async fn run_socket(registry: SharedRegistry, socket: WebSocket) {
    let (tx, mut rx) = mpsc::channel::<OutboundMessage>(OUTBOUND_QUEUE_SIZE);
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            let should_close = matches!(outbound, OutboundMessage::Close { .. });
            let result = match outbound {
                OutboundMessage::Text(payload) => {
                    ws_sender.send(Message::Text(payload.into())).await
                }
                OutboundMessage::Close { code, reason } => {
                    let frame = CloseFrame {
                        code,
                        reason: reason.into(),
                    };
                    ws_sender.send(Message::Close(Some(frame))).await
                }
            };
            if result.is_err() || should_close {
                break;
            }
        }
    });

    let mut session = Session::new(registry, tx);
    while let Some(received) = ws_receiver.next().await {
        let Ok(message) = received else {
            break;
        };

        let control = match message {
            Message::Text(raw) => session.handle_text(raw.as_str()).await,
            Message::Binary(raw) => match std::str::from_utf8(&raw) {
                Ok(text) => session.handle_text(text).await,
                Err(_) => SessionControl::Continue,
            },
            Message::Close(_) => break,
            _ => SessionControl::Continue,
        };
        if control == SessionControl::Close {
            break;
        }
    }

    session.close().await;
    drop(session);
    let _ = writer.await;
}
