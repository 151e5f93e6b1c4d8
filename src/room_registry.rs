use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::constants::{DEFAULT_CHAT_HISTORY, DEFAULT_ROOM_CAPACITY};
use crate::error::RoomError;
use crate::server_utils::make_peer_id;
use crate::types::{ChatEntry, Peer, PeerPosition, PeerProfile, PeerUpdate, ServerMessage};

pub type PeerSender = mpsc::Sender<OutboundMessage>;
pub type SharedRegistry = Arc<Mutex<RoomRegistry>>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutboundMessage {
    Text(String),
    Close { code: u16, reason: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RoomConfig {
    pub capacity: usize,
    pub chat_history: usize,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_ROOM_CAPACITY,
            chat_history: DEFAULT_CHAT_HISTORY,
        }
    }
}

/// Answer to a successful join: the new id plus the room as it was before.
#[derive(Clone, Debug, PartialEq)]
pub struct Joined {
    pub peer_id: String,
    pub peers: Vec<Peer>,
    pub history: Vec<ChatEntry>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Departure {
    pub peer: Peer,
    pub room_closed: bool,
}

struct PeerEntry {
    peer: Peer,
    tx: PeerSender,
}

struct Room {
    peers: Vec<PeerEntry>,
    history: VecDeque<ChatEntry>,
}

impl Room {
    fn entry(&self, peer_id: &str) -> Option<&PeerEntry> {
        self.peers.iter().find(|entry| entry.peer.id == peer_id)
    }

    fn entry_mut(&mut self, peer_id: &str) -> Option<&mut PeerEntry> {
        self.peers.iter_mut().find(|entry| entry.peer.id == peer_id)
    }
}

/// In-memory room id -> peers mapping.
///
/// Rooms are created by the first join and removed as soon as their last
/// peer leaves. Callers hold the registry lock across a mutation and the
/// broadcast describing it, so no peer observes a stale member list.
pub struct RoomRegistry {
    config: RoomConfig,
    rooms: HashMap<String, Room>,
    peer_rooms: HashMap<String, String>,
}

impl RoomRegistry {
    pub fn new(config: RoomConfig) -> Self {
        Self {
            config,
            rooms: HashMap::new(),
            peer_rooms: HashMap::new(),
        }
    }

    pub fn shared(config: RoomConfig) -> SharedRegistry {
        Arc::new(Mutex::new(Self::new(config)))
    }

    pub fn join(
        &mut self,
        room_id: &str,
        profile: PeerProfile,
        tx: PeerSender,
    ) -> Result<Joined, RoomError> {
        let occupied = self.rooms.get(room_id).map_or(0, |room| room.peers.len());
        if occupied >= self.config.capacity {
            return Err(RoomError::Full {
                room_id: room_id.to_string(),
                capacity: self.config.capacity,
            });
        }

        let peer_id = self.allocate_peer_id();
        let room = self.rooms.entry(room_id.to_string()).or_insert_with(|| Room {
            peers: Vec::new(),
            history: VecDeque::new(),
        });
        let peers = room.peers.iter().map(|entry| entry.peer.clone()).collect();
        let history = room.history.iter().cloned().collect();
        room.peers.push(PeerEntry {
            peer: Peer {
                id: peer_id.clone(),
                name: profile.name,
                avatar: profile.avatar,
                stage: profile.stage,
                pos: None,
                room_id: room_id.to_string(),
            },
            tx,
        });
        self.peer_rooms.insert(peer_id.clone(), room_id.to_string());

        Ok(Joined {
            peer_id,
            peers,
            history,
        })
    }

    pub fn leave(&mut self, peer_id: &str) -> Option<Departure> {
        let room_id = self.peer_rooms.remove(peer_id)?;
        let room = self.rooms.get_mut(&room_id)?;
        let index = room
            .peers
            .iter()
            .position(|entry| entry.peer.id == peer_id)?;
        let entry = room.peers.remove(index);

        let room_closed = room.peers.is_empty();
        if room_closed {
            self.rooms.remove(&room_id);
        }
        Some(Departure {
            peer: entry.peer,
            room_closed,
        })
    }

    pub fn list_peers(&self, room_id: &str, except: Option<&str>) -> Vec<Peer> {
        self.rooms
            .get(room_id)
            .map(|room| {
                room.peers
                    .iter()
                    .filter(|entry| Some(entry.peer.id.as_str()) != except)
                    .map(|entry| entry.peer.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn peer(&self, peer_id: &str) -> Option<&Peer> {
        let room = self.rooms.get(self.peer_rooms.get(peer_id)?)?;
        room.entry(peer_id).map(|entry| &entry.peer)
    }

    pub fn room_of(&self, peer_id: &str) -> Option<&str> {
        self.peer_rooms.get(peer_id).map(String::as_str)
    }

    pub fn update_peer(&mut self, peer_id: &str, update: PeerUpdate) -> Option<Peer> {
        let peer = self.peer_mut(peer_id)?;
        if let Some(name) = update.name {
            peer.name = name;
        }
        if let Some(avatar) = update.avatar {
            peer.avatar = avatar;
        }
        if let Some(stage) = update.stage {
            peer.stage = Some(stage);
        }
        Some(peer.clone())
    }

    pub fn set_position(
        &mut self,
        peer_id: &str,
        pos: PeerPosition,
        stage: Option<i64>,
    ) -> Option<Peer> {
        let peer = self.peer_mut(peer_id)?;
        peer.pos = Some(pos);
        if stage.is_some() {
            peer.stage = stage;
        }
        Some(peer.clone())
    }

    /// Stamps a chat line with the sender's current name and keeps it in the
    /// room's bounded history.
    pub fn record_chat(&mut self, peer_id: &str, text: String, ts: i64) -> Option<ChatEntry> {
        let limit = self.config.chat_history;
        let room_id = self.peer_rooms.get(peer_id)?;
        let room = self.rooms.get_mut(room_id)?;
        let entry = ChatEntry {
            id: peer_id.to_string(),
            name: room.entry(peer_id)?.peer.name.clone(),
            text,
            ts,
        };
        if limit > 0 {
            room.history.push_back(entry.clone());
            while room.history.len() > limit {
                room.history.pop_front();
            }
        }
        Some(entry)
    }

    /// Sends to every member of `room_id` except `except`; returns how many
    /// queues accepted the frame.
    pub fn broadcast(&self, room_id: &str, message: &ServerMessage, except: Option<&str>) -> usize {
        let Some(room) = self.rooms.get(room_id) else {
            return 0;
        };
        let Some(payload) = encode(message) else {
            return 0;
        };
        room.peers
            .iter()
            .filter(|entry| Some(entry.peer.id.as_str()) != except)
            .filter(|entry| enqueue(&entry.tx, OutboundMessage::Text(payload.clone())))
            .count()
    }

    pub fn send_to(&self, peer_id: &str, message: &ServerMessage) -> bool {
        let Some(entry) = self
            .peer_rooms
            .get(peer_id)
            .and_then(|room_id| self.rooms.get(room_id))
            .and_then(|room| room.entry(peer_id))
        else {
            return false;
        };
        deliver(&entry.tx, message)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn peer_count(&self) -> usize {
        self.peer_rooms.len()
    }

    /// Closes every connection and forgets all rooms.
    pub fn shutdown(&mut self) {
        for room in self.rooms.values() {
            for entry in &room.peers {
                let _ = entry.tx.try_send(OutboundMessage::Close {
                    code: 1001,
                    reason: "server shutting down".to_string(),
                });
            }
        }
        tracing::info!(
            rooms = self.rooms.len(),
            peers = self.peer_rooms.len(),
            "room registry shut down"
        );
        self.rooms.clear();
        self.peer_rooms.clear();
    }

    fn peer_mut(&mut self, peer_id: &str) -> Option<&mut Peer> {
        let room = self.rooms.get_mut(self.peer_rooms.get(peer_id)?)?;
        room.entry_mut(peer_id).map(|entry| &mut entry.peer)
    }

    fn allocate_peer_id(&self) -> String {
        let mut rng = rand::rng();
        loop {
            let id = make_peer_id(&mut rng);
            if !self.peer_rooms.contains_key(&id) {
                return id;
            }
        }
    }
}

/// Serializes and queues one message on a connection's outbound channel.
pub fn deliver(tx: &PeerSender, message: &ServerMessage) -> bool {
    match encode(message) {
        Some(payload) => enqueue(tx, OutboundMessage::Text(payload)),
        None => false,
    }
}

fn encode(message: &ServerMessage) -> Option<String> {
    match serde_json::to_string(message) {
        Ok(payload) => Some(payload),
        Err(error) => {
            tracing::error!(%error, "failed to encode server message");
            None
        }
    }
}

fn enqueue(tx: &PeerSender, message: OutboundMessage) -> bool {
    match tx.try_send(message) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            tracing::warn!("outbound queue full; dropping frame");
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn profile(name: &str) -> PeerProfile {
        PeerProfile {
            name: name.to_string(),
            avatar: String::new(),
            stage: Some(1),
        }
    }

    fn channel() -> (PeerSender, mpsc::Receiver<OutboundMessage>) {
        mpsc::channel(16)
    }

    fn next_json(rx: &mut mpsc::Receiver<OutboundMessage>) -> Option<Value> {
        match rx.try_recv().ok()? {
            OutboundMessage::Text(payload) => serde_json::from_str(&payload).ok(),
            OutboundMessage::Close { .. } => None,
        }
    }

    #[test]
    fn join_returns_existing_members_excluding_self() {
        let mut registry = RoomRegistry::new(RoomConfig::default());
        let (tx, _rx) = channel();
        let first = registry.join("maze", profile("Al"), tx.clone()).expect("join");
        assert!(first.peers.is_empty());

        let second = registry.join("maze", profile("Bo"), tx).expect("join");
        assert_eq!(second.peers.len(), 1);
        assert_eq!(second.peers[0].id, first.peer_id);
        assert_ne!(second.peer_id, first.peer_id);

        let listed = registry.list_peers("maze", Some(&second.peer_id));
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "Al");
    }

    #[test]
    fn fourth_join_is_rejected_without_side_effects() {
        let mut registry = RoomRegistry::new(RoomConfig::default());
        let (tx, _rx) = channel();
        for name in ["Aa", "Bb", "Cc"] {
            registry.join("maze", profile(name), tx.clone()).expect("join");
        }

        let result = registry.join("maze", profile("Dd"), tx);
        assert_eq!(
            result,
            Err(RoomError::Full {
                room_id: "maze".to_string(),
                capacity: 3
            })
        );
        assert_eq!(registry.list_peers("maze", None).len(), 3);
        assert_eq!(registry.peer_count(), 3);
    }

    #[test]
    fn capacity_is_configurable() {
        let mut registry = RoomRegistry::new(RoomConfig {
            capacity: 1,
            chat_history: 0,
        });
        let (tx, _rx) = channel();
        registry.join("solo", profile("Aa"), tx.clone()).expect("join");
        assert!(registry.join("solo", profile("Bb"), tx.clone()).is_err());
        assert!(registry.join("other", profile("Bb"), tx).is_ok());
    }

    #[test]
    fn last_leave_deallocates_room() {
        let mut registry = RoomRegistry::new(RoomConfig::default());
        let (tx, _rx) = channel();
        let a = registry.join("maze", profile("Aa"), tx.clone()).expect("join");
        let b = registry.join("maze", profile("Bb"), tx.clone()).expect("join");
        registry.record_chat(&a.peer_id, "hello".to_string(), 1);

        let departure = registry.leave(&a.peer_id).expect("leave");
        assert!(!departure.room_closed);
        let departure = registry.leave(&b.peer_id).expect("leave");
        assert!(departure.room_closed);
        assert_eq!(registry.room_count(), 0);
        assert!(registry.leave(&b.peer_id).is_none());

        let again = registry.join("maze", profile("Cc"), tx).expect("join");
        assert!(again.peers.is_empty());
        assert!(again.history.is_empty());
    }

    #[test]
    fn update_merges_only_supplied_fields() {
        let mut registry = RoomRegistry::new(RoomConfig::default());
        let (tx, _rx) = channel();
        let joined = registry
            .join(
                "maze",
                PeerProfile {
                    name: "Al".to_string(),
                    avatar: "data:image/png;base64,AA".to_string(),
                    stage: Some(1),
                },
                tx,
            )
            .expect("join");

        let peer = registry
            .update_peer(
                &joined.peer_id,
                PeerUpdate {
                    stage: Some(3),
                    ..PeerUpdate::default()
                },
            )
            .expect("update");
        assert_eq!(peer.name, "Al");
        assert_eq!(peer.avatar, "data:image/png;base64,AA");
        assert_eq!(peer.stage, Some(3));
    }

    #[test]
    fn set_position_keeps_stage_when_omitted() {
        let mut registry = RoomRegistry::new(RoomConfig::default());
        let (tx, _rx) = channel();
        let joined = registry.join("maze", profile("Al"), tx).expect("join");
        let pos = PeerPosition {
            x: 1.0,
            z: 2.0,
            yaw: 0.5,
        };

        let peer = registry
            .set_position(&joined.peer_id, pos, None)
            .expect("position");
        assert_eq!(peer.stage, Some(1));
        assert_eq!(peer.pos, Some(pos));

        let peer = registry
            .set_position(&joined.peer_id, pos, Some(2))
            .expect("position");
        assert_eq!(peer.stage, Some(2));
    }

    #[test]
    fn chat_history_is_bounded() {
        let mut registry = RoomRegistry::new(RoomConfig {
            capacity: 3,
            chat_history: 2,
        });
        let (tx, _rx) = channel();
        let joined = registry.join("maze", profile("Al"), tx.clone()).expect("join");
        for idx in 0..3 {
            registry.record_chat(&joined.peer_id, format!("m{idx}"), idx);
        }

        let late = registry.join("maze", profile("Bo"), tx).expect("join");
        let texts: Vec<&str> = late.history.iter().map(|entry| entry.text.as_str()).collect();
        assert_eq!(texts, vec!["m1", "m2"]);
    }

    #[test]
    fn broadcast_skips_excluded_peer() {
        let mut registry = RoomRegistry::new(RoomConfig::default());
        let (tx_a, mut rx_a) = channel();
        let (tx_b, mut rx_b) = channel();
        let a = registry.join("maze", profile("Aa"), tx_a).expect("join");
        registry.join("maze", profile("Bb"), tx_b).expect("join");

        let delivered = registry.broadcast(
            "maze",
            &ServerMessage::PeerLeft {
                id: "gone".to_string(),
            },
            Some(&a.peer_id),
        );
        assert_eq!(delivered, 1);
        assert!(next_json(&mut rx_a).is_none());
        let received = next_json(&mut rx_b).expect("b receives");
        assert_eq!(received["type"], "peer-left");
    }

    #[test]
    fn shutdown_closes_connections_and_clears_rooms() {
        let mut registry = RoomRegistry::new(RoomConfig::default());
        let (tx, mut rx) = channel();
        registry.join("maze", profile("Aa"), tx).expect("join");

        registry.shutdown();
        assert_eq!(registry.room_count(), 0);
        assert_eq!(registry.peer_count(), 0);
        assert!(matches!(
            rx.try_recv(),
            Ok(OutboundMessage::Close { code: 1001, .. })
        ));
    }
}
