use std::fmt;

use serde::{Serialize, Serializer};
use serde_json::Value;

/// One leaderboard row as exposed by `GET /api/records`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StageRecord {
    pub stage: i64,
    pub name: String,
    pub time: f64,
}

/// A submission that already passed validation; `time` is rounded.
#[derive(Clone, Debug, PartialEq)]
pub struct ScoreSubmission {
    pub stage: i64,
    pub name: String,
    pub time: f64,
}

/// How many rows a stage keeps and how a new time competes for them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetentionPolicy {
    SingleBest,
    TopK(usize),
}

impl RetentionPolicy {
    pub fn capacity(self) -> usize {
        match self {
            Self::SingleBest => 1,
            Self::TopK(k) => k,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitReason {
    FirstRecord,
    NewWorldRecord,
    NotBetter,
    InTop(usize),
    NotInTop(usize),
}

impl fmt::Display for SubmitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FirstRecord => f.write_str("first_record"),
            Self::NewWorldRecord => f.write_str("new_world_record"),
            Self::NotBetter => f.write_str("not_better"),
            Self::InTop(k) => write!(f, "top{k}"),
            Self::NotInTop(k) => write!(f, "not_in_top{k}"),
        }
    }
}

impl Serialize for SubmitReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SubmitOutcome {
    pub updated: bool,
    pub reason: SubmitReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct PeerPosition {
    pub x: f64,
    pub z: f64,
    pub yaw: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Peer {
    pub id: String,
    pub name: String,
    pub avatar: String,
    pub stage: Option<i64>,
    pub pos: Option<PeerPosition>,
    #[serde(skip)]
    pub room_id: String,
}

/// Fields a client supplies when joining a room.
#[derive(Clone, Debug, PartialEq)]
pub struct PeerProfile {
    pub name: String,
    pub avatar: String,
    pub stage: Option<i64>,
}

/// Partial peer metadata; `None` leaves the stored value untouched.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PeerUpdate {
    pub name: Option<String>,
    pub avatar: Option<String>,
    pub stage: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChatEntry {
    pub id: String,
    pub name: String,
    pub text: String,
    pub ts: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    Welcome {
        id: String,
        peers: Vec<Peer>,
        history: Vec<ChatEntry>,
    },
    RoomFull,
    PeerJoined {
        peer: Peer,
    },
    PeerUpdated {
        peer: Peer,
    },
    PeerLeft {
        id: String,
    },
    Signal {
        from: String,
        signal: Value,
    },
    Chat(ChatEntry),
    Position {
        id: String,
        pos: PeerPosition,
        stage: Option<i64>,
    },
}
