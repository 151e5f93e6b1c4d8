use serde_json::{Map, Value};

use crate::error::ProtocolError;
use crate::server_utils::{normalize_room_id, sanitize_peer_name};
use crate::types::{PeerPosition, PeerProfile, PeerUpdate};

#[derive(Clone, Debug, PartialEq)]
pub enum ClientMessage {
    Join {
        room: String,
        profile: PeerProfile,
    },
    Signal {
        to: String,
        signal: Value,
    },
    Chat {
        text: String,
    },
    Position {
        pos: PeerPosition,
        stage: Option<i64>,
    },
    Update(PeerUpdate),
}

pub fn parse_client_message(raw: &str) -> Result<ClientMessage, ProtocolError> {
    let value: Value = serde_json::from_str(raw).map_err(|_| ProtocolError::MalformedJson)?;
    let object = value.as_object().ok_or(ProtocolError::MalformedJson)?;
    let message_type = object
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingType)?;

    match message_type {
        "join" => {
            let room = loose_string(object.get("room"));
            let name = loose_string(object.get("name"));
            Ok(ClientMessage::Join {
                room: normalize_room_id(room.as_deref()),
                profile: PeerProfile {
                    name: sanitize_peer_name(name.as_deref().unwrap_or_default()),
                    avatar: object
                        .get("avatar")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    stage: parse_stage(object.get("stage")),
                },
            })
        }
        "signal" => {
            let to = object
                .get("to")
                .and_then(Value::as_str)
                .ok_or(ProtocolError::InvalidField("to"))?
                .to_string();
            let signal = object.get("signal").cloned().unwrap_or(Value::Null);
            Ok(ClientMessage::Signal { to, signal })
        }
        "chat" => Ok(ClientMessage::Chat {
            text: loose_string(object.get("text")).unwrap_or_default(),
        }),
        "position" => {
            let pos = object
                .get("pos")
                .and_then(Value::as_object)
                .and_then(parse_position)
                .ok_or(ProtocolError::InvalidField("pos"))?;
            Ok(ClientMessage::Position {
                pos,
                stage: parse_stage(object.get("stage")),
            })
        }
        "update" => Ok(ClientMessage::Update(PeerUpdate {
            name: loose_string(object.get("name"))
                .filter(|name| !name.trim().is_empty())
                .map(|name| sanitize_peer_name(&name)),
            avatar: object
                .get("avatar")
                .and_then(Value::as_str)
                .map(str::to_string),
            stage: parse_stage(object.get("stage")),
        })),
        other => Err(ProtocolError::UnknownType(other.to_string())),
    }
}

/// Non-empty strings and numbers, coerced to text; anything else is absent.
fn loose_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn parse_stage(value: Option<&Value>) -> Option<i64> {
    let value = value?;
    if let Some(stage) = value.as_i64() {
        return Some(stage);
    }
    let number = value.as_f64()?;
    if number.is_finite() && number.fract() == 0.0 && number.abs() < i64::MAX as f64 {
        return Some(number as i64);
    }
    None
}

fn parse_position(object: &Map<String, Value>) -> Option<PeerPosition> {
    let finite = |key: &str| object.get(key).and_then(Value::as_f64).filter(|v| v.is_finite());
    let yaw = match object.get("yaw") {
        None | Some(Value::Null) => 0.0,
        Some(_) => finite("yaw")?,
    };
    Some(PeerPosition {
        x: finite("x")?,
        z: finite("z")?,
        yaw,
    })
}
