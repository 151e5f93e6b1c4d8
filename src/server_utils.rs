use chrono::Utc;
use rand::Rng;

use crate::constants::{
    DEFAULT_PEER_NAME, DEFAULT_ROOM_ID, MAX_CHAT_LEN, MAX_NAME_LEN, PEER_ID_LEN,
};

const PEER_ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

pub fn sanitize_peer_name(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return DEFAULT_PEER_NAME.to_string();
    }
    trimmed.chars().take(MAX_NAME_LEN).collect()
}

pub fn normalize_room_id(raw: Option<&str>) -> String {
    match raw.map(str::trim) {
        Some(value) if !value.is_empty() => value.to_string(),
        _ => DEFAULT_ROOM_ID.to_string(),
    }
}

/// Cuts chat text to the relay limit; `None` when nothing printable is left.
pub fn clamp_chat_text(raw: &str) -> Option<String> {
    let text: String = raw.chars().take(MAX_CHAT_LEN).collect();
    if text.trim().is_empty() {
        return None;
    }
    Some(text)
}

pub fn round_time_hundredths(seconds: f64) -> f64 {
    (seconds * 100.0).round() / 100.0
}

pub fn make_peer_id<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..PEER_ID_LEN)
        .map(|_| PEER_ID_ALPHABET[rng.random_range(0..PEER_ID_ALPHABET.len())] as char)
        .collect()
}

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_peer_name_applies_trim_default_and_max_len() {
        assert_eq!(sanitize_peer_name(""), "Player");
        assert_eq!(sanitize_peer_name("   "), "Player");
        assert_eq!(sanitize_peer_name(" Alice "), "Alice");
        let long = "x".repeat(40);
        assert_eq!(sanitize_peer_name(&long).chars().count(), 32);
    }

    #[test]
    fn room_id_defaults_to_maze() {
        assert_eq!(normalize_room_id(None), "maze");
        assert_eq!(normalize_room_id(Some("  ")), "maze");
        assert_eq!(normalize_room_id(Some(" lobby-2 ")), "lobby-2");
    }

    #[test]
    fn chat_text_is_clamped_and_blank_text_dropped() {
        assert_eq!(clamp_chat_text(""), None);
        assert_eq!(clamp_chat_text(" \n\t "), None);
        assert_eq!(clamp_chat_text("hi").as_deref(), Some("hi"));
        let long = "é".repeat(600);
        assert_eq!(clamp_chat_text(&long).map(|t| t.chars().count()), Some(500));
    }

    #[test]
    fn times_round_to_two_decimals() {
        assert_eq!(round_time_hundredths(12.345_6), 12.35);
        assert_eq!(round_time_hundredths(9.87), 9.87);
        assert_eq!(round_time_hundredths(0.004), 0.0);
    }

    #[test]
    fn peer_ids_are_lowercase_alphanumeric() {
        let mut rng = rand::rng();
        let id = make_peer_id(&mut rng);
        assert_eq!(id.len(), 8);
        assert!(id
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }
}
