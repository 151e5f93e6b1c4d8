pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_DB_PATH: &str = "maze_records.db";

pub const MIN_STAGE: i64 = 1;
pub const DEFAULT_MAX_STAGE: i64 = 3;
pub const DEFAULT_TOP_K: usize = 3;

pub const MIN_NAME_LEN: usize = 2;
pub const MAX_NAME_LEN: usize = 32;

pub const DEFAULT_ROOM_ID: &str = "maze";
pub const DEFAULT_PEER_NAME: &str = "Player";
pub const DEFAULT_ROOM_CAPACITY: usize = 3;
pub const DEFAULT_CHAT_HISTORY: usize = 60;
pub const MAX_CHAT_LEN: usize = 500;
pub const PEER_ID_LEN: usize = 8;

pub const OUTBOUND_QUEUE_SIZE: usize = 256;
