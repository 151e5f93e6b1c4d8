use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::constants::{
    DEFAULT_CHAT_HISTORY, DEFAULT_DB_PATH, DEFAULT_MAX_STAGE, DEFAULT_PORT, DEFAULT_ROOM_CAPACITY,
    DEFAULT_TOP_K,
};
use crate::error::ConfigError;
use crate::room_registry::RoomConfig;
use crate::types::RetentionPolicy;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum RetentionKind {
    SingleBest,
    TopK,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Leaderboard and multiplayer relay for the maze game")]
pub struct Cli {
    #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,
    #[arg(long, env = "DB_PATH", default_value = DEFAULT_DB_PATH)]
    pub db_path: PathBuf,
    #[arg(long, env = "SCORE_RETENTION", value_enum, default_value_t = RetentionKind::TopK)]
    pub retention: RetentionKind,
    /// Rows kept per stage under `top-k` retention.
    #[arg(long, env = "SCORE_TOP_K", default_value_t = DEFAULT_TOP_K)]
    pub top_k: usize,
    #[arg(long, env = "MAX_STAGE", default_value_t = DEFAULT_MAX_STAGE)]
    pub max_stage: i64,
    #[arg(long, env = "ROOM_CAPACITY", default_value_t = DEFAULT_ROOM_CAPACITY)]
    pub room_capacity: usize,
    /// Chat lines replayed to a joining peer; 0 disables history.
    #[arg(long, env = "CHAT_HISTORY", default_value_t = DEFAULT_CHAT_HISTORY)]
    pub chat_history: usize,
    #[arg(long, env = "STATIC_DIR")]
    pub static_dir: Option<PathBuf>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ServerConfig {
    pub port: u16,
    pub db_path: PathBuf,
    pub retention: RetentionPolicy,
    pub max_stage: i64,
    pub rooms: RoomConfig,
    pub static_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            retention: RetentionPolicy::TopK(DEFAULT_TOP_K),
            max_stage: DEFAULT_MAX_STAGE,
            rooms: RoomConfig::default(),
            static_dir: None,
        }
    }
}

impl TryFrom<Cli> for ServerConfig {
    type Error = ConfigError;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        if cli.max_stage < 1 {
            return Err(ConfigError::MustBePositive("max-stage"));
        }
        if cli.room_capacity == 0 {
            return Err(ConfigError::MustBePositive("room-capacity"));
        }
        let retention = match cli.retention {
            RetentionKind::SingleBest => RetentionPolicy::SingleBest,
            RetentionKind::TopK if cli.top_k == 0 => {
                return Err(ConfigError::MustBePositive("top-k"));
            }
            RetentionKind::TopK => RetentionPolicy::TopK(cli.top_k),
        };

        Ok(Self {
            port: cli.port,
            db_path: cli.db_path,
            retention,
            max_stage: cli.max_stage,
            rooms: RoomConfig {
                capacity: cli.room_capacity,
                chat_history: cli.chat_history,
            },
            static_dir: resolve_static_dir(cli.static_dir),
        })
    }
}

fn resolve_static_dir(configured: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(path) = configured {
        if path.join("index.html").is_file() {
            return Some(path);
        }
        tracing::warn!(path = %path.display(), "static dir has no index.html; ignoring");
    }

    let candidates = [PathBuf::from("client/build"), PathBuf::from("../client/build")];
    candidates
        .into_iter()
        .find(|path| path.join("index.html").is_file())
}
