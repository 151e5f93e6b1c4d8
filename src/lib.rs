pub mod app;
pub mod config;
pub mod constants;
pub mod error;
pub mod ranking_store;
pub mod room_registry;
pub mod score_api;
pub mod server_protocol;
pub mod server_utils;
pub mod session;
pub mod types;
