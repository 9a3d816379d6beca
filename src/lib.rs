//! Palisade - a Redis Sentinel front end
//!
//! Speaks the Redis wire protocol to clients and gates every connection behind
//! token authentication. Depending on the configured mode it either emulates a
//! sentinel in memory, or forwards pod lookups to a set of managing sentinels,
//! optionally mapping pod names onto shard pods first.

pub mod app_state;
pub mod config;
pub mod handlers;
pub mod http_server;
pub mod metrics;
pub mod pods;
pub mod proxy;
pub mod redis;
pub mod sentinel_client;
pub mod server;
pub mod session;
pub mod shard_manager;

pub use app_state::AppState;
pub use config::Cfg;
pub use session::{ConnectionSession, SessionLimits, SessionState};
