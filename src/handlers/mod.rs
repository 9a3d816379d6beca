//! Command handlers and the name -> handler registry.
//!
//! The registry is assembled once at startup (see `AppState`) and only read
//! afterwards. Handlers own whatever shared state they touch and guard it with
//! their own locks.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::redis::{Command, Reply};

pub mod auth;
pub mod constellation;
pub mod sentinel;
pub mod store;

pub use auth::TokenAuth;
pub use constellation::{Constellation, SentinelSet};
pub use sentinel::{PodDirectory, PodError, SentinelHandler};
pub use store::MockStore;

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The presented AUTH credential was rejected.
    #[error("invalid credential")]
    InvalidCredential,
    /// The handler cannot produce a reply; the connection must be closed.
    #[error("{0}")]
    Fatal(String),
}

pub type HandlerResult = Result<Reply, HandlerError>;

/// Produces exactly one reply per command.
///
/// Handlers run inside the connection's own task and may await backend I/O.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, command: &Command) -> HandlerResult;
}

/// Standard arity error, in the wording Redis uses.
pub fn wrong_arity(command: &str) -> Reply {
    Reply::error(format!(
        "ERR wrong number of arguments for '{}' command",
        command.to_ascii_lowercase()
    ))
}

pub struct CommandRegistry {
    handlers: HashMap<String, Arc<dyn CommandHandler>>,
}

impl CommandRegistry {
    pub fn builder() -> CommandRegistryBuilder {
        CommandRegistryBuilder::default()
    }

    /// Case-insensitive lookup.
    pub fn lookup(&self, name: &str) -> Option<Arc<dyn CommandHandler>> {
        self.handlers.get(&name.to_ascii_uppercase()).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(&name.to_ascii_uppercase())
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }
}

#[derive(Default)]
pub struct CommandRegistryBuilder {
    handlers: HashMap<String, Arc<dyn CommandHandler>>,
}

impl CommandRegistryBuilder {
    /// Register `handler` under `name`. A later registration for the same
    /// name replaces the earlier one.
    pub fn register(mut self, name: &str, handler: Arc<dyn CommandHandler>) -> Self {
        self.handlers.insert(name.to_ascii_uppercase(), handler);
        self
    }

    pub fn build(self) -> CommandRegistry {
        CommandRegistry {
            handlers: self.handlers,
        }
    }
}
