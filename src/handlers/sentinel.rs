//! SENTINEL subcommand dispatch.
//!
//! The handler only parses and validates arguments. Where pod data comes from
//! is decided by the [`PodDirectory`] behind it: the in-memory registry in
//! mock mode, or the backend sentinels in proxy modes.

use std::sync::Arc;

use async_trait::async_trait;

use super::{CommandHandler, HandlerResult, wrong_arity};
use crate::pods::RedisPod;
use crate::redis::{Command, Reply};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PodError {
    #[error("NOSUCHPOD Pod doesn't exist")]
    NoSuchPod,
    #[error("INVALIDVALUE value given for parallel-syncs must be an integer")]
    InvalidParallelSyncs,
    #[error("{0} is not a valid pod setting")]
    InvalidSetting(String),
    #[error("Command '{0}' not supported")]
    Unsupported(String),
    /// Lookup failed on every backend.
    #[error("ERR {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait PodDirectory: Send + Sync {
    /// Flat field/value list describing the pod. `None` when unknown.
    async fn master(&self, name: &str) -> Result<Option<Vec<String>>, PodError>;

    /// `(ip, port)` of the pod's current master. `None` when unknown.
    async fn master_addr(&self, name: &str) -> Result<Option<(String, String)>, PodError>;

    async fn monitor(&self, _pod: RedisPod) -> Result<(), PodError> {
        Err(PodError::Unsupported("MONITOR".to_string()))
    }

    async fn set_option(&self, _name: &str, _option: &str, _value: &str) -> Result<(), PodError> {
        Err(PodError::Unsupported("SET".to_string()))
    }
}

pub struct SentinelHandler {
    pods: Arc<dyn PodDirectory>,
}

impl SentinelHandler {
    pub fn new(pods: Arc<dyn PodDirectory>) -> Self {
        Self { pods }
    }

    async fn master(&self, command: &Command) -> Reply {
        if command.arg_count() != 3 {
            return wrong_arity("SENTINEL MASTER");
        }
        match self.pods.master(&command.get_str(2)).await {
            Ok(Some(fields)) => Reply::bulk_strings(fields),
            Ok(None) => Reply::nil(),
            Err(e) => Reply::error(e.to_string()),
        }
    }

    async fn master_addr(&self, command: &Command) -> Reply {
        if command.arg_count() != 3 {
            return wrong_arity("SENTINEL GET-MASTER-ADDR-BY-NAME");
        }
        match self.pods.master_addr(&command.get_str(2)).await {
            Ok(Some((ip, port))) => Reply::bulk_strings([ip, port]),
            Ok(None) => Reply::nil(),
            Err(e) => Reply::error(e.to_string()),
        }
    }

    async fn monitor(&self, command: &Command) -> Reply {
        // SENTINEL MONITOR <name> <ip> <port> <quorum>
        if command.arg_count() != 6 {
            return wrong_arity("SENTINEL MONITOR");
        }
        let port = command.get_str(4);
        if port.parse::<u16>().is_err() {
            return Reply::error(format!("ERR Invalid port '{}'", port));
        }
        let quorum = command.get_str(5);
        if !matches!(quorum.parse::<u32>(), Ok(q) if q > 0) {
            return Reply::error("ERR Quorum must be 1 or greater.");
        }

        let pod = RedisPod {
            name: command.get_str(2),
            ip: command.get_str(3),
            port,
            quorum,
            ..RedisPod::default()
        };
        match self.pods.monitor(pod).await {
            Ok(()) => Reply::Ok,
            Err(e) => Reply::error(e.to_string()),
        }
    }

    async fn set(&self, command: &Command) -> Reply {
        // SENTINEL SET <name> <option> <value>
        if command.arg_count() != 5 {
            return wrong_arity("SENTINEL SET");
        }
        let result = self
            .pods
            .set_option(
                &command.get_str(2),
                &command.get_str(3),
                &command.get_str(4),
            )
            .await;
        match result {
            Ok(()) => Reply::Ok,
            Err(e) => Reply::error(e.to_string()),
        }
    }
}

#[async_trait]
impl CommandHandler for SentinelHandler {
    async fn handle(&self, command: &Command) -> HandlerResult {
        let subcommand = command.get_str(1).to_ascii_uppercase();
        let reply = match subcommand.as_str() {
            "MASTER" => self.master(command).await,
            "GET-MASTER-ADDR-BY-NAME" => self.master_addr(command).await,
            "MONITOR" => self.monitor(command).await,
            "SET" => self.set(command).await,
            _ => {
                tracing::warn!("unsupported SENTINEL subcommand '{}'", subcommand);
                Reply::error(format!("Command '{}' not supported", subcommand))
            }
        };
        Ok(reply)
    }
}
