//! Per-connection request loop and authentication state machine.
//!
//! ```text
//! Unauthenticated --AUTH ok--------------------> Authenticated
//! Unauthenticated --AUTH bad (below limit)-----> Unauthenticated  -INVALIDAUTH
//! Unauthenticated --AUTH bad (at limit)--------> Terminated       -GOAWAY
//! Unauthenticated --other (below limit)--------> Unauthenticated  -NOVALIDAUTH
//! Unauthenticated --other (at limit)-----------> Terminated       -GOAWAY
//! any             --QUIT-----------------------> Terminated       (no reply)
//! ```
//!
//! Authenticated sessions dispatch through the registry. AUTH keeps going
//! through the auth path there too: success resets the failure counter and
//! failures count toward the same GOAWAY limit, but never revoke access.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::handlers::{CommandRegistry, HandlerError};
use crate::metrics::{Metrics, Timer};
use crate::redis::{Command, DecodeError, ProtocolDecoder, Reply, ResponseEncoder};

const INVALID_AUTH: &str = "INVALIDAUTH Need to auth first";
const NO_VALID_AUTH: &str = "NOVALIDAUTH Need to auth first";
const AUTH_UNSUPPORTED: &str = "AUTH Command not supported";
const GOAWAY_AUTH: &str = "GOAWAY Too many failed auth attempts";
const GOAWAY_UNAUTHENTICATED: &str = "GOAWAY Too many unauthenticated commands";

/// What to do with a command that has no registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnsupportedCommandPolicy {
    /// Send an error reply and keep serving.
    #[default]
    Reply,
    /// Send an error reply and close the connection.
    Disconnect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLimits {
    pub max_auth_failures: u32,
    pub max_unauthenticated_attempts: u32,
    pub idle_timeout: Option<Duration>,
    pub unsupported_command: UnsupportedCommandPolicy,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            max_auth_failures: 3,
            max_unauthenticated_attempts: 3,
            idle_timeout: None,
            unsupported_command: UnsupportedCommandPolicy::Reply,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("write failed: {0}")]
    Stream(#[from] io::Error),
    #[error("handler failed: {0}")]
    Handler(String),
}

pub struct ConnectionSession<R, W> {
    decoder: ProtocolDecoder<R>,
    encoder: ResponseEncoder<W>,
    registry: Arc<CommandRegistry>,
    limits: SessionLimits,
    metrics: Metrics,
    peer: String,
    state: SessionState,
    auth_failures: u32,
    unauthenticated_attempts: u32,
}

impl<R, W> ConnectionSession<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(
        reader: R,
        writer: W,
        registry: Arc<CommandRegistry>,
        limits: SessionLimits,
        metrics: Metrics,
    ) -> Self {
        Self {
            decoder: ProtocolDecoder::with_read_timeout(reader, limits.idle_timeout),
            encoder: ResponseEncoder::new(writer),
            registry,
            limits,
            metrics,
            peer: "unknown".to_string(),
            state: SessionState::Unauthenticated,
            auth_failures: 0,
            unauthenticated_attempts: 0,
        }
    }

    /// Label used in log lines, usually the remote address.
    pub fn with_peer(mut self, peer: impl Into<String>) -> Self {
        self.peer = peer.into();
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn auth_failures(&self) -> u32 {
        self.auth_failures
    }

    pub fn unauthenticated_attempts(&self) -> u32 {
        self.unauthenticated_attempts
    }

    /// Serve the connection until it closes. Stream errors end the session
    /// silently; write errors are returned.
    pub async fn run(&mut self) -> Result<(), SessionError> {
        let result = self.serve().await;
        self.state = SessionState::Terminated;
        result
    }

    async fn serve(&mut self) -> Result<(), SessionError> {
        loop {
            let command = match self.decoder.next_command().await {
                Ok(Some(command)) => command,
                // Null array: nothing to answer.
                Ok(None) => continue,
                Err(DecodeError::Protocol(e)) => {
                    self.metrics.record_error("protocol");
                    tracing::debug!("[{}] {}", self.peer, e);
                    self.encoder.send_error(&format!("ERR {}", e)).await?;
                    continue;
                }
                Err(DecodeError::Stream(e)) => {
                    match e.kind() {
                        io::ErrorKind::UnexpectedEof => {
                            tracing::debug!("[{}] connection closed by client", self.peer)
                        }
                        io::ErrorKind::TimedOut => {
                            tracing::info!("[{}] idle timeout, closing", self.peer)
                        }
                        _ => tracing::debug!("[{}] read failed: {}", self.peer, e),
                    }
                    return Ok(());
                }
            };

            if self.process(command).await? == Flow::Close {
                return Ok(());
            }
        }
    }

    /// Apply one command to the state machine and write its reply, if any.
    pub async fn process(&mut self, command: Command) -> Result<Flow, SessionError> {
        let timer = Timer::start();
        let name = command.name();

        let flow = if name == "QUIT" {
            tracing::debug!("[{}] QUIT", self.peer);
            self.state = SessionState::Terminated;
            Flow::Close
        } else if name == "AUTH" {
            self.authenticate(&command).await?
        } else {
            match self.state {
                SessionState::Unauthenticated => self.reject_unauthenticated(&name).await?,
                SessionState::Authenticated => self.dispatch(&name, &command).await?,
                SessionState::Terminated => Flow::Close,
            }
        };

        self.metrics.record_command(&name, timer.start);
        Ok(flow)
    }

    async fn authenticate(&mut self, command: &Command) -> Result<Flow, SessionError> {
        let (outcome, failure_reply) = match self.registry.lookup("AUTH") {
            Some(handler) => (handler.handle(command).await, INVALID_AUTH),
            None => {
                tracing::warn!("[{}] AUTH received but no AUTH handler registered", self.peer);
                (Err(HandlerError::InvalidCredential), AUTH_UNSUPPORTED)
            }
        };

        match outcome {
            Ok(_) => {
                self.metrics.record_auth(true);
                self.auth_failures = 0;
                if self.state != SessionState::Authenticated {
                    tracing::info!("[{}] client authorized", self.peer);
                }
                self.state = SessionState::Authenticated;
                self.encoder.send_ok().await?;
                Ok(Flow::Continue)
            }
            Err(HandlerError::InvalidCredential) => {
                self.metrics.record_auth(false);
                self.auth_failures += 1;
                if self.auth_failures >= self.limits.max_auth_failures {
                    tracing::warn!(
                        "[{}] {} failed auth attempts, disconnecting",
                        self.peer,
                        self.auth_failures
                    );
                    return self.goaway(GOAWAY_AUTH).await;
                }
                tracing::debug!(
                    "[{}] auth failed ({}/{})",
                    self.peer,
                    self.auth_failures,
                    self.limits.max_auth_failures
                );
                self.encoder.send_error(failure_reply).await?;
                Ok(Flow::Continue)
            }
            Err(HandlerError::Fatal(msg)) => Err(SessionError::Handler(msg)),
        }
    }

    async fn reject_unauthenticated(&mut self, name: &str) -> Result<Flow, SessionError> {
        self.metrics.record_unauthenticated();
        self.unauthenticated_attempts += 1;
        if self.unauthenticated_attempts >= self.limits.max_unauthenticated_attempts {
            tracing::warn!(
                "[{}] {} commands without auth, disconnecting",
                self.peer,
                self.unauthenticated_attempts
            );
            return self.goaway(GOAWAY_UNAUTHENTICATED).await;
        }
        tracing::debug!("[{}] {} rejected before auth", self.peer, name);
        self.encoder.send_error(NO_VALID_AUTH).await?;
        Ok(Flow::Continue)
    }

    async fn dispatch(&mut self, name: &str, command: &Command) -> Result<Flow, SessionError> {
        let Some(handler) = self.registry.lookup(name) else {
            return self.unsupported(name, command).await;
        };

        match handler.handle(command).await {
            Ok(reply) => {
                self.encoder.send_reply(&reply).await?;
                Ok(Flow::Continue)
            }
            Err(HandlerError::InvalidCredential) => {
                self.encoder.send_error(INVALID_AUTH).await?;
                Ok(Flow::Continue)
            }
            Err(HandlerError::Fatal(msg)) => Err(SessionError::Handler(msg)),
        }
    }

    async fn unsupported(&mut self, name: &str, command: &Command) -> Result<Flow, SessionError> {
        self.metrics.record_unsupported();
        let shown = if command.get(1).is_some() {
            format!("{} {}", name, command.get_str(1))
        } else {
            name.to_string()
        };
        tracing::warn!(
            "[{}] unsupported command '{}' ({} args)",
            self.peer,
            shown,
            command.arg_count()
        );

        self.encoder
            .send_reply(&Reply::error(format!("Command '{}' not supported", shown)))
            .await?;

        match self.limits.unsupported_command {
            UnsupportedCommandPolicy::Reply => Ok(Flow::Continue),
            UnsupportedCommandPolicy::Disconnect => {
                self.state = SessionState::Terminated;
                Ok(Flow::Close)
            }
        }
    }

    async fn goaway(&mut self, message: &str) -> Result<Flow, SessionError> {
        self.metrics.record_goaway();
        self.state = SessionState::Terminated;
        self.encoder.send_error(message).await?;
        Ok(Flow::Close)
    }
}
