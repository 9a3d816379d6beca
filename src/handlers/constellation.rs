use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{CommandHandler, HandlerResult, wrong_arity};
use crate::redis::{Command, Reply};

/// Addresses of the backend sentinels this process fronts.
///
/// Ordered so lookups fan out in a stable order and the first positive answer
/// is deterministic.
#[derive(Debug, Default)]
pub struct SentinelSet {
    addrs: RwLock<BTreeSet<String>>,
}

impl SentinelSet {
    pub fn new<I, S>(addrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            addrs: RwLock::new(addrs.into_iter().map(Into::into).collect()),
        }
    }

    /// Returns `true` if the address was not known yet.
    pub async fn add(&self, addr: impl Into<String>) -> bool {
        self.addrs.write().await.insert(addr.into())
    }

    pub async fn contains(&self, addr: &str) -> bool {
        self.addrs.read().await.contains(addr)
    }

    pub async fn snapshot(&self) -> Vec<String> {
        self.addrs.read().await.iter().cloned().collect()
    }
}

/// `host:port` with a numeric port.
pub fn is_valid_sentinel_addr(addr: &str) -> bool {
    match addr.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    }
}

/// ADDSENTINEL and KNOWNSENTINELS.
pub struct Constellation {
    sentinels: Arc<SentinelSet>,
}

impl Constellation {
    pub fn new(sentinels: Arc<SentinelSet>) -> Self {
        Self { sentinels }
    }
}

#[async_trait]
impl CommandHandler for Constellation {
    async fn handle(&self, command: &Command) -> HandlerResult {
        let name = command.name();
        let reply = match name.as_str() {
            "ADDSENTINEL" => {
                if command.arg_count() != 2 {
                    return Ok(wrong_arity(&name));
                }
                let addr = command.get_str(1);
                if !is_valid_sentinel_addr(&addr) {
                    return Ok(Reply::error(format!(
                        "ERR invalid sentinel address '{}'",
                        addr
                    )));
                }
                if self.sentinels.add(addr.clone()).await {
                    tracing::info!("added managing sentinel {}", addr);
                }
                Reply::Ok
            }
            "KNOWNSENTINELS" => Reply::bulk_strings(self.sentinels.snapshot().await),
            other => Reply::error(format!("Command '{}' not supported", other)),
        };
        Ok(reply)
    }
}
