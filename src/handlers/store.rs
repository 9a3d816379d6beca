use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;

use super::{CommandHandler, HandlerResult, wrong_arity};
use crate::redis::{Command, Reply};

/// In-memory key/value store answering GET and SET.
///
/// Register one instance under both names; the handler dispatches on the
/// command name itself.
#[derive(Default)]
pub struct MockStore {
    data: RwLock<HashMap<String, Bytes>>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Bytes>,
    {
        Self {
            data: RwLock::new(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }

    pub async fn get(&self, key: &str) -> Option<Bytes> {
        self.data.read().await.get(key).cloned()
    }

    pub async fn set(&self, key: String, value: Bytes) {
        self.data.write().await.insert(key, value);
    }

    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }
}

#[async_trait]
impl CommandHandler for MockStore {
    async fn handle(&self, command: &Command) -> HandlerResult {
        let name = command.name();
        let reply = match name.as_str() {
            "GET" => {
                if command.arg_count() != 2 {
                    return Ok(wrong_arity(&name));
                }
                Reply::Bulk(self.get(&command.get_str(1)).await)
            }
            "SET" => {
                if command.arg_count() != 3 {
                    return Ok(wrong_arity(&name));
                }
                let key = command.get_str(1);
                let value = command.get(2).cloned().unwrap_or_default();
                tracing::debug!("SET {} ({} bytes)", key, value.len());
                self.set(key, value).await;
                Reply::Ok
            }
            other => Reply::error(format!("Command '{}' not supported", other)),
        };
        Ok(reply)
    }
}
