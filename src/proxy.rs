//! Pod lookups answered by the managing sentinels.
//!
//! Every known sentinel is asked concurrently. Answers are then taken in the
//! sentinel set's order, so the first positive answer wins deterministically.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;

use crate::handlers::{PodDirectory, PodError, SentinelSet};
use crate::metrics::Metrics;
use crate::sentinel_client::SentinelClient;
use crate::shard_manager::ShardSelector;

pub struct SentinelProxy {
    sentinels: Arc<SentinelSet>,
    client: SentinelClient,
    shards: Option<ShardSelector>,
    metrics: Metrics,
}

impl SentinelProxy {
    /// Forward pod names unchanged.
    pub fn new(sentinels: Arc<SentinelSet>, client: SentinelClient) -> Self {
        Self {
            sentinels,
            client,
            shards: None,
            metrics: Metrics::new(),
        }
    }

    /// Rewrite each pod name to its shard pod before asking the backends.
    pub fn sharded(
        sentinels: Arc<SentinelSet>,
        client: SentinelClient,
        shards: ShardSelector,
    ) -> Self {
        Self {
            shards: Some(shards),
            ..Self::new(sentinels, client)
        }
    }

    /// Backend name for a client-facing pod name.
    pub fn target(&self, name: &str) -> String {
        match &self.shards {
            Some(selector) => selector.shard_name(name),
            None => name.to_string(),
        }
    }

    fn not_found(&self, name: &str) -> PodError {
        match self.shards {
            Some(_) => PodError::Unavailable(format!("No target for '{}'", name)),
            None => PodError::Unavailable(format!("No such pod '{}'", name)),
        }
    }
}

#[async_trait]
impl PodDirectory for SentinelProxy {
    async fn master(&self, name: &str) -> Result<Option<Vec<String>>, PodError> {
        let target = self.target(name);
        let sentinels = self.sentinels.snapshot().await;
        let answers = join_all(
            sentinels
                .iter()
                .map(|addr| self.client.master(addr, &target)),
        )
        .await;

        for (addr, answer) in sentinels.iter().zip(answers) {
            match answer {
                Ok(Some(fields)) if !fields.is_empty() => return Ok(Some(fields)),
                Ok(_) => tracing::debug!("[{}] does not know pod '{}'", addr, target),
                Err(e) => {
                    self.metrics.record_error("backend");
                    tracing::warn!("[{}] SENTINEL MASTER {} failed: {}", addr, target, e);
                }
            }
        }

        // Unknown everywhere: an empty field list rather than nil, so clients
        // iterating pairs see no fields.
        Ok(Some(Vec::new()))
    }

    async fn master_addr(&self, name: &str) -> Result<Option<(String, String)>, PodError> {
        let target = self.target(name);
        let sentinels = self.sentinels.snapshot().await;
        let answers = join_all(
            sentinels
                .iter()
                .map(|addr| self.client.get_master_addr_by_name(addr, &target)),
        )
        .await;

        for (addr, answer) in sentinels.iter().zip(answers) {
            match answer {
                Ok(Some(found)) => {
                    tracing::debug!("[{}] resolved '{}' to {}:{}", addr, target, found.0, found.1);
                    return Ok(Some(found));
                }
                Ok(None) => tracing::debug!("[{}] does not know pod '{}'", addr, target),
                Err(e) => {
                    self.metrics.record_error("backend");
                    tracing::warn!(
                        "[{}] SENTINEL GET-MASTER-ADDR-BY-NAME {} failed: {}",
                        addr,
                        target,
                        e
                    );
                }
            }
        }

        Err(self.not_found(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sentinel_client::tests::spawn_mock_sentinel;
    use crate::shard_manager::ShardStrategy;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn client() -> SentinelClient {
        SentinelClient::new(Duration::from_millis(500))
    }

    async fn dead_addr() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        addr
    }

    #[tokio::test]
    async fn first_positive_answer_wins() {
        let unknown = spawn_mock_sentinel(vec![b"*-1\r\n".to_vec()]).await;
        let knows = spawn_mock_sentinel(vec![
            b"*2\r\n$8\r\n10.0.0.7\r\n$4\r\n6379\r\n".to_vec(),
        ])
        .await;
        let down = dead_addr().await;

        let set = Arc::new(SentinelSet::new([unknown, knows, down]));
        let proxy = SentinelProxy::new(set, client());

        let found = proxy.master_addr("pod1").await.unwrap();
        assert_eq!(found, Some(("10.0.0.7".to_string(), "6379".to_string())));
    }

    #[tokio::test]
    async fn unknown_everywhere_is_an_error() {
        let set = Arc::new(SentinelSet::new([dead_addr().await]));
        let proxy = SentinelProxy::new(set, client());

        let err = proxy.master_addr("pod1").await.unwrap_err();
        assert_eq!(err.to_string(), "ERR No such pod 'pod1'");

        let empty = SentinelProxy::new(Arc::new(SentinelSet::default()), client());
        assert_eq!(empty.master("pod1").await.unwrap(), Some(Vec::new()));
    }

    #[tokio::test]
    async fn sharded_lookups_use_the_shard_name() {
        let selector = ShardSelector::new(4, ShardStrategy::Modulo, "shard-");
        let expected = selector.shard_name("pod1");

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let seen = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = vec![0; 1024];
            let n = stream.read(&mut request).await.unwrap();
            stream
                .write_all(b"*2\r\n$8\r\n10.0.0.9\r\n$4\r\n6390\r\n")
                .await
                .unwrap();
            String::from_utf8_lossy(&request[..n]).into_owned()
        });

        let proxy = SentinelProxy::sharded(Arc::new(SentinelSet::new([addr])), client(), selector);
        assert_eq!(proxy.target("pod1"), expected);

        let found = proxy.master_addr("pod1").await.unwrap();
        assert_eq!(found, Some(("10.0.0.9".to_string(), "6390".to_string())));

        let request = seen.await.unwrap();
        assert!(request.contains(&expected), "backend saw {:?}", request);

        let missing = SentinelProxy::sharded(
            Arc::new(SentinelSet::default()),
            client(),
            ShardSelector::new(4, ShardStrategy::Modulo, "shard-"),
        );
        assert_eq!(
            missing.master_addr("pod1").await.unwrap_err().to_string(),
            "ERR No target for 'pod1'"
        );
    }
}
