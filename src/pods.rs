use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::handlers::{PodDirectory, PodError};

/// A monitored master as sentinels describe it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RedisPod {
    pub name: String,
    pub ip: String,
    pub port: String,
    pub quorum: String,
    pub auth_pass: String,
    pub parallel_syncs: i64,
}

impl RedisPod {
    /// Field/value pairs in the order SENTINEL MASTER reports them.
    pub fn master_fields(&self) -> Vec<String> {
        vec![
            "name".to_string(),
            self.name.clone(),
            "ip".to_string(),
            self.ip.clone(),
            "port".to_string(),
            self.port.clone(),
            "quorum".to_string(),
            self.quorum.clone(),
            "auth-pass".to_string(),
            self.auth_pass.clone(),
            "parallel-syncs".to_string(),
            self.parallel_syncs.to_string(),
        ]
    }
}

/// In-memory pod table used in mock mode.
#[derive(Debug, Default)]
pub struct PodRegistry {
    pods: RwLock<HashMap<String, RedisPod>>,
}

impl PodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, name: &str) -> Option<RedisPod> {
        self.pods.read().await.get(name).cloned()
    }

    pub async fn len(&self) -> usize {
        self.pods.read().await.len()
    }
}

#[async_trait]
impl PodDirectory for PodRegistry {
    async fn master(&self, name: &str) -> Result<Option<Vec<String>>, PodError> {
        Ok(self.get(name).await.map(|pod| pod.master_fields()))
    }

    async fn master_addr(&self, name: &str) -> Result<Option<(String, String)>, PodError> {
        Ok(self.get(name).await.map(|pod| (pod.ip, pod.port)))
    }

    async fn monitor(&self, pod: RedisPod) -> Result<(), PodError> {
        tracing::info!(
            "adding pod '{}' at {}:{} with quorum {}",
            pod.name,
            pod.ip,
            pod.port,
            pod.quorum
        );
        self.pods.write().await.insert(pod.name.clone(), pod);
        Ok(())
    }

    async fn set_option(&self, name: &str, option: &str, value: &str) -> Result<(), PodError> {
        let mut pods = self.pods.write().await;
        let pod = pods.get_mut(name).ok_or(PodError::NoSuchPod)?;
        match option.to_ascii_lowercase().as_str() {
            "auth-pass" => pod.auth_pass = value.to_string(),
            "parallel-syncs" => {
                let syncs = value
                    .parse::<i32>()
                    .map_err(|_| PodError::InvalidParallelSyncs)?;
                pod.parallel_syncs = i64::from(syncs);
            }
            _ => return Err(PodError::InvalidSetting(option.to_string())),
        }
        tracing::debug!("pod '{}' updated: {}", name, option);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::{CommandHandler, SentinelHandler};
    use crate::redis::{Command, Reply};
    use std::sync::Arc;

    async fn sentinel(handler: &SentinelHandler, args: &[&str]) -> Reply {
        handler
            .handle(&Command::from_args(args.iter().copied()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn monitor_then_query() {
        let pods = Arc::new(PodRegistry::new());
        let handler = SentinelHandler::new(pods.clone());

        assert_eq!(
            sentinel(&handler, &["SENTINEL", "MONITOR", "pod1", "10.0.0.5", "6380", "2"]).await,
            Reply::Ok
        );
        assert_eq!(pods.len().await, 1);

        assert_eq!(
            sentinel(&handler, &["SENTINEL", "get-master-addr-by-name", "pod1"]).await,
            Reply::bulk_strings(["10.0.0.5", "6380"])
        );
        assert_eq!(
            sentinel(&handler, &["SENTINEL", "MASTER", "pod1"]).await,
            Reply::bulk_strings([
                "name",
                "pod1",
                "ip",
                "10.0.0.5",
                "port",
                "6380",
                "quorum",
                "2",
                "auth-pass",
                "",
                "parallel-syncs",
                "0",
            ])
        );
        assert_eq!(
            sentinel(&handler, &["SENTINEL", "MASTER", "missing"]).await,
            Reply::nil()
        );
    }

    #[tokio::test]
    async fn set_updates_known_settings() {
        let pods = Arc::new(PodRegistry::new());
        let handler = SentinelHandler::new(pods.clone());
        sentinel(&handler, &["SENTINEL", "MONITOR", "pod1", "10.0.0.5", "6380", "2"]).await;

        assert_eq!(
            sentinel(&handler, &["SENTINEL", "SET", "pod1", "auth-pass", "s3cret"]).await,
            Reply::Ok
        );
        assert_eq!(
            sentinel(&handler, &["SENTINEL", "SET", "pod1", "PARALLEL-SYNCS", "4"]).await,
            Reply::Ok
        );

        let pod = pods.get("pod1").await.unwrap();
        assert_eq!(pod.auth_pass, "s3cret");
        assert_eq!(pod.parallel_syncs, 4);
    }

    #[tokio::test]
    async fn set_reports_bad_input() {
        let pods = Arc::new(PodRegistry::new());
        let handler = SentinelHandler::new(pods.clone());

        assert_eq!(
            sentinel(&handler, &["SENTINEL", "SET", "ghost", "auth-pass", "x"]).await,
            Reply::error("NOSUCHPOD Pod doesn't exist")
        );

        sentinel(&handler, &["SENTINEL", "MONITOR", "pod1", "10.0.0.5", "6380", "2"]).await;
        assert_eq!(
            sentinel(&handler, &["SENTINEL", "SET", "pod1", "parallel-syncs", "many"]).await,
            Reply::error("INVALIDVALUE value given for parallel-syncs must be an integer")
        );
        assert_eq!(
            sentinel(&handler, &["SENTINEL", "SET", "pod1", "down-after", "10"]).await,
            Reply::error("down-after is not a valid pod setting")
        );
    }
}
