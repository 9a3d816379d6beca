use std::sync::Arc;

use crate::config::{Cfg, Mode};
use crate::handlers::{
    CommandRegistry, Constellation, MockStore, SentinelHandler, SentinelSet, TokenAuth,
};
use crate::metrics::Metrics;
use crate::pods::PodRegistry;
use crate::proxy::SentinelProxy;
use crate::sentinel_client::SentinelClient;
use crate::session::SessionLimits;
use crate::shard_manager::ShardSelector;

pub struct AppState {
    pub cfg: Cfg,
    pub registry: Arc<CommandRegistry>,
    pub sentinels: Arc<SentinelSet>,
    pub metrics: Metrics,
}

impl AppState {
    /// Build the command registry for the configured mode.
    pub fn new(cfg: Cfg) -> Self {
        let sentinels = Arc::new(SentinelSet::new(cfg.managing_sentinels.iter().cloned()));
        let auth = Arc::new(TokenAuth::new(cfg.auth_tokens.iter().cloned()));
        let builder = CommandRegistry::builder().register("AUTH", auth);

        let builder = match cfg.mode {
            Mode::Mock => {
                let store = Arc::new(MockStore::with_data(cfg.seed_data.clone()));
                builder
                    .register("GET", store.clone())
                    .register("SET", store)
                    .register(
                        "SENTINEL",
                        Arc::new(SentinelHandler::new(Arc::new(PodRegistry::new()))),
                    )
            }
            Mode::AuthProxy | Mode::ShardingProxy => {
                let client = SentinelClient::new(cfg.backend_timeout());
                let proxy = if cfg.mode == Mode::ShardingProxy {
                    SentinelProxy::sharded(
                        sentinels.clone(),
                        client,
                        ShardSelector::new(
                            cfg.sharding.slot_count,
                            cfg.sharding.strategy,
                            cfg.sharding.prefix.clone(),
                        ),
                    )
                } else {
                    SentinelProxy::new(sentinels.clone(), client)
                };
                let constellation = Arc::new(Constellation::new(sentinels.clone()));
                builder
                    .register("SENTINEL", Arc::new(SentinelHandler::new(Arc::new(proxy))))
                    .register("ADDSENTINEL", constellation.clone())
                    .register("KNOWNSENTINELS", constellation)
            }
        };

        let registry = builder.build();
        tracing::info!(
            "mode {:?}, commands: {}",
            cfg.mode,
            registry.names().join(", ")
        );

        Self::with_registry(cfg, Arc::new(registry), sentinels)
    }

    /// State around a caller-supplied registry.
    pub fn with_registry(
        cfg: Cfg,
        registry: Arc<CommandRegistry>,
        sentinels: Arc<SentinelSet>,
    ) -> Self {
        Self {
            cfg,
            registry,
            sentinels,
            metrics: Metrics::new(),
        }
    }

    pub fn session_limits(&self) -> SessionLimits {
        self.cfg.session_limits()
    }
}
