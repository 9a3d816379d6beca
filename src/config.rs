use std::collections::HashMap;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use config::Config;
use miette::{IntoDiagnostic, Result};

use crate::session::{SessionLimits, UnsupportedCommandPolicy};
use crate::shard_manager::ShardStrategy;

pub const DEFAULT_ADDR: &str = "0.0.0.0:26380";
pub const DEFAULT_AUTH_TOKEN: &str = "secretpass1";
pub const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:9090";

/// Which collaborators the registry is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    /// In-memory store and pod table.
    #[default]
    Mock,
    /// Authenticate clients, answer pod lookups from the managing sentinels.
    AuthProxy,
    /// Like `AuthProxy`, with pod names mapped onto shard pods.
    ShardingProxy,
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mock" => Ok(Mode::Mock),
            "auth-proxy" => Ok(Mode::AuthProxy),
            "sharding-proxy" => Ok(Mode::ShardingProxy),
            other => Err(format!(
                "unknown mode '{}' (expected mock, auth-proxy or sharding-proxy)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_auth_failures: u32,
    pub max_unauthenticated_attempts: u32,
    pub idle_timeout_secs: Option<u64>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_auth_failures: 3,
            max_unauthenticated_attempts: 3,
            idle_timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct ShardingConfig {
    pub slot_count: usize,
    pub strategy: ShardStrategy,
    pub prefix: String,
}

impl Default for ShardingConfig {
    fn default() -> Self {
        Self {
            slot_count: 4,
            strategy: ShardStrategy::Modulo,
            prefix: "shard-".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub addr: Option<String>,
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct Cfg {
    pub addr: String,
    pub mode: Mode,
    pub auth_tokens: Vec<String>,
    pub managing_sentinels: Vec<String>,
    pub limits: LimitsConfig,
    pub unsupported_command: UnsupportedCommandPolicy,
    pub backend_timeout_ms: u64,
    pub sharding: ShardingConfig,
    pub seed_data: HashMap<String, String>,
    pub metrics: Option<MetricsConfig>,

    // Short environment names (PALISADE_PORT, PALISADE_AUTH,
    // PALISADE_MANAGINGSENTINELS), folded in by `resolve`.
    port: Option<u16>,
    auth: Option<String>,
    managingsentinels: Option<Vec<String>>,
}

impl Default for Cfg {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            mode: Mode::Mock,
            auth_tokens: vec![DEFAULT_AUTH_TOKEN.to_string()],
            managing_sentinels: Vec::new(),
            limits: LimitsConfig::default(),
            unsupported_command: UnsupportedCommandPolicy::Reply,
            backend_timeout_ms: 2000,
            sharding: ShardingConfig::default(),
            seed_data: HashMap::from([("foo".to_string(), "foo".to_string())]),
            metrics: None,
            port: None,
            auth: None,
            managingsentinels: None,
        }
    }
}

/// Values given on the command line. They win over file and environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub port: Option<u16>,
    pub auth_token: Option<String>,
    pub sentinels: Vec<String>,
    pub mode: Option<Mode>,
}

impl Cfg {
    /// Load `cfg_path` if it exists, then overlay `PALISADE_*` variables.
    pub fn load(cfg_path: &str) -> Result<Self> {
        let settings = Config::builder()
            .add_source(config::File::with_name(cfg_path).required(false))
            .add_source(
                config::Environment::with_prefix("PALISADE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("auth_tokens")
                    .with_list_parse_key("managing_sentinels")
                    .with_list_parse_key("managingsentinels"),
            )
            .build()
            .into_diagnostic()?;

        let mut cfg: Cfg = settings.try_deserialize().into_diagnostic()?;
        cfg.resolve();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Fold the short environment names into the canonical fields.
    fn resolve(&mut self) {
        if let Some(port) = self.port.take() {
            self.set_port(port);
        }
        if let Some(token) = self.auth.take() {
            self.add_auth_token(token);
        }
        if let Some(sentinels) = self.managingsentinels.take() {
            self.managing_sentinels.extend(sentinels);
        }
    }

    pub fn apply_overrides(&mut self, overrides: Overrides) -> Result<()> {
        if let Some(port) = overrides.port {
            self.set_port(port);
        }
        if let Some(token) = overrides.auth_token {
            self.add_auth_token(token);
        }
        self.managing_sentinels.extend(overrides.sentinels);
        if let Some(mode) = overrides.mode {
            self.mode = mode;
        }
        self.validate()
    }

    fn set_port(&mut self, port: u16) {
        let host = match self.addr.rsplit_once(':') {
            Some((host, _)) if !host.is_empty() => host.to_string(),
            _ => "0.0.0.0".to_string(),
        };
        self.addr = format!("{}:{}", host, port);
    }

    fn add_auth_token(&mut self, token: String) {
        if !self.auth_tokens.contains(&token) {
            self.auth_tokens.push(token);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.addr.parse::<SocketAddr>().is_err() {
            return Err(miette::miette!(
                "addr '{}' is not a valid socket address",
                self.addr
            ));
        }

        if self.auth_tokens.iter().any(|t| t.is_empty()) {
            return Err(miette::miette!("auth_tokens cannot contain an empty token"));
        }

        if self.limits.max_auth_failures == 0 {
            return Err(miette::miette!(
                "limits.max_auth_failures must be greater than 0"
            ));
        }

        if self.limits.max_unauthenticated_attempts == 0 {
            return Err(miette::miette!(
                "limits.max_unauthenticated_attempts must be greater than 0"
            ));
        }

        if self.backend_timeout_ms == 0 {
            return Err(miette::miette!("backend_timeout_ms must be greater than 0"));
        }

        if self.sharding.slot_count == 0 {
            return Err(miette::miette!("sharding.slot_count must be greater than 0"));
        }

        if let Some(bad) = self
            .managing_sentinels
            .iter()
            .find(|addr| !crate::handlers::constellation::is_valid_sentinel_addr(addr))
        {
            return Err(miette::miette!(
                "managing sentinel '{}' must be host:port",
                bad
            ));
        }

        if self.mode != Mode::Mock && self.managing_sentinels.is_empty() {
            tracing::warn!(
                "running as {:?} without managing sentinels; add some with ADDSENTINEL",
                self.mode
            );
        }

        Ok(())
    }

    pub fn session_limits(&self) -> SessionLimits {
        SessionLimits {
            max_auth_failures: self.limits.max_auth_failures,
            max_unauthenticated_attempts: self.limits.max_unauthenticated_attempts,
            idle_timeout: self.limits.idle_timeout_secs.map(Duration::from_secs),
            unsupported_command: self.unsupported_command,
        }
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_millis(self.backend_timeout_ms)
    }

    pub fn metrics_enabled(&self) -> bool {
        self.metrics.as_ref().is_some_and(|m| m.enabled)
    }

    pub fn metrics_addr(&self) -> &str {
        self.metrics
            .as_ref()
            .and_then(|m| m.addr.as_deref())
            .unwrap_or(DEFAULT_METRICS_ADDR)
    }
}
