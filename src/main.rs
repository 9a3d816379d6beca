use std::sync::Arc;

use gumdrop::Options;
use miette::{Context, Result};

use palisade::config::{Mode, Overrides};
use palisade::metrics::init_metrics_exporter;
use palisade::{AppState, Cfg, http_server, server};

#[derive(Options, Debug)]
struct Args {
    #[options(help = "Print help message")]
    help: bool,

    #[options(
        help = "Path to the configuration file",
        short = "c",
        long = "config",
        default = "palisade.toml"
    )]
    config: String,

    #[options(help = "The port to listen on", short = "p", long = "port", meta = "PORT")]
    port: Option<u16>,

    #[options(
        help = "An auth token clients may present",
        short = "a",
        long = "authtoken",
        meta = "TOKEN"
    )]
    authtoken: Option<String>,

    #[options(
        help = "Managing sentinel address, repeatable",
        short = "s",
        long = "sentineladdr",
        meta = "HOST:PORT"
    )]
    sentineladdr: Vec<String>,

    #[options(
        help = "mock | auth-proxy | sharding-proxy",
        short = "m",
        long = "mode",
        meta = "MODE"
    )]
    mode: Option<Mode>,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            port: self.port,
            auth_token: self.authtoken.clone(),
            sentinels: self.sentineladdr.clone(),
            mode: self.mode,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // initialize tracing
    tracing_subscriber::fmt::init();

    let args = Args::parse_args_default_or_exit();
    run_server(&args).await
}

async fn run_server(args: &Args) -> Result<()> {
    let mut cfg = Cfg::load(&args.config).wrap_err("loading config")?;
    cfg.apply_overrides(args.overrides())
        .wrap_err("applying command line options")?;

    // The recorder has to exist before any metric handle is created.
    let prometheus_handle = if cfg.metrics_enabled() {
        Some(init_metrics_exporter().wrap_err("initializing metrics exporter")?)
    } else {
        None
    };

    let addr = cfg.addr.clone();
    let metrics_addr = cfg.metrics_addr().to_string();
    tracing::info!(
        "starting in {:?} mode with {} managing sentinel(s)",
        cfg.mode,
        cfg.managing_sentinels.len()
    );
    let shared_state = Arc::new(AppState::new(cfg));

    if let Some(handle) = prometheus_handle {
        tokio::spawn(async move {
            if let Err(e) = http_server::run_metrics_server(handle, &metrics_addr).await {
                tracing::error!("Failed to run metrics server: {}", e);
            }
        });
    }

    if let Err(e) = server::run_redis_server(shared_state, &addr).await {
        return Err(miette::miette!("Failed to run server: {}", e));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_short_flags() {
        let args = Args::parse_args_default(&[
            "-p", "26400", "-a", "tok", "-s", "10.0.0.1:26379", "-s", "10.0.0.2:26379", "-m",
            "auth-proxy",
        ])
        .unwrap();

        assert_eq!(args.config, "palisade.toml");
        let overrides = args.overrides();
        assert_eq!(overrides.port, Some(26400));
        assert_eq!(overrides.auth_token.as_deref(), Some("tok"));
        assert_eq!(overrides.sentinels, vec!["10.0.0.1:26379", "10.0.0.2:26379"]);
        assert_eq!(overrides.mode, Some(Mode::AuthProxy));
    }

    #[test]
    fn rejects_unknown_mode() {
        assert!(Args::parse_args_default(&["--mode", "cluster"]).is_err());
    }
}
