use axum::{Router, routing::get};
use metrics_exporter_prometheus::PrometheusHandle;

/// Routes for the metrics endpoint: `/metrics` in Prometheus text format and
/// a bare `/health` probe.
pub fn metrics_router(handle: PrometheusHandle) -> Router {
    Router::new()
        .route(
            "/metrics",
            get(move || {
                let handle = handle.clone();
                async move { handle.render() }
            }),
        )
        .route("/health", get(|| async { "OK" }))
}

pub async fn run_metrics_server(
    handle: PrometheusHandle,
    addr: &str,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Metrics server listening on {}", listener.local_addr()?);
    axum::serve(listener, metrics_router(handle)).await?;
    Ok(())
}
