use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::BufWriter;
use tokio::net::{TcpListener, TcpStream};

use crate::AppState;
use crate::session::ConnectionSession;

pub async fn run_redis_server(
    state: Arc<AppState>,
    addr: &str,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Palisade listening on {}", listener.local_addr()?);
    serve(listener, state).await
}

/// Accept loop. Each connection runs in its own task; a failed accept is
/// logged and the loop keeps going.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::error!("Error on accept: {}", e);
                state.metrics.record_error("connection");
                tokio::time::sleep(Duration::from_millis(50)).await;
                continue;
            }
        };
        tracing::debug!("Accepted connection from {}", addr);

        let state = state.clone();
        state.metrics.record_connection();

        tokio::spawn(async move {
            handle_connection(stream, addr, &state).await;
            state.metrics.record_connection_dropped();
        });
    }
}

async fn handle_connection(stream: TcpStream, addr: SocketAddr, state: &AppState) {
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!("set_nodelay failed for {}: {}", addr, e);
    }
    let (reader, writer) = stream.into_split();

    let mut session = ConnectionSession::new(
        reader,
        BufWriter::new(writer),
        state.registry.clone(),
        state.session_limits(),
        state.metrics.clone(),
    )
    .with_peer(addr.to_string());

    if let Err(e) = session.run().await {
        state.metrics.record_error("connection");
        tracing::debug!("Connection from {} ended with error: {}", addr, e);
    } else {
        tracing::debug!("Connection from {} closed", addr);
    }
}
