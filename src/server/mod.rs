//! HTTP surface of the relay.

mod handler;
mod routes;
mod state;

pub use handler::{health, list_flows, stream_chat};
pub use routes::router;
pub use state::AppState;

use tokio::net::TcpListener;

use crate::error::{RelayError, Result};

/// Bind the relay's listening socket.
pub async fn bind(addr: &str) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|e| RelayError::Bind(format!("{}: {}", addr, e)))
}

/// Serve the relay on `listener` until shutdown is signaled.
///
/// Returns once the listener is closed. Bodies still streaming are ended by
/// their relays observing the same shutdown signal.
pub async fn serve(listener: TcpListener, state: AppState) -> Result<()> {
    let addr = listener.local_addr()?;
    let shutdown = state.shutdown.clone();
    let app = router(state);

    tracing::info!(addr = %addr, "Relay listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.wait_for_shutdown().await })
        .await
        .map_err(RelayError::Io)
}
