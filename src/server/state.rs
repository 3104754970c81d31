//! Shared, read-only state handed to every request.

use std::sync::Arc;
use std::time::Duration;

use crate::backend::StreamingBackend;
use crate::config::{Config, ServerConfig};
use crate::flow::FlowStore;
use crate::shutdown::ShutdownCoordinator;

/// Application state shared by the router.
#[derive(Clone)]
pub struct AppState {
    pub backend: Arc<dyn StreamingBackend>,
    pub flows: Arc<dyn FlowStore>,
    pub server: Arc<ServerConfig>,
    /// Upper bound for opening the upstream stream.
    pub backend_timeout: Duration,
    /// Upper bound for the gap between two upstream fragments.
    pub idle_timeout: Duration,
    /// Admission of streams and shutdown signal.
    pub shutdown: ShutdownCoordinator,
}

impl AppState {
    pub fn new(
        config: &Config,
        backend: Arc<dyn StreamingBackend>,
        flows: Arc<dyn FlowStore>,
        shutdown: ShutdownCoordinator,
    ) -> Self {
        Self {
            backend,
            flows,
            server: Arc::new(config.server.clone()),
            backend_timeout: config.backend.timeout(),
            idle_timeout: config.backend.idle_timeout(),
            shutdown,
        }
    }
}
