//! HTTP adapter.
//!
//! An `axum` router served directly over the multiplexer's HTTP queue.

mod routes;

pub use routes::{parse_value, parse_values, router};

use crate::adapters::{AdapterState, Translator};
use crate::core::error::{BasaltError, BasaltResult};
use crate::net::MuxListener;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::watch;

/// HTTP server.
pub struct HttpServer {
    translator: Arc<Translator>,
    state: RwLock<AdapterState>,
}

impl HttpServer {
    pub fn new(translator: Arc<Translator>) -> Self {
        Self {
            translator,
            state: RwLock::new(AdapterState::Created),
        }
    }

    /// Current state.
    pub fn state(&self) -> AdapterState {
        *self.state.read()
    }

    /// Serve requests from `listener` until shutdown is signalled.
    ///
    /// In-flight requests are allowed to finish.
    pub async fn serve(
        self: Arc<Self>,
        listener: MuxListener,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> BasaltResult<()> {
        let app = router(Arc::clone(&self.translator));
        *self.state.write() = AdapterState::Running;
        tracing::info!(addr = %listener.local_addr(), "http server accepting");

        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.wait_for(|stop| *stop).await;
            })
            .await
            .map_err(|e| BasaltError::internal(format!("http server failed: {}", e)));

        *self.state.write() = AdapterState::Stopped;
        tracing::info!("http server stopped");
        result
    }
}
