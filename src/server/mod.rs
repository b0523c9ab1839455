/// HTTP server implementation for the Bucket Store daemon.
///
/// [`Server`] owns the store handle for the lifetime of the process. [`Router`] maps
/// requests onto bucket/key operations and [`Envelope`] is the JSON shape of every
/// response.
pub mod envelope;
pub mod router;

pub use envelope::{Envelope, Payload};
pub use router::Router;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use log::{error, info};
use tokio::net::TcpListener;

use crate::config::ServerConfig;
use crate::engine::Store;
use crate::Result;

/// A bound, not yet serving daemon.
///
/// [`Server::bind`] opens the store and the listener; [`Server::run`] serves until the
/// shutdown signal fires or the listener fails, then closes the store.
pub struct Server {
    store: Arc<Store>,
    listener: TcpListener,
    config: ServerConfig,
}

impl Server {
    /// Opens the store and binds the listener on `0.0.0.0:<port>`.
    ///
    /// If binding fails the store is closed again before the error is returned.
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let store = Arc::new(Store::open(&config.db_path, config.file_mode)?);

        let listener = match TcpListener::bind(("0.0.0.0", config.port)).await {
            Ok(listener) => listener,
            Err(e) => {
                if let Err(close_err) = store.close() {
                    error!("Failed to close store after bind error: {}", close_err);
                }
                return Err(e.into());
            }
        };

        Ok(Self { store, listener, config })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn store(&self) -> Arc<Store> {
        self.store.clone()
    }

    /// Serves requests until `shutdown` completes, then closes the store exactly once.
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = Router::new(self.store.clone(), &self.config).into_app();
        info!("Bucket Store listening on {}", self.listener.local_addr()?);

        let served = axum::serve(self.listener, app)
            .with_graceful_shutdown(shutdown)
            .await;
        if let Err(e) = &served {
            error!("HTTP server failed: {}", e);
        }

        let closed = self.store.close();
        served?;
        closed
    }
}
