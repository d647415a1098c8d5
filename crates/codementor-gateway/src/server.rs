use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use codementor_core::indexing::IndexingService;
use codementor_core::rewrite::CodeRewriter;
use codementor_core::{ResponseOrchestrator, Services};
use codementor_llm::AnyProvider;
use tokio::sync::watch;

use crate::error::{GatewayError, Result};
use crate::router::build_router;

#[derive(Clone)]
pub(crate) struct AppState {
    pub orchestrator: Arc<ResponseOrchestrator<AnyProvider>>,
    pub rewriter: Arc<CodeRewriter<AnyProvider>>,
    pub indexing: Arc<IndexingService>,
    pub upload_dir: Arc<PathBuf>,
    pub started_at: Instant,
}

impl AppState {
    pub(crate) fn new(services: Services) -> Self {
        Self {
            orchestrator: services.orchestrator,
            rewriter: services.rewriter,
            indexing: services.indexing,
            upload_dir: Arc::new(services.upload_dir),
            started_at: Instant::now(),
        }
    }
}

pub struct GatewayServer {
    addr: SocketAddr,
    auth_token: Option<String>,
    rate_limit: u32,
    max_body_size: usize,
    services: Services,
    shutdown_rx: watch::Receiver<bool>,
}

impl GatewayServer {
    #[must_use]
    pub fn new(
        bind: &str,
        port: u16,
        services: Services,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        let addr: SocketAddr = format!("{bind}:{port}").parse().unwrap_or_else(|e| {
            tracing::warn!("invalid bind '{bind}': {e}, falling back to 127.0.0.1:{port}");
            SocketAddr::from(([127, 0, 0, 1], port))
        });

        if bind == "0.0.0.0" {
            tracing::warn!("gateway binding to 0.0.0.0; set an auth token before exposing it");
        }

        Self {
            addr,
            auth_token: None,
            rate_limit: 120,
            max_body_size: 50 * 1_048_576,
            services,
            shutdown_rx,
        }
    }

    #[must_use]
    pub fn with_auth(mut self, token: Option<String>) -> Self {
        self.auth_token = token;
        self
    }

    #[must_use]
    pub fn with_rate_limit(mut self, limit: u32) -> Self {
        self.rate_limit = limit;
        self
    }

    #[must_use]
    pub fn with_max_body_size(mut self, size: usize) -> Self {
        self.max_body_size = size;
        self
    }

    /// Start serving until the shutdown signal flips to `true`.
    ///
    /// In-flight requests are allowed to finish before this returns.
    ///
    /// # Errors
    ///
    /// Returns an error if the upload directory cannot be created, the server
    /// fails to bind, or it hits a fatal I/O error.
    pub async fn serve(self) -> Result<()> {
        let upload_dir = self.services.upload_dir.clone();
        tokio::fs::create_dir_all(&upload_dir)
            .await
            .map_err(|e| GatewayError::UploadDir(upload_dir.display().to_string(), e))?;

        if self.auth_token.is_none() {
            tracing::warn!("gateway auth token not set; API routes are unauthenticated");
        }

        let state = AppState::new(self.services);
        let router = build_router(state, self.auth_token, self.rate_limit, self.max_body_size);

        let listener = tokio::net::TcpListener::bind(self.addr)
            .await
            .map_err(|e| GatewayError::Bind(self.addr.to_string(), e))?;
        tracing::info!("gateway listening on {}", self.addr);

        let mut shutdown_rx = self.shutdown_rx;
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            while !*shutdown_rx.borrow_and_update() {
                if shutdown_rx.changed().await.is_err() {
                    std::future::pending::<()>().await;
                }
            }
            tracing::info!("gateway shutting down");
        })
        .await
        .map_err(|e| GatewayError::Server(format!("{e}")))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::tests::test_services;

    #[tokio::test]
    async fn server_builder_chain() {
        let dir = tempfile::tempdir().unwrap();
        let (_stx, srx) = watch::channel(false);
        let server = GatewayServer::new("127.0.0.1", 8090, test_services(dir.path()), srx)
            .with_auth(Some("token".into()))
            .with_rate_limit(60)
            .with_max_body_size(512);

        assert_eq!(server.rate_limit, 60);
        assert_eq!(server.max_body_size, 512);
        assert!(server.auth_token.is_some());
    }

    #[tokio::test]
    async fn server_invalid_bind_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let (_stx, srx) = watch::channel(false);
        let server = GatewayServer::new("not_an_ip", 9999, test_services(dir.path()), srx);
        assert_eq!(server.addr.port(), 9999);
        assert!(server.addr.ip().is_loopback());
    }

    #[tokio::test]
    async fn serve_stops_on_shutdown_signal() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = dir.path().join("uploads");
        let mut services = test_services(dir.path());
        services.upload_dir.clone_from(&uploads);
        let (stx, srx) = watch::channel(false);
        let server = GatewayServer::new("127.0.0.1", 0, services, srx);

        let handle = tokio::spawn(server.serve());
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        stx.send(true).unwrap();
        handle.await.unwrap().unwrap();
        assert!(uploads.is_dir());
    }
}
