//! # HTTP Server
//!
//! Combines the scenario and observability routers behind one CORS layer and
//! serves them until Ctrl-C.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use super::config::HttpServerConfig;
use super::observability_routes::{health_routes, observability_routes};
use super::txn_routes::{txn_routes, TxnState};
use crate::config::ScenarioConfig;
use crate::observability::{log_event_with_fields, Event};
use crate::txn::TransactionCoordinator;

/// HTTP server for the transaction scenarios
pub struct HttpServer {
    config: HttpServerConfig,
    router: Router,
}

impl HttpServer {
    pub fn with_config(
        config: HttpServerConfig,
        coordinator: Arc<TransactionCoordinator>,
        scenario: ScenarioConfig,
    ) -> Self {
        let router = Self::build_router(&config, coordinator, scenario);
        Self { config, router }
    }

    /// Build the combined router with all endpoints
    fn build_router(
        config: &HttpServerConfig,
        coordinator: Arc<TransactionCoordinator>,
        scenario: ScenarioConfig,
    ) -> Router {
        let metrics = coordinator.metrics().clone();
        let txn_state = Arc::new(TxnState::new(coordinator, scenario));

        let cors = if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|s| s.parse().ok())
                .collect();

            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods(Any)
                .allow_headers(Any)
        };

        Router::new()
            .merge(health_routes())
            .merge(txn_routes(txn_state))
            .nest("/observability", observability_routes(metrics))
            .layer(ServiceBuilder::new().layer(cors))
    }

    /// Get the socket address
    pub fn socket_addr(&self) -> String {
        self.config.socket_addr()
    }

    /// Get the router (for testing)
    pub fn router(self) -> Router {
        self.router
    }

    /// Serve until Ctrl-C, letting in-flight requests finish
    pub async fn start(self) -> io::Result<()> {
        let addr: SocketAddr = self.config.socket_addr().parse().map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid listen address {}: {}", self.config.socket_addr(), e),
            )
        })?;

        let listener = TcpListener::bind(addr).await?;
        log_event_with_fields(Event::ServerStart, &[("addr", &addr.to_string())]);

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        log_event_with_fields(Event::ServerShutdown, &[("addr", &addr.to_string())]);
        Ok(())
    }
}

async fn shutdown_signal() {
    // If the handler cannot be installed the server runs until killed
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}
