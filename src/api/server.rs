//! API Server
//!
//! Binds the router with its middleware stack and serves until shutdown.

use super::{
    handlers::AppState,
    middleware::{create_cors_layer, request_id_middleware},
    routes::create_router,
};
use crate::config::ServerConfig;
use crate::errors::{AscentResult, ConfigurationError};
use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;

pub struct ApiServer {
    config: ServerConfig,
    state: Arc<AppState>,
}

impl ApiServer {
    pub fn new(config: ServerConfig, state: Arc<AppState>) -> Self {
        Self { config, state }
    }

    /// Serve HTTP until `shutdown` completes
    pub async fn run<F>(self, shutdown: F) -> AscentResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = self.create_app();
        let addr = self.socket_addr()?;
        let listener = tokio::net::TcpListener::bind(addr).await?;

        info!("Ascent API listening on http://{}", addr);
        self.log_server_info();

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("API server stopped");
        Ok(())
    }

    /// Router with the full middleware stack
    pub fn create_app(&self) -> axum::Router {
        build_app(self.state.clone(), &self.config)
    }

    fn socket_addr(&self) -> AscentResult<SocketAddr> {
        let ip = self.config.host.parse::<std::net::IpAddr>().map_err(|e| {
            ConfigurationError::InvalidValue {
                field: "server.host".to_string(),
                value: self.config.host.clone(),
                reason: e.to_string(),
            }
        })?;
        Ok(SocketAddr::from((ip, self.config.port)))
    }

    fn log_server_info(&self) {
        info!("   CORS: {:?}", self.config.allowed_origins);
        info!("   Request timeout: {}s", self.config.request_timeout_secs);
        info!("   POST /api/:game/bet | cancel | cashout");
        info!("   GET  /api/:game/state | history, /api/wallet");
        info!("   GET  /ws/:game?participant=");
        info!("   GET  /health, /metrics");
    }
}

pub fn build_app(state: Arc<AppState>, config: &ServerConfig) -> axum::Router {
    create_router(state)
        // Innermost: handlers read the id from request extensions
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(create_cors_layer(config.allowed_origins.clone()))
        .layer(TimeoutLayer::new(Duration::from_secs(config.request_timeout_secs)))
        .layer(TraceLayer::new_for_http())
}
