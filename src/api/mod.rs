//! HTTP API server for the voicebridge relay

pub mod health;
pub mod websocket;

use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::session::{ConnectionRegistry, CoordinatorSettings, WorkerPool};
use crate::voice::Collaborators;
use crate::{Config, Result};

/// Shared state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub registry: Arc<ConnectionRegistry>,
    pub collaborators: Collaborators,
    pub pool: WorkerPool,
    pub settings: CoordinatorSettings,
    /// Largest inbound WebSocket message accepted
    pub max_message_bytes: usize,
    /// Chat model named in `/status`
    pub llm_model: String,
}

impl ApiState {
    #[must_use]
    pub fn new(config: &Config, collaborators: Collaborators) -> Self {
        Self {
            registry: Arc::new(ConnectionRegistry::new()),
            collaborators,
            pool: WorkerPool::from_config(&config.pipeline),
            settings: CoordinatorSettings::from(config),
            max_message_bytes: config.server.max_message_bytes,
            llm_model: config.llm.model.clone(),
        }
    }
}

/// API server
pub struct ApiServer {
    state: Arc<ApiState>,
    addr: String,
}

impl ApiServer {
    #[must_use]
    pub fn new(config: &Config, collaborators: Collaborators) -> Self {
        Self::with_state(ApiState::new(config, collaborators), config.bind_addr())
    }

    #[must_use]
    pub fn with_state(state: ApiState, addr: impl Into<String>) -> Self {
        Self {
            state: Arc::new(state),
            addr: addr.into(),
        }
    }

    #[must_use]
    pub fn state(&self) -> Arc<ApiState> {
        Arc::clone(&self.state)
    }

    /// Build the router with all routes
    pub fn router(&self) -> Router {
        let router = Router::new()
            .merge(websocket::router(self.state()))
            .merge(health::router(self.state()));

        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        router.layer(cors).layer(TraceLayer::new_for_http())
    }

    /// Run the API server until Ctrl-C
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(&self.addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind {}: {e}", self.addr)))?;

        tracing::info!(addr = %self.addr, "voicebridge listening");

        let registry = Arc::clone(&self.state.registry);
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        for id in registry.ids().await {
            registry.unregister(&id).await;
        }
        tracing::info!("voicebridge stopped");
        Ok(())
    }

    /// Run the API server in a background task
    #[must_use]
    pub fn spawn(self) -> tokio::task::JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run().await })
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
