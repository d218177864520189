//! Web server module: the JSON command and query API.

mod handlers;

use crate::config::ServerConfig;
use crate::registry::Registry;
use crate::scheduler::{FailureLog, Scheduler};

use axum::{
    extract::DefaultBodyLimit,
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub registry: Arc<Registry>,
    pub scheduler: Arc<Scheduler>,
    pub failure_log: Arc<FailureLog>,
}

/// Web server for pingwatch.
pub struct Server {
    state: AppState,
}

impl Server {
    /// Create a new server with the given dependencies.
    pub fn new(
        config: ServerConfig,
        registry: Arc<Registry>,
        scheduler: Arc<Scheduler>,
        failure_log: Arc<FailureLog>,
    ) -> Self {
        Self {
            state: AppState {
                config,
                registry,
                scheduler,
                failure_log,
            },
        }
    }

    /// Build the router with all routes.
    fn routes(&self) -> Router {
        router(self.state.clone())
    }

    /// Start the server on the configured port.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.http_port));
        let router = self.routes();

        tracing::info!("Web server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

    Router::new()
        .route("/health", get(handlers::handle_health))
        .route(
            "/api/targets",
            get(handlers::handle_get_targets).post(handlers::handle_create_target),
        )
        .route(
            "/api/targets/{id}",
            get(handlers::handle_get_target)
                .put(handlers::handle_update_target)
                .delete(handlers::handle_delete_target),
        )
        .route("/api/status", get(handlers::handle_get_statuses))
        .route(
            "/api/failures",
            get(handlers::handle_get_failures).delete(handlers::handle_clear_failures),
        )
        .route("/failures", get(handlers::handle_failures_text))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(DefaultBodyLimit::max(64 * 1024))
        .with_state(state)
}
