mod error;
mod handlers;
mod middleware;

pub use error::ApiError;
pub use handlers::ROOM_ID_HEADER;

use crate::session::StreamingSession;
use crate::tenant::TenantStorageRouter;
use anyhow::{Context, Result};
use axum::Router;
use axum::routing::{get, post};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub router: Arc<TenantStorageRouter>,
    pub session: StreamingSession,
}

/// Routes are matched against the path left after tenant resolution, so
/// the resolver wraps an inner router instead of being a route layer.
pub fn app(state: AppState) -> Router {
    let routes = Router::new()
        .route("/chat", post(handlers::chat))
        .route("/rooms/{room_id}/messages", get(handlers::room_messages))
        .route("/health", get(handlers::health))
        .with_state(state.clone());

    Router::new()
        .fallback_service(routes)
        .layer(axum::middleware::from_fn_with_state(
            state,
            middleware::resolve_tenant,
        ))
        .layer(TraceLayer::new_for_http())
}

pub async fn serve(state: AppState, bind: SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    info!("Listening on http://{}", bind);

    axum::serve(listener, app(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await
        .context("HTTP server error")
}
