//! HTTP server setup

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::options::ServerOptions;
use crate::errors::LinkError;
use crate::server::handlers::{
    delete_link_handler, disable_link_handler, enable_link_handler, link_status_handler,
    list_images_handler, list_links_handler, read_link_handler, reload_links_handler,
    server_status_handler, unix_time_handler, update_link_handler, write_link_handler,
};
use crate::server::state::ServerState;

/// Management routes
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        // Server
        .route("/api/v0/server/status", get(server_status_handler))
        .route("/api/v0/time/unix", get(unix_time_handler))
        // Links
        .route("/api/v0/link/list", get(list_links_handler))
        .route("/api/v0/link/reload", get(reload_links_handler))
        .route("/api/v0/link/enable", get(enable_link_handler))
        .route("/api/v0/link/disable", get(disable_link_handler))
        .route("/api/v0/link/delete", get(delete_link_handler))
        .route("/api/v0/link/read", get(read_link_handler))
        .route("/api/v0/link/write", post(write_link_handler))
        .route("/api/v0/link/update", post(update_link_handler))
        .route("/api/v0/link/status", get(link_status_handler))
        // Images
        .route("/api/v0/image/list", get(list_images_handler))
        // State and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP server, returning the bound address and the server task
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(SocketAddr, JoinHandle<Result<(), LinkError>>), LinkError> {
    let app = router(state);

    let addr = format!("{}:{}", options.host, options.port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| LinkError::Server(format!("cannot bind {}: {}", addr, e)))?;
    let local_addr = listener
        .local_addr()
        .map_err(|e| LinkError::Server(e.to_string()))?;
    info!("Management server listening on {}", local_addr);

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| LinkError::Server(e.to_string()))
    });

    Ok((local_addr, handle))
}
