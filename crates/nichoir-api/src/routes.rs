//! Router setup and server startup.

use std::future::Future;

use axum::http::{HeaderValue, Method};
use axum::routing::get;
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use nichoir_core::error::NichoirError;

use crate::handlers;
use crate::state::AppState;

/// Create the axum Router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    // Only the gallery itself, served from the configured port, may call the API.
    let port = state.config.api.port;
    let origins: Vec<HeaderValue> = [
        format!("http://127.0.0.1:{}", port),
        format!("http://localhost:{}", port),
    ]
    .iter()
    .filter_map(|origin| origin.parse().ok())
    .collect();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::OPTIONS]);

    Router::new()
        .route("/", get(handlers::gallery))
        .route("/health", get(handlers::health))
        .route("/images", get(handlers::list_images))
        .route("/images/{id}", get(handlers::get_image))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve the viewer on `api.bind_address:api.port` until `shutdown` resolves.
pub async fn start_server<F>(state: AppState, shutdown: F) -> Result<(), NichoirError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = format!("{}:{}", state.config.api.bind_address, state.config.api.port);
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| NichoirError::Api(format!("Failed to bind {}: {}", addr, e)))?;

    tracing::info!("Viewer API listening on http://{}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| NichoirError::Api(format!("Server error: {}", e)))?;

    tracing::info!("Viewer API stopped");
    Ok(())
}
