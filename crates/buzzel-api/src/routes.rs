//! Route definitions.

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware::from_fn,
    routing::{any, get},
};
use std::sync::Arc;
use tower_http::compression::CompressionLayer;

use crate::handlers::{blobs, health};
use crate::middleware::access_log;
use crate::state::AppState;

/// Create the cache router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", any(health::healthz))
        .route(
            "/{store}/{key}",
            get(blobs::get_blob)
                .head(blobs::head_blob)
                .put(blobs::put_blob),
        )
        .fallback(blobs::fallback)
        .layer(DefaultBodyLimit::disable())
        .layer(CompressionLayer::new())
        .layer(from_fn(access_log))
        .with_state(state)
}
