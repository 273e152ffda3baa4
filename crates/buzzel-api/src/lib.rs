//! HTTP front end for the buzzel build cache.
//!
//! Serves the Action Cache under `/ac/{key}` and the Content-Addressable
//! Store under `/cas/{key}` with `HEAD`, `GET` and `PUT`, plus `/healthz`.

pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod state;

pub use routes::create_router;
pub use state::AppState;

use buzzel_core::Backend;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Serve `cache` on `listener` until `shutdown` resolves, then drain
/// in-flight requests.
pub async fn serve<F>(listener: TcpListener, cache: Arc<dyn Backend>, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let router = create_router(Arc::new(AppState::new(cache)));
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}
