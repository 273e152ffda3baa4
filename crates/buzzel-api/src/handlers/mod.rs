//! Request handlers.

pub mod blobs;
pub mod health;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use buzzel_core::Error;
use tracing::error;

/// A cache error on its way to becoming an HTTP response.
///
/// Missing objects become `404`. Anything else is logged and reported as a
/// bare `500`; the error text stays in the server log.
#[derive(Debug)]
pub struct ApiError(Error);

impl<E> From<E> for ApiError
where
    E: Into<Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.0.is_not_found() {
            return StatusCode::NOT_FOUND.into_response();
        }

        error!(error = %self.0, "request failed");
        let status = StatusCode::INTERNAL_SERVER_ERROR;
        (status, status.canonical_reason().unwrap_or_default()).into_response()
    }
}
