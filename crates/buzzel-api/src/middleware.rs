//! HTTP middleware for the cache server.

use axum::{
    body::Body,
    http::{HeaderValue, Request, header},
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use tracing::{Instrument, info, info_span};
use uuid::Uuid;

pub const REQUEST_ID: &str = "x-request-id";

/// Tag each request with an id and a span, and write one access log line
/// when it completes.
pub async fn access_log(mut request: Request<Body>, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let method = request.method().clone();
    let uri = request.uri().clone();
    let span = info_span!("request", %method, %uri, %request_id);

    let header_value = HeaderValue::from_str(&request_id).ok();
    if let Some(value) = &header_value {
        request.headers_mut().insert(REQUEST_ID, value.clone());
    }

    let start = Instant::now();
    let mut response = next.run(request).instrument(span.clone()).await;
    let duration = start.elapsed();

    if let Some(value) = header_value {
        response.headers_mut().insert(REQUEST_ID, value);
    }

    let size = response
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);

    span.in_scope(|| {
        info!(
            %method,
            %uri,
            status = response.status().as_u16(),
            size,
            ?duration,
            "request completed"
        );
    });

    response
}
