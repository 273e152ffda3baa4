//! Action Cache and CAS object handlers.

use axum::{
    body::Body,
    extract::{Path, State},
    http::{Method, StatusCode, header},
    response::{IntoResponse, Response},
};
use buzzel_core::{Key, Store};
use futures::TryStreamExt;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::debug;

use super::ApiError;
use crate::state::AppState;

const OCTET_STREAM: &str = "application/octet-stream";

fn parse_target(store: &str, key: &str) -> buzzel_core::Result<(Store, Key)> {
    Ok((store.parse()?, Key::parse(key)?))
}

pub async fn head_blob(
    State(state): State<Arc<AppState>>,
    Path((store, key)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let (store, key) = parse_target(&store, &key)?;
    state.cache.exists(store, &key).await?;
    Ok(StatusCode::OK)
}

pub async fn get_blob(
    State(state): State<Arc<AppState>>,
    Path((store, key)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let (store, key) = parse_target(&store, &key)?;
    state.cache.exists(store, &key).await?;
    let (reader, size) = state.cache.reader(store, &key).await?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_LENGTH, size.to_string()),
            (header::CONTENT_TYPE, OCTET_STREAM.to_string()),
        ],
        Body::from_stream(ReaderStream::new(reader)),
    )
        .into_response())
}

pub async fn put_blob(
    State(state): State<Arc<AppState>>,
    Path((store, key)): Path<(String, String)>,
    body: Body,
) -> Result<StatusCode, ApiError> {
    let (store, key) = parse_target(&store, &key)?;
    let mut body = StreamReader::new(body.into_data_stream().map_err(std::io::Error::other));

    let written = match state.cache.writer(store, &key).await {
        Ok(mut sink) => {
            let written = tokio::io::copy(&mut body, &mut sink).await?;
            sink.shutdown().await?;
            written
        }
        // Some backends report a missing object while it is being created.
        Err(e) if e.is_not_found() => tokio::io::copy(&mut body, &mut tokio::io::sink()).await?,
        Err(e) => return Err(e.into()),
    };

    debug!(%store, %key, size = written, "stored");
    Ok(StatusCode::OK)
}

/// Anything that is not a cache object: `405` for methods the protocol
/// does not speak, `404` otherwise.
pub async fn fallback(method: Method) -> StatusCode {
    if method == Method::HEAD || method == Method::GET || method == Method::PUT {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::METHOD_NOT_ALLOWED
    }
}
