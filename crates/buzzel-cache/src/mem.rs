//! In-memory backend.

use async_trait::async_trait;
use buzzel_core::{Backend, BlobReader, BlobWriter, Error, Key, Result, Store, resolve};
use bytes::{Bytes, BytesMut};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io::Cursor;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::AsyncWrite;

type Objects = Arc<RwLock<HashMap<String, Bytes>>>;

/// Keeps every object in a map for the lifetime of the process.
#[derive(Debug, Clone, Default)]
pub struct MemBackend {
    objects: Objects,
}

impl MemBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

#[async_trait]
impl Backend for MemBackend {
    async fn exists(&self, store: Store, key: &Key) -> Result<()> {
        if self.objects.read().contains_key(&resolve(store, key)) {
            Ok(())
        } else {
            Err(Error::NotFound)
        }
    }

    async fn reader(&self, store: Store, key: &Key) -> Result<(BlobReader, u64)> {
        let data = self
            .objects
            .read()
            .get(&resolve(store, key))
            .cloned()
            .ok_or(Error::NotFound)?;
        let size = data.len() as u64;
        Ok((Box::pin(Cursor::new(data)), size))
    }

    async fn writer(&self, store: Store, key: &Key) -> Result<BlobWriter> {
        Ok(Box::pin(MemWriter {
            buf: BytesMut::new(),
            objects: self.objects.clone(),
            path: resolve(store, key),
        }))
    }
}

/// Buffers a payload and publishes it to the map on shutdown, so a
/// half-written object is never visible.
struct MemWriter {
    buf: BytesMut,
    objects: Objects,
    path: String,
}

impl AsyncWrite for MemWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        self.buf.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        let data = self.buf.split().freeze();
        let path = self.path.clone();
        self.objects.write().insert(path, data);
        Poll::Ready(Ok(()))
    }
}
