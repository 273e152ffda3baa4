//! Bounded in-memory LRU layer in front of any backend.
//!
//! Recently read objects are mirrored in memory up to a byte budget. All
//! cache activity, including the backend fetch on a miss, runs under a single
//! lock; only the streaming of a write payload happens outside it.

use async_trait::async_trait;
use buzzel_core::{Backend, BlobReader, BlobWriter, HealthCheck, Key, Result, Store, resolve};
use bytes::Bytes;
use lru::LruCache;
use std::io::Cursor;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::sync::Mutex;
use tracing::debug;

struct Entry {
    store: Store,
    key: Key,
    data: Bytes,
}

/// Recency order and lookup table, plus the running payload total.
struct Entries {
    order: LruCache<String, Entry>,
    size: u64,
}

impl Entries {
    fn touch(&mut self, path: &str) -> Option<Bytes> {
        self.order.get(path).map(|entry| entry.data.clone())
    }

    fn remove(&mut self, path: &str) {
        if let Some(entry) = self.order.pop(path) {
            self.size -= entry.data.len() as u64;
        }
    }

    /// Drop least-recently-used entries until `incoming` more bytes fit.
    fn make_room(&mut self, incoming: u64, max: u64) {
        while incoming + self.size > max {
            let Some((_, entry)) = self.order.pop_lru() else {
                break;
            };
            self.size -= entry.data.len() as u64;
            debug!(
                evicted_store = %entry.store,
                evicted_key = %entry.key,
                size = entry.data.len(),
                "cache evict"
            );
        }
    }

    fn push(&mut self, path: String, entry: Entry) {
        self.size += entry.data.len() as u64;
        if let Some((_, replaced)) = self.order.push(path, entry) {
            self.size -= replaced.data.len() as u64;
        }
    }
}

/// LRU cache wrapping a [`Backend`], bounded by total payload bytes.
pub struct EvictionCache {
    backend: Arc<dyn Backend>,
    entries: Mutex<Entries>,
    max: u64,
}

impl EvictionCache {
    pub fn new(backend: Arc<dyn Backend>, max: u64) -> Self {
        Self {
            backend,
            entries: Mutex::new(Entries {
                order: LruCache::unbounded(),
                size: 0,
            }),
            max,
        }
    }

    /// Configured capacity in bytes.
    pub fn max(&self) -> u64 {
        self.max
    }

    /// Sum of the sizes of all tracked entries.
    pub async fn size(&self) -> u64 {
        self.entries.lock().await.size
    }

    /// Number of tracked entries.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.order.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Whether an object is tracked, without refreshing its recency.
    pub async fn contains(&self, store: Store, key: &Key) -> bool {
        self.entries.lock().await.order.contains(&resolve(store, key))
    }

    async fn load(
        &self,
        entries: &mut Entries,
        store: Store,
        key: &Key,
    ) -> Result<(BlobReader, u64)> {
        debug!(%store, %key, "cache miss");

        let (mut reader, size) = self.backend.reader(store, key).await?;
        if size > self.max {
            return Ok((reader, size));
        }

        entries.make_room(size, self.max);

        let mut buf = Vec::with_capacity(size as usize);
        reader.read_to_end(&mut buf).await?;
        let data = Bytes::from(buf);
        let len = data.len() as u64;

        // The backend's reported size is a hint; account for what was drained.
        if len <= self.max {
            entries.make_room(len, self.max);
            entries.push(
                resolve(store, key),
                Entry {
                    store,
                    key: key.clone(),
                    data: data.clone(),
                },
            );
        }
        debug!(size = entries.size, max = self.max, "cache load");

        Ok((Box::pin(Cursor::new(data)), len))
    }
}

#[async_trait]
impl Backend for EvictionCache {
    async fn exists(&self, store: Store, key: &Key) -> Result<()> {
        let mut entries = self.entries.lock().await;

        if entries.touch(&resolve(store, key)).is_some() {
            debug!(%store, %key, "cache hit");
            return Ok(());
        }

        self.backend.exists(store, key).await?;
        self.load(&mut entries, store, key).await?;
        Ok(())
    }

    async fn reader(&self, store: Store, key: &Key) -> Result<(BlobReader, u64)> {
        let mut entries = self.entries.lock().await;

        if let Some(data) = entries.touch(&resolve(store, key)) {
            debug!(%store, %key, "cache hit");
            let size = data.len() as u64;
            return Ok((Box::pin(Cursor::new(data)), size));
        }

        self.load(&mut entries, store, key).await
    }

    async fn writer(&self, store: Store, key: &Key) -> Result<BlobWriter> {
        self.entries.lock().await.remove(&resolve(store, key));
        self.backend.writer(store, key).await
    }

    fn health_check(&self) -> Option<&dyn HealthCheck> {
        Some(self)
    }
}

#[async_trait]
impl HealthCheck for EvictionCache {
    async fn check(&self) -> Result<()> {
        buzzel_core::check_health(self.backend.as_ref()).await
    }
}
