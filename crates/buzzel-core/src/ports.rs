//! Port traits (hexagonal architecture).
//!
//! These traits define the interfaces between the HTTP front end, the
//! eviction cache, and the storage adapters.

use crate::cache::{Key, Store};
use crate::Result;
use async_trait::async_trait;
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncWrite};

/// Stream of object bytes.
pub type BlobReader = Pin<Box<dyn AsyncRead + Send>>;

/// Sink for object bytes. Shutting the sink down publishes the object;
/// dropping it first discards everything written.
pub type BlobWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// Storage for cached objects, addressed by `(store, key)`.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Check that an object exists without reading its content.
    async fn exists(&self, store: Store, key: &Key) -> Result<()>;

    /// Open an object for reading. The size is the exact byte length.
    async fn reader(&self, store: Store, key: &Key) -> Result<(BlobReader, u64)>;

    /// Open a sink for writing an object.
    ///
    /// Once the sink has been shut down the object is visible to
    /// subsequent `exists` and `reader` calls, unless the backend documents
    /// otherwise.
    async fn writer(&self, store: Store, key: &Key) -> Result<BlobWriter>;

    /// Optional liveness capability. Backends without one are always healthy.
    fn health_check(&self) -> Option<&dyn HealthCheck> {
        None
    }
}

/// Liveness probe for a backend.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn check(&self) -> Result<()>;
}

/// Probe a backend's health, treating a missing capability as healthy.
pub async fn check_health(backend: &dyn Backend) -> Result<()> {
    match backend.health_check() {
        Some(checker) => checker.check().await,
        None => Ok(()),
    }
}
