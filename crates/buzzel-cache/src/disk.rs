//! Local filesystem backend.

use async_trait::async_trait;
use buzzel_core::{Backend, BlobReader, BlobWriter, Error, Key, Result, Store, resolve};
use std::future::Future;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use tempfile::{NamedTempFile, TempPath};
use tokio::fs;
use tokio::io::AsyncWrite;
use tokio::task::{JoinHandle, spawn_blocking};
use tracing::debug;

/// Stores each object as a file under `root/store/shard/key`.
#[derive(Debug, Clone)]
pub struct DiskBackend {
    root_dir: PathBuf,
}

impl DiskBackend {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    fn key_path(&self, store: Store, key: &Key) -> PathBuf {
        self.root_dir.join(resolve(store, key))
    }
}

fn not_found_or(err: std::io::Error) -> Error {
    if err.kind() == ErrorKind::NotFound {
        Error::NotFound
    } else {
        Error::Io(err)
    }
}

#[async_trait]
impl Backend for DiskBackend {
    async fn exists(&self, store: Store, key: &Key) -> Result<()> {
        let path = self.key_path(store, key);
        debug!(path = %path.display(), "disk exists");

        let metadata = fs::metadata(&path).await.map_err(not_found_or)?;
        if metadata.is_dir() {
            return Err(Error::KeyIsDir(path));
        }
        Ok(())
    }

    async fn reader(&self, store: Store, key: &Key) -> Result<(BlobReader, u64)> {
        let path = self.key_path(store, key);
        debug!(path = %path.display(), "disk read");

        let file = fs::File::open(&path).await.map_err(not_found_or)?;
        let metadata = file.metadata().await?;
        if metadata.is_dir() {
            return Err(Error::KeyIsDir(path));
        }

        Ok((Box::pin(file), metadata.len()))
    }

    async fn writer(&self, store: Store, key: &Key) -> Result<BlobWriter> {
        let path = self.key_path(store, key);
        debug!(path = %path.display(), "disk write");

        match fs::metadata(&path).await {
            Ok(metadata) if metadata.is_dir() => return Err(Error::KeyIsDir(path)),
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(Error::Io(e)),
        }

        let parent = path
            .parent()
            .ok_or_else(|| Error::Io(io::Error::other("key path has no parent")))?
            .to_path_buf();
        let mut builder = fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        builder.mode(0o700);
        builder.create(&parent).await?;

        // Created 0600 next to its final location, so the rename stays on one
        // filesystem.
        let temp = spawn_blocking(move || NamedTempFile::new_in(parent))
            .await
            .map_err(io::Error::other)??;
        let (file, temp) = temp.into_parts();

        Ok(Box::pin(DiskWriter {
            file: fs::File::from_std(file),
            temp: Some(temp),
            path,
            persist: None,
        }))
    }
}

/// Writes into a temporary file and renames it over the key path on
/// shutdown. Dropping the writer first deletes the temporary file.
struct DiskWriter {
    file: fs::File,
    temp: Option<TempPath>,
    path: PathBuf,
    persist: Option<JoinHandle<io::Result<()>>>,
}

impl AsyncWrite for DiskWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.file).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.file).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if self.persist.is_none() {
            ready!(Pin::new(&mut self.file).poll_shutdown(cx))?;

            let Some(temp) = self.temp.take() else {
                return Poll::Ready(Ok(()));
            };
            let path = self.path.clone();
            self.persist = Some(spawn_blocking(move || {
                temp.persist(&path).map_err(|err| err.error)
            }));
        }

        let Some(persist) = self.persist.as_mut() else {
            return Poll::Ready(Ok(()));
        };
        let result = ready!(Pin::new(persist).poll(cx)).map_err(io::Error::other)?;
        self.persist = None;
        Poll::Ready(result)
    }
}
