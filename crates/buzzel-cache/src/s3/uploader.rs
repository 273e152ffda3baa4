//! Background upload worker.
//!
//! Writers hand their bytes to the worker through an in-process pipe. The
//! worker takes jobs from a depth-one queue and runs exactly one transfer at
//! a time. A transfer failure is logged and dropped: the writer has already
//! been told the write succeeded. A writer dropped without shutdown fails its
//! own transfer, so a partial body is never stored.

use async_trait::async_trait;
use buzzel_core::{BlobReader, BlobWriter, Error, Result};
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::sync::{mpsc, oneshot};
use tracing::{Instrument, Span, debug, error};

pub const CONTENT_TYPE: &str = "application/octet-stream";

/// Bytes buffered in a writer's pipe before writes block on the worker.
pub const PIPE_CAPACITY: usize = 64 * 1024;

/// An upload waiting for the worker.
pub struct UploadJob {
    /// Resolved object path.
    pub path: String,
    pub content_type: String,
    /// Live read end of the writer's pipe.
    pub body: BlobReader,
    /// Span of the request that started the write. Used for logging only;
    /// the transfer outlives the request.
    pub span: Span,
}

/// Moves one job's bytes to remote storage.
#[async_trait]
pub trait Transfer: Send + Sync + 'static {
    /// Upload `body` to `path`, returning the number of bytes sent.
    async fn transfer(&self, path: &str, content_type: &str, body: &mut BlobReader) -> Result<u64>;
}

/// Handle to the single upload worker.
#[derive(Clone)]
pub struct Uploader {
    jobs: mpsc::Sender<UploadJob>,
}

impl Uploader {
    /// Spawn the worker onto the current runtime.
    pub fn spawn<T: Transfer>(transfer: T) -> Self {
        let (jobs, rx) = mpsc::channel(1);
        tokio::spawn(run(transfer, rx));
        Self { jobs }
    }

    /// Queue a job, waiting until the worker has taken the previous one.
    pub async fn enqueue(&self, job: UploadJob) -> Result<()> {
        self.jobs
            .send(job)
            .await
            .map_err(|_| Error::ObjectStore("uploader stopped".to_string()))
    }

    /// Open a pipe to `path` and queue its read end for upload.
    ///
    /// Returns once the job is queued. Writes to the returned sink block
    /// until the worker drains them; shutting it down ends the upload body.
    pub async fn writer(&self, path: String) -> Result<BlobWriter> {
        let (sink, body) = pipe();
        self.enqueue(UploadJob {
            path,
            content_type: CONTENT_TYPE.to_string(),
            body: Box::pin(body),
            span: Span::current(),
        })
        .await?;
        Ok(Box::pin(sink))
    }
}

/// A pipe whose read end only reports end-of-stream once the write end has
/// been shut down. Dropping the write end early fails the read instead, so a
/// truncated body is never uploaded as a complete object.
fn pipe() -> (PipeWriter, PipeReader) {
    let (sink, source) = tokio::io::duplex(PIPE_CAPACITY);
    let (committed_tx, committed_rx) = oneshot::channel();
    (
        PipeWriter {
            pipe: sink,
            committed: Some(committed_tx),
        },
        PipeReader {
            pipe: source,
            committed: committed_rx,
            outcome: None,
        },
    )
}

struct PipeWriter {
    pipe: DuplexStream,
    committed: Option<oneshot::Sender<()>>,
}

impl AsyncWrite for PipeWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.pipe).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.pipe).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        ready!(Pin::new(&mut self.pipe).poll_shutdown(cx))?;
        if let Some(committed) = self.committed.take() {
            let _ = committed.send(());
        }
        Poll::Ready(Ok(()))
    }
}

struct PipeReader {
    pipe: DuplexStream,
    committed: oneshot::Receiver<()>,
    /// Whether the writer committed, once end-of-stream has been seen.
    outcome: Option<bool>,
}

impl AsyncRead for PipeReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        let filled = buf.filled().len();
        ready!(Pin::new(&mut self.pipe).poll_read(cx, buf))?;
        if buf.filled().len() > filled {
            return Poll::Ready(Ok(()));
        }

        let committed = match self.outcome {
            Some(committed) => committed,
            None => {
                let committed = ready!(Pin::new(&mut self.committed).poll(cx)).is_ok();
                self.outcome = Some(committed);
                committed
            }
        };

        if committed {
            Poll::Ready(Ok(()))
        } else {
            Poll::Ready(Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "upload writer dropped before shutdown",
            )))
        }
    }
}

async fn run<T: Transfer>(transfer: T, mut jobs: mpsc::Receiver<UploadJob>) {
    while let Some(mut job) = jobs.recv().await {
        let span = job.span.clone();
        async {
            match transfer
                .transfer(&job.path, &job.content_type, &mut job.body)
                .await
            {
                Ok(size) => debug!(path = %job.path, size, "upload complete"),
                Err(e) => {
                    error!(path = %job.path, error = %e, "upload failed");
                    // Keep reading so the writer still completes.
                    if let Err(e) = tokio::io::copy(&mut job.body, &mut tokio::io::sink()).await {
                        debug!(path = %job.path, error = %e, "discarding upload body failed");
                    }
                }
            }
        }
        .instrument(span)
        .await;
    }
    debug!("uploader stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::sync::Semaphore;
    use tokio::time::timeout;

    /// Records transfers; each one waits for a permit from `gate`.
    struct FakeTransfer {
        gate: Arc<Semaphore>,
        started: mpsc::UnboundedSender<String>,
        finished: mpsc::UnboundedSender<(String, Vec<u8>)>,
        in_flight: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    struct Harness {
        uploader: Uploader,
        gate: Arc<Semaphore>,
        started: mpsc::UnboundedReceiver<String>,
        finished: mpsc::UnboundedReceiver<(String, Vec<u8>)>,
        peak: Arc<AtomicUsize>,
    }

    fn harness(permits: usize) -> Harness {
        let gate = Arc::new(Semaphore::new(permits));
        let (started_tx, started) = mpsc::unbounded_channel();
        let (finished_tx, finished) = mpsc::unbounded_channel();
        let peak = Arc::new(AtomicUsize::new(0));
        let uploader = Uploader::spawn(FakeTransfer {
            gate: gate.clone(),
            started: started_tx,
            finished: finished_tx,
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: peak.clone(),
        });
        Harness {
            uploader,
            gate,
            started,
            finished,
            peak,
        }
    }

    #[async_trait]
    impl Transfer for FakeTransfer {
        async fn transfer(
            &self,
            path: &str,
            _content_type: &str,
            body: &mut BlobReader,
        ) -> Result<u64> {
            let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(running, Ordering::SeqCst);
            let _ = self.started.send(path.to_string());

            if let Ok(permit) = self.gate.acquire().await {
                permit.forget();
            }

            let result = if path.starts_with("fail") {
                Err(Error::ObjectStore("access denied".to_string()))
            } else {
                let mut data = Vec::new();
                body.read_to_end(&mut data).await?;
                let size = data.len() as u64;
                let _ = self.finished.send((path.to_string(), data));
                Ok(size)
            };

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }

    fn job(path: &str) -> UploadJob {
        UploadJob {
            path: path.to_string(),
            content_type: CONTENT_TYPE.to_string(),
            body: Box::pin(Cursor::new(b"x".to_vec())),
            span: Span::none(),
        }
    }

    #[tokio::test]
    async fn test_writer_streams_to_transfer() {
        let mut h = harness(Semaphore::MAX_PERMITS);

        let mut writer = h.uploader.writer("ac/9f/key".to_string()).await.unwrap();
        writer.write_all(b"foo").await.unwrap();
        writer.shutdown().await.unwrap();

        let (path, data) = h.finished.recv().await.unwrap();
        assert_eq!(path, "ac/9f/key");
        assert_eq!(data, b"foo");
    }

    #[tokio::test]
    async fn test_enqueue_blocks_until_previous_job_is_taken() {
        let mut h = harness(0);

        h.uploader.enqueue(job("one")).await.unwrap();
        assert_eq!(h.started.recv().await.unwrap(), "one");

        // The worker is busy with "one"; "two" takes the only queue slot.
        h.uploader.enqueue(job("two")).await.unwrap();
        let blocked = timeout(Duration::from_millis(50), h.uploader.enqueue(job("three"))).await;
        assert!(blocked.is_err());
        assert!(
            timeout(Duration::from_millis(50), h.started.recv())
                .await
                .is_err()
        );

        h.gate.add_permits(1);
        assert_eq!(h.started.recv().await.unwrap(), "two");
        timeout(Duration::from_secs(1), h.uploader.enqueue(job("three")))
            .await
            .unwrap()
            .unwrap();

        h.gate.add_permits(2);
        assert_eq!(h.started.recv().await.unwrap(), "three");

        let mut order = Vec::new();
        for _ in 0..3 {
            order.push(h.finished.recv().await.unwrap().0);
        }
        assert_eq!(order, ["one", "two", "three"]);
        assert_eq!(h.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_pipe_reports_eof_only_after_shutdown() {
        let (mut sink, mut body) = pipe();
        sink.write_all(b"foo").await.unwrap();
        sink.shutdown().await.unwrap();

        let mut data = Vec::new();
        body.read_to_end(&mut data).await.unwrap();
        assert_eq!(data, b"foo");
    }

    #[tokio::test]
    async fn test_pipe_fails_when_writer_is_dropped() {
        let (mut sink, mut body) = pipe();
        sink.write_all(b"fo").await.unwrap();
        drop(sink);

        let mut data = Vec::new();
        let err = body.read_to_end(&mut data).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        assert_eq!(data, b"fo");

        // Draining after the failure keeps reporting it.
        let err = tokio::io::copy(&mut body, &mut tokio::io::sink()).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_abandoned_writer_is_not_uploaded() {
        let mut h = harness(Semaphore::MAX_PERMITS);

        let mut writer = h.uploader.writer("cas/9f/partial".to_string()).await.unwrap();
        writer.write_all(b"fo").await.unwrap();
        drop(writer);

        let mut writer = h.uploader.writer("cas/9f/complete".to_string()).await.unwrap();
        writer.write_all(b"foo").await.unwrap();
        writer.shutdown().await.unwrap();

        // Jobs run in order, so the first one has already been settled.
        let (path, data) = h.finished.recv().await.unwrap();
        assert_eq!(path, "cas/9f/complete");
        assert_eq!(data, b"foo");
        assert!(h.finished.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failed_transfer_is_not_reported_to_writer() {
        let mut h = harness(Semaphore::MAX_PERMITS);

        // Larger than the pipe, so the writer only completes if the worker
        // keeps draining after the failure.
        let payload = vec![7u8; PIPE_CAPACITY * 4];
        let mut writer = h.uploader.writer("fail/ac/key".to_string()).await.unwrap();
        writer.write_all(&payload).await.unwrap();
        writer.shutdown().await.unwrap();

        let mut writer = h.uploader.writer("ac/9f/next".to_string()).await.unwrap();
        writer.write_all(b"bar").await.unwrap();
        writer.shutdown().await.unwrap();

        let (path, data) = h.finished.recv().await.unwrap();
        assert_eq!(path, "ac/9f/next");
        assert_eq!(data, b"bar");
    }
}
