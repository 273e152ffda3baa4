//! S3-compatible object store backend.
//!
//! Reads go straight to the bucket. Writes are handed to a single
//! [`Uploader`] worker through an in-process pipe, so a write call returns as
//! soon as the upload is queued and the client's bytes stream into the
//! transfer without being buffered whole.

mod uploader;

pub use uploader::{CONTENT_TYPE, PIPE_CAPACITY, Transfer, UploadJob, Uploader};

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use buzzel_core::{Backend, BlobReader, BlobWriter, Error, HealthCheck, Key, Result, Store, resolve};
use bytes::{Bytes, BytesMut};
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

/// Payloads at least this large are sent as multipart uploads, one part in
/// memory at a time.
pub const PART_SIZE: usize = 8 * 1024 * 1024;

/// Connection settings for the S3 backend.
#[derive(Debug, Clone, Default)]
pub struct S3Options {
    pub bucket: String,
    /// Custom endpoint for S3-compatible stores. Enables path-style addressing.
    pub endpoint: Option<String>,
}

pub struct S3Backend {
    bucket: String,
    client: Client,
    uploader: Uploader,
}

fn object_store_error(err: impl std::error::Error) -> Error {
    Error::ObjectStore(DisplayErrorContext(&err).to_string())
}

impl S3Backend {
    /// Connect using the default AWS credential chain and verify the bucket
    /// is reachable.
    pub async fn new(options: S3Options) -> Result<Self> {
        if options.bucket.is_empty() {
            return Err(Error::Config("s3 bucket is required".to_string()));
        }

        let sdk_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(endpoint) = &options.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Self::with_client(Client::from_conf(builder.build()), options.bucket).await
    }

    /// Use an existing client. Fails if the bucket cannot be reached.
    pub async fn with_client(client: Client, bucket: impl Into<String>) -> Result<Self> {
        let bucket = bucket.into();
        head_bucket(&client, &bucket).await?;

        let uploader = Uploader::spawn(S3Transfer {
            client: client.clone(),
            bucket: bucket.clone(),
        });

        Ok(Self {
            bucket,
            client,
            uploader,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

async fn head_bucket(client: &Client, bucket: &str) -> Result<()> {
    client
        .head_bucket()
        .bucket(bucket)
        .send()
        .await
        .map_err(object_store_error)?;
    Ok(())
}

#[async_trait]
impl Backend for S3Backend {
    async fn exists(&self, store: Store, key: &Key) -> Result<()> {
        let path = resolve(store, key);
        debug!(%path, "s3 exists");

        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&path)
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(err) if err.as_service_error().is_some_and(|e| e.is_not_found()) => {
                Err(Error::NotFound)
            }
            Err(err) => Err(object_store_error(err)),
        }
    }

    async fn reader(&self, store: Store, key: &Key) -> Result<(BlobReader, u64)> {
        let path = resolve(store, key);
        debug!(%path, "s3 read");

        let output = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&path)
            .send()
            .await
        {
            Ok(output) => output,
            Err(err) if err.as_service_error().is_some_and(|e| e.is_no_such_key()) => {
                return Err(Error::NotFound);
            }
            Err(err) => return Err(object_store_error(err)),
        };

        let size = output
            .content_length()
            .and_then(|len| u64::try_from(len).ok())
            .ok_or_else(|| Error::ObjectStore(format!("missing content length for {}", path)))?;

        Ok((Box::pin(output.body.into_async_read()), size))
    }

    async fn writer(&self, store: Store, key: &Key) -> Result<BlobWriter> {
        let path = resolve(store, key);
        debug!(%path, "s3 write");

        self.uploader.writer(path).await
    }

    fn health_check(&self) -> Option<&dyn HealthCheck> {
        Some(self)
    }
}

#[async_trait]
impl HealthCheck for S3Backend {
    async fn check(&self) -> Result<()> {
        head_bucket(&self.client, &self.bucket)
            .await
            .map_err(|e| Error::Unhealthy(e.to_string()))
    }
}

/// Uploads job bodies to a bucket.
struct S3Transfer {
    client: Client,
    bucket: String,
}

/// Largest single read into a part buffer.
const READ_CHUNK: usize = 64 * 1024;

/// Read up to [`PART_SIZE`] bytes. A short part means the body is exhausted.
async fn read_part(body: &mut BlobReader) -> Result<Bytes> {
    let mut buf = BytesMut::new();
    fill_part(body, &mut buf).await?;
    Ok(buf.freeze())
}

/// Fill `buf` up to [`PART_SIZE`], growing it only as data arrives.
async fn fill_part(body: &mut BlobReader, buf: &mut BytesMut) -> Result<()> {
    while buf.len() < PART_SIZE {
        let want = (PART_SIZE - buf.len()).min(READ_CHUNK);
        buf.reserve(want);
        if (&mut *body).take(want as u64).read_buf(buf).await? == 0 {
            break;
        }
    }
    Ok(())
}

impl S3Transfer {
    async fn put(&self, path: &str, content_type: &str, part: Bytes) -> Result<u64> {
        let size = part.len() as u64;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(path)
            .content_type(content_type)
            .body(ByteStream::from(part))
            .send()
            .await
            .map_err(object_store_error)?;
        Ok(size)
    }

    async fn multipart(
        &self,
        path: &str,
        content_type: &str,
        first: Bytes,
        body: &mut BlobReader,
    ) -> Result<u64> {
        let created = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(path)
            .content_type(content_type)
            .send()
            .await
            .map_err(object_store_error)?;
        let upload_id = created
            .upload_id()
            .ok_or_else(|| Error::ObjectStore(format!("no upload id for {}", path)))?
            .to_string();

        let (parts, size) = match self.upload_parts(path, &upload_id, first, body).await {
            Ok(uploaded) => uploaded,
            Err(e) => {
                if let Err(abort) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.bucket)
                    .key(path)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    warn!(%path, error = %DisplayErrorContext(&abort), "abort multipart upload failed");
                }
                return Err(e);
            }
        };

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(path)
            .upload_id(&upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(object_store_error)?;
        Ok(size)
    }

    async fn upload_parts(
        &self,
        path: &str,
        upload_id: &str,
        first: Bytes,
        body: &mut BlobReader,
    ) -> Result<(Vec<CompletedPart>, u64)> {
        let mut parts = Vec::new();
        let mut size = 0u64;
        let mut part = first;

        while !part.is_empty() {
            let number = parts.len() as i32 + 1;
            size += part.len() as u64;

            let output = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(path)
                .upload_id(upload_id)
                .part_number(number)
                .body(ByteStream::from(part))
                .send()
                .await
                .map_err(object_store_error)?;
            debug!(%path, part = number, "uploaded part");

            parts.push(
                CompletedPart::builder()
                    .set_e_tag(output.e_tag().map(str::to_string))
                    .part_number(number)
                    .build(),
            );
            part = read_part(body).await?;
        }

        Ok((parts, size))
    }
}

#[async_trait]
impl Transfer for S3Transfer {
    async fn transfer(&self, path: &str, content_type: &str, body: &mut BlobReader) -> Result<u64> {
        let first = read_part(body).await?;
        if first.len() < PART_SIZE {
            self.put(path, content_type, first).await
        } else {
            self.multipart(path, content_type, first, body).await
        }
    }
}
