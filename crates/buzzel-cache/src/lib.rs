//! Storage backends and the in-memory eviction cache for buzzel.

pub mod disk;
pub mod eviction;
pub mod mem;
pub mod s3;

pub use disk::DiskBackend;
pub use eviction::EvictionCache;
pub use mem::MemBackend;
pub use s3::{S3Backend, S3Options, Transfer, UploadJob, Uploader};
