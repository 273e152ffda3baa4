//! buzzel core
//!
//! Core domain types, traits, and error handling for the buzzel build cache.
//! This crate has minimal dependencies and defines the shared vocabulary
//! used by the storage backends and the HTTP front end.

pub mod cache;
pub mod error;
pub mod ports;

pub use cache::{Key, Store, resolve};
pub use error::{Error, Result};
pub use ports::{Backend, BlobReader, BlobWriter, HealthCheck, check_health};
