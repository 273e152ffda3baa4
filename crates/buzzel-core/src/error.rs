//! Error types for buzzel.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The object is absent, or the key is not a valid digest.
    #[error("cache: not found")]
    NotFound,

    #[error("disk cache: key is dir: {}", .0.display())]
    KeyIsDir(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Object store error: {0}")]
    ObjectStore(String),

    #[error("Unhealthy: {0}")]
    Unhealthy(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether this error should be reported to clients as a missing object.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_is_distinct_from_io() {
        assert!(Error::NotFound.is_not_found());
        assert!(!Error::KeyIsDir(PathBuf::from("ac/9f")).is_not_found());

        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(!Error::from(io).is_not_found());
    }

    #[test]
    fn test_key_is_dir_message() {
        let err = Error::KeyIsDir(PathBuf::from("/tmp/ac/9f"));
        assert_eq!(err.to_string(), "disk cache: key is dir: /tmp/ac/9f");
    }
}
