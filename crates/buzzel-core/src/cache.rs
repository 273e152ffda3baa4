//! Cache namespaces, keys, and path resolution.

use crate::{Error, Result};
use std::fmt;

/// Length of a hex-encoded SHA-256 digest.
pub const KEY_LEN: usize = 64;

/// Logical namespace an object lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Store {
    /// Action Cache.
    Ac,
    /// Content-Addressable Store.
    Cas,
}

impl Store {
    pub fn as_str(&self) -> &'static str {
        match self {
            Store::Ac => "ac",
            Store::Cas => "cas",
        }
    }
}

impl fmt::Display for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Store {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ac" => Ok(Store::Ac),
            "cas" => Ok(Store::Cas),
            _ => Err(Error::NotFound),
        }
    }
}

/// A validated object key: 64 lowercase hex characters.
///
/// The key is trusted as given. Content stored under a CAS key is never
/// hashed and compared against it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Key(String);

impl Key {
    /// Parse a key, rejecting anything that is not a lowercase hex digest.
    ///
    /// Malformed keys are reported as [`Error::NotFound`]; the protocol
    /// treats them as absent objects.
    pub fn parse(s: &str) -> Result<Self> {
        let valid = s.len() == KEY_LEN
            && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if valid {
            Ok(Self(s.to_string()))
        } else {
            Err(Error::NotFound)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Two-character prefix used to spread keys across buckets.
    pub fn shard(&self) -> &str {
        &self.0[..2]
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Key {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Key::parse(s)
    }
}

/// Resolve a `(store, key)` pair to its sharded relative path:
/// `store/key[0:2]/key`.
pub fn resolve(store: Store, key: &Key) -> String {
    format!("{}/{}/{}", store, key.shard(), key)
}
