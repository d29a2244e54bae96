//! Core type definitions for blockcache
//!
//! Identifiers shared between the cache engine, its backing-store
//! adapters and the drivers built on top of them.

use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identity of a backing file, independent of any open handle.
///
/// Two handles opened on the same file (or on two hard links of it)
/// resolve to the same identity, so cached pages are shared between them
/// and survive after every handle is closed.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileIdentity {
    /// Device the file lives on
    pub dev: u64,
    /// Inode number within the device
    pub ino: u64,
}

impl FileIdentity {
    #[must_use]
    pub const fn new(dev: u64, ino: u64) -> Self {
        Self { dev, ino }
    }
}

impl fmt::Debug for FileIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileIdentity({}:{})", self.dev, self.ino)
    }
}

impl fmt::Display for FileIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.dev, self.ino)
    }
}

/// Token for an open session on a backing file
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, From, Into,
    Display,
)]
#[display("#{_0}")]
pub struct HandleId(u64);

impl HandleId {
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Key of a resident page: the file it belongs to and its block-aligned
/// byte offset. Offsets alone are never used as keys, since two files
/// routinely share the same block offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageKey {
    pub identity: FileIdentity,
    pub offset: u64,
}

impl PageKey {
    #[must_use]
    pub const fn new(identity: FileIdentity, offset: u64) -> Self {
        Self { identity, offset }
    }
}

impl fmt::Display for PageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.identity, self.offset)
    }
}
