//! Error types for blockcache
//!
//! Every failure is surfaced to the caller; nothing is retried internally.
//! [`Error::kind`] folds the variants into the categories callers are
//! expected to branch on.

use crate::types::HandleId;
use std::path::PathBuf;
use thiserror::Error;

/// Common result type for blockcache operations
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse failure category of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The backing store could not be opened
    OpenFailure,
    /// The backing file identity could not be resolved
    IdentityFailure,
    /// The handle is not registered with the cache
    InvalidHandle,
    /// An aligned transfer buffer could not be allocated
    AllocationFailure,
    /// A read, write, seek or sync against the backing store failed
    IoFailure,
    /// The cache was constructed with an unusable configuration
    InvalidConfig,
}

/// Common error type for blockcache
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to resolve identity of {path}: {source}")]
    Identity {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid handle: {0}")]
    InvalidHandle(HandleId),

    #[error("failed to allocate {size} byte buffer aligned to {alignment}")]
    Allocation { size: usize, alignment: usize },

    #[error("{op} failed at offset {offset}: {source}")]
    Io {
        op: &'static str,
        offset: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("short {op} at offset {offset}: {done} of {expected} bytes")]
    ShortTransfer {
        op: &'static str,
        offset: u64,
        done: usize,
        expected: usize,
    },

    #[error("{failed} of {attempted} dirty pages failed to flush")]
    PartialFlush { failed: usize, attempted: usize },

    #[error("unaligned transfer: {0}")]
    Alignment(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl Error {
    /// Create an I/O error for the given operation and offset
    pub fn io(op: &'static str, offset: u64, source: std::io::Error) -> Self {
        Self::Io { op, offset, source }
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Category of this error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Open { .. } => ErrorKind::OpenFailure,
            Self::Identity { .. } => ErrorKind::IdentityFailure,
            Self::InvalidHandle(_) => ErrorKind::InvalidHandle,
            Self::Allocation { .. } => ErrorKind::AllocationFailure,
            Self::Io { .. }
            | Self::ShortTransfer { .. }
            | Self::PartialFlush { .. }
            | Self::Alignment(_) => ErrorKind::IoFailure,
            Self::Configuration(_) => ErrorKind::InvalidConfig,
        }
    }

    /// Check if this error came from the backing store
    #[must_use]
    pub fn is_io(&self) -> bool {
        self.kind() == ErrorKind::IoFailure
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_error_kinds() {
        let open = Error::Open {
            path: "/nope".into(),
            source: io::Error::from(io::ErrorKind::NotFound),
        };
        assert_eq!(open.kind(), ErrorKind::OpenFailure);
        assert_eq!(
            Error::InvalidHandle(HandleId::new(3)).kind(),
            ErrorKind::InvalidHandle
        );
        assert_eq!(
            Error::Allocation {
                size: 4096,
                alignment: 4096
            }
            .kind(),
            ErrorKind::AllocationFailure
        );
        assert!(
            Error::PartialFlush {
                failed: 1,
                attempted: 3
            }
            .is_io()
        );
        assert!(Error::io("pwrite", 0, io::Error::other("boom")).is_io());
    }

    #[test]
    fn test_error_display() {
        let err = Error::ShortTransfer {
            op: "pwrite",
            offset: 16384,
            done: 512,
            expected: 16384,
        };
        assert_eq!(
            err.to_string(),
            "short pwrite at offset 16384: 512 of 16384 bytes"
        );
        assert_eq!(
            Error::InvalidHandle(HandleId::new(9)).to_string(),
            "invalid handle: #9"
        );
    }
}
