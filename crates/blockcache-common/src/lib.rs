//! blockcache common - shared types and utilities
//!
//! This crate provides the error definitions, configuration and identifier
//! types used by the cache engine and its drivers.

pub mod config;
pub mod error;
pub mod types;

pub use config::{ALIGNMENT, CacheConfig};
pub use error::{Error, ErrorKind, Result};
pub use types::*;
