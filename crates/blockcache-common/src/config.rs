//! Configuration types for blockcache

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Alignment requirement for direct I/O (offsets, lengths and buffer
/// addresses must all be multiples of it)
pub const ALIGNMENT: usize = 4096;

/// Cache engine configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Size of one cached page and of every backing-store transfer
    #[serde(default = "default_block_size")]
    pub block_size: usize,
    /// Maximum number of resident pages
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Open backing files with O_DIRECT (Linux) / F_NOCACHE (macOS).
    /// Some filesystems (tmpfs, overlayfs) reject O_DIRECT.
    #[serde(default = "default_direct_io")]
    pub direct_io: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            block_size: default_block_size(),
            capacity: default_capacity(),
            direct_io: default_direct_io(),
        }
    }
}

fn default_block_size() -> usize {
    16 * 1024 // 16 KB
}

fn default_capacity() -> usize {
    512
}

fn default_direct_io() -> bool {
    true
}

impl CacheConfig {
    /// Create a configuration with direct I/O enabled
    #[must_use]
    pub fn new(block_size: usize, capacity: usize) -> Self {
        Self {
            block_size,
            capacity,
            direct_io: true,
        }
    }

    /// Toggle direct I/O on the backing files
    #[must_use]
    pub fn with_direct_io(mut self, direct_io: bool) -> Self {
        self.direct_io = direct_io;
        self
    }

    /// Total bytes the resident pages may occupy
    #[must_use]
    pub fn max_bytes(&self) -> usize {
        self.block_size.saturating_mul(self.capacity)
    }

    /// Reject configurations the cache cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(Error::configuration("block_size must be non-zero"));
        }
        if self.block_size % ALIGNMENT != 0 {
            return Err(Error::configuration(format!(
                "block_size {} is not a multiple of {}",
                self.block_size, ALIGNMENT
            )));
        }
        if self.capacity == 0 {
            return Err(Error::configuration("capacity must be at least one page"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert_eq!(config.block_size, 16384);
        assert_eq!(config.capacity, 512);
        assert!(config.direct_io);
        assert_eq!(config.max_bytes(), 8 * 1024 * 1024);
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(CacheConfig::new(0, 4).validate().is_err());
        assert!(CacheConfig::new(1000, 4).validate().is_err());
        assert!(CacheConfig::new(4096, 0).validate().is_err());
        assert!(CacheConfig::new(8192, 1).validate().is_ok());
    }

    #[test]
    fn test_deserialize_partial() {
        let config: CacheConfig = toml::from_str("capacity = 2\ndirect_io = false\n").unwrap();
        assert_eq!(config.block_size, 16384);
        assert_eq!(config.capacity, 2);
        assert!(!config.direct_io);
    }
}
