//! Durable client storage backed by Sled.
//!
//! This module keeps the small amount of state that has to survive a restart
//! of the client: the signed-in profile, the offline book list, and the
//! stable identifier used when no backend is configured. Values are stored as
//! JSON so they stay readable and match the shape the hosted documents use.

mod sled_store;

pub use sled_store::{LocalStore, StorageError, StorageResult, StorageStats};

/// Key under which the signed-in profile is stored
pub const PROFILE_KEY: &str = "userProfile";

/// Key under which the offline book list is stored
pub const BOOKS_KEY: &str = "books";

/// Key under which the offline user id is stored
pub const LOCAL_USER_KEY: &str = "localUserId";

/// Configuration for the storage layer
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Path to the Sled database directory
    pub path: String,
    /// Cache size in bytes (default: 64MB)
    pub cache_size: u64,
    /// Background flush interval in milliseconds. 0 turns background flushing
    /// off; writes then reach disk on [`LocalStore::flush`] or when the last
    /// handle is dropped.
    pub flush_interval_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: "./data/bookshelf.sled".to_string(),
            cache_size: 64 * 1024 * 1024,
            flush_interval_ms: 500,
        }
    }
}

impl StorageConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_cache_size(mut self, size: u64) -> Self {
        self.cache_size = size;
        self
    }

    pub fn with_flush_interval(mut self, ms: u64) -> Self {
        self.flush_interval_ms = ms;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_config_default() {
        let config = StorageConfig::default();
        assert_eq!(config.path, "./data/bookshelf.sled");
        assert_eq!(config.cache_size, 64 * 1024 * 1024);
    }

    #[test]
    fn test_storage_config_builder() {
        let config = StorageConfig::new("/tmp/shelf.sled")
            .with_cache_size(1024)
            .with_flush_interval(0);

        assert_eq!(config.path, "/tmp/shelf.sled");
        assert_eq!(config.cache_size, 1024);
        assert_eq!(config.flush_interval_ms, 0);
    }
}
