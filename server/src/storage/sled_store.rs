//! Sled-based implementation of the durable client store.
//!
//! Three trees are kept:
//! - `profile` for the signed-in user profile
//! - `books` for the offline book list (a single JSON array, insertion order)
//! - `device` for values tied to this installation, like the offline user id
//!
//! The document store opens one more tree per backend project through
//! [`LocalStore::backend_tree`].

use serde::{de::DeserializeOwned, Serialize};
use sled::{Db, Tree};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use super::{StorageConfig, BOOKS_KEY, LOCAL_USER_KEY, PROFILE_KEY};
use crate::identity::UserProfile;
use crate::sync::BookRecord;

/// Errors that can occur during storage operations
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Sled database error: {0}")]
    Sled(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage initialization failed: {0}")]
    InitFailed(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

const TREE_PROFILE: &str = "profile";
const TREE_BOOKS: &str = "books";
const TREE_DEVICE: &str = "device";
const TREE_BACKEND_PREFIX: &str = "backend:";

/// Sled-backed key-value store for client state
#[derive(Clone)]
pub struct LocalStore {
    db: Arc<Db>,
    profile: Tree,
    books: Tree,
    device: Tree,
}

impl LocalStore {
    /// Open or create a store at the configured path
    pub fn open(config: StorageConfig) -> StorageResult<Self> {
        let path = Path::new(&config.path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::InitFailed(format!("Failed to create directory: {}", e))
            })?;
        }

        let db = sled::Config::new()
            .path(&config.path)
            .cache_capacity(config.cache_size)
            .flush_every_ms(if config.flush_interval_ms > 0 {
                Some(config.flush_interval_ms)
            } else {
                None
            })
            .open()?;

        Self::from_db(db)
    }

    /// Open a throwaway store that lives only in memory
    pub fn temporary() -> StorageResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> StorageResult<Self> {
        let profile = db.open_tree(TREE_PROFILE)?;
        let books = db.open_tree(TREE_BOOKS)?;
        let device = db.open_tree(TREE_DEVICE)?;

        Ok(Self {
            db: Arc::new(db),
            profile,
            books,
            device,
        })
    }

    /// Persist the signed-in profile
    pub fn save_profile(&self, profile: &UserProfile) -> StorageResult<()> {
        put_json(&self.profile, PROFILE_KEY, profile)
    }

    /// Load the persisted profile, if any
    pub fn load_profile(&self) -> StorageResult<Option<UserProfile>> {
        get_json(&self.profile, PROFILE_KEY)
    }

    /// Remove the persisted profile. Removing a missing profile is not an error.
    pub fn clear_profile(&self) -> StorageResult<()> {
        self.profile.remove(PROFILE_KEY)?;
        Ok(())
    }

    /// Replace the stored offline book list
    pub fn save_books(&self, books: &[BookRecord]) -> StorageResult<()> {
        put_json(&self.books, BOOKS_KEY, &books)?;
        debug!("Stored {} offline books", books.len());
        Ok(())
    }

    /// Load the stored offline book list (empty if never written)
    pub fn load_books(&self) -> StorageResult<Vec<BookRecord>> {
        Ok(get_json(&self.books, BOOKS_KEY)?.unwrap_or_default())
    }

    /// Append one record to the stored offline book list
    pub fn append_book(&self, book: &BookRecord) -> StorageResult<()> {
        let mut books = self.load_books()?;
        books.push(book.clone());
        self.save_books(&books)
    }

    /// Get the offline user id for this installation, creating it on first use
    pub fn local_user_id(&self) -> StorageResult<String> {
        if let Some(id) = get_json::<String>(&self.device, LOCAL_USER_KEY)? {
            return Ok(id);
        }

        let id = format!("local-{}", uuid::Uuid::new_v4().simple());
        put_json(&self.device, LOCAL_USER_KEY, &id)?;
        Ok(id)
    }

    /// Tree holding the document store's state for `project_id`
    pub fn backend_tree(&self, project_id: &str) -> StorageResult<Tree> {
        let tree = self
            .db
            .open_tree(format!("{}{}", TREE_BACKEND_PREFIX, project_id))?;
        debug!("Opened document store tree for {}", project_id);
        Ok(tree)
    }

    /// Force flush all pending writes to disk
    pub fn flush(&self) -> StorageResult<()> {
        self.db.flush()?;
        Ok(())
    }

    /// Get storage statistics
    pub fn stats(&self) -> StorageStats {
        StorageStats {
            has_profile: self.profile.contains_key(PROFILE_KEY).unwrap_or(false),
            total_size_bytes: self.db.size_on_disk().unwrap_or(0),
        }
    }
}

/// Statistics about the storage
#[derive(Debug, Clone)]
pub struct StorageStats {
    pub has_profile: bool,
    pub total_size_bytes: u64,
}

fn put_json<T: Serialize + ?Sized>(tree: &Tree, key: &str, value: &T) -> StorageResult<()> {
    let bytes = serde_json::to_vec(value)?;
    tree.insert(key.as_bytes(), bytes)?;
    Ok(())
}

fn get_json<T: DeserializeOwned>(tree: &Tree, key: &str) -> StorageResult<Option<T>> {
    match tree.get(key.as_bytes())? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

impl Drop for LocalStore {
    fn drop(&mut self) {
        // Only the last handle flushes
        if Arc::strong_count(&self.db) == 1 {
            let _ = self.flush();
        }
    }
}
