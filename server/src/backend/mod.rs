//! Hosted document store abstraction.
//!
//! The rest of the crate talks to the document store only through
//! [`DocumentBackend`]: session sign-in (existing, custom token, anonymous),
//! document insert by collection path, and live queries filtered by field
//! equality. [`MemoryBackend`] is an in-process implementation with the same
//! owner access rules the hosted store is expected to enforce; [`connect`]
//! opens it over the client's Sled store so documents and the backend session
//! survive a restart.

mod memory;

pub use memory::MemoryBackend;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::info;

use crate::config::BackendConfig;
use crate::storage::LocalStore;

/// Errors reported by the document store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Backend initialization failed: {0}")]
    Init(String),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Custom token rejected")]
    InvalidCustomToken,

    #[error("No backend user is signed in")]
    NotSignedIn,

    #[error("Invalid collection path: {0}")]
    InvalidPath(String),

    #[error("Document storage failed: {0}")]
    Storage(String),
}

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// A user known to the backend's own auth layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendUser {
    pub uid: String,
    pub is_anonymous: bool,
}

/// How the backend user for this session was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendIdentity {
    /// A backend session already existed
    Existing,
    /// Signed in with the bootstrap custom token
    CustomToken,
    /// Signed in anonymously
    Anonymous,
}

/// A stored document: storage-assigned id plus JSON body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub data: serde_json::Value,
}

/// Path of a user's book collection: `artifacts/{appId}/users/{userId}/books`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionPath {
    app_id: String,
    user_id: String,
}

impl CollectionPath {
    pub fn books(app_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            user_id: user_id.into(),
        }
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// The user segment of the path, which scopes ownership
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Parse a path string back into its segments
    pub fn parse(path: &str) -> BackendResult<Self> {
        let segments: Vec<&str> = path.split('/').collect();
        match segments.as_slice() {
            ["artifacts", app_id, "users", user_id, "books"]
                if !app_id.is_empty() && !user_id.is_empty() =>
            {
                Ok(Self::books(*app_id, *user_id))
            }
            _ => Err(BackendError::InvalidPath(path.to_string())),
        }
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "artifacts/{}/users/{}/books", self.app_id, self.user_id)
    }
}

/// Collection query with a single equality filter
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub path: CollectionPath,
    pub field: String,
    pub equals: serde_json::Value,
}

impl Query {
    pub fn new(path: CollectionPath) -> QueryBuilder {
        QueryBuilder { path }
    }

    /// Whether a document body passes the filter
    pub fn matches(&self, data: &serde_json::Value) -> bool {
        data.get(&self.field) == Some(&self.equals)
    }
}

pub struct QueryBuilder {
    path: CollectionPath,
}

impl QueryBuilder {
    pub fn where_eq(self, field: impl Into<String>, value: impl Into<serde_json::Value>) -> Query {
        Query {
            path: self.path,
            field: field.into(),
            equals: value.into(),
        }
    }
}

/// Stream of full result sets for a live query.
///
/// Each item is the complete ordered result at that moment. An `Err` item is
/// terminal: the store stops listening after sending it. Dropping the
/// receiver releases the listener on the store side.
pub type SnapshotReceiver = mpsc::UnboundedReceiver<BackendResult<Vec<Document>>>;

/// Operations the synchronization core needs from the document store
#[async_trait]
pub trait DocumentBackend: Send + Sync {
    /// The currently signed-in backend user, if a session exists
    async fn current_user(&self) -> Option<BackendUser>;

    /// Sign in with a custom token issued for this backend
    async fn sign_in_with_custom_token(&self, token: &str) -> BackendResult<BackendUser>;

    /// Sign in with a fresh anonymous identity
    async fn sign_in_anonymously(&self) -> BackendResult<BackendUser>;

    /// End the backend session. Signing out twice is not an error.
    async fn sign_out(&self) -> BackendResult<()>;

    /// Insert a document and return its storage-assigned id
    async fn add_document(
        &self,
        path: &CollectionPath,
        data: serde_json::Value,
    ) -> BackendResult<String>;

    /// Open a live query
    async fn listen(&self, query: Query) -> BackendResult<SnapshotReceiver>;

    /// Whether written documents outlive this process
    fn is_durable(&self) -> bool {
        true
    }
}

/// Initialize the document store described by `config`.
///
/// Documents and the backend session are kept in `store`, one tree per
/// project. Custom tokens are verified against the API key and must be
/// issued for the project's auth domain.
pub fn connect(
    config: &BackendConfig,
    store: &LocalStore,
) -> BackendResult<Arc<dyn DocumentBackend>> {
    config
        .validate()
        .map_err(|e| BackendError::Init(e.to_string()))?;

    let auth_domain = config.effective_auth_domain();
    info!(
        "Connecting to document store for project {} (auth domain {})",
        config.project_id, auth_domain
    );

    let tree = store
        .backend_tree(&config.project_id)
        .map_err(|e| BackendError::Init(e.to_string()))?;
    let backend = MemoryBackend::persistent(&config.project_id, tree)?
        .with_token_signing(&config.api_key, auth_domain);
    Ok(Arc::new(backend))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_collection_path_format() {
        let path = CollectionPath::books("default-app-id", "user-1");
        assert_eq!(path.to_string(), "artifacts/default-app-id/users/user-1/books");
        assert_eq!(CollectionPath::parse(&path.to_string()), Ok(path));
    }

    #[test]
    fn test_collection_path_rejects_other_shapes() {
        assert!(CollectionPath::parse("artifacts/app/users//books").is_err());
        assert!(CollectionPath::parse("artifacts/app/books").is_err());
        assert!(CollectionPath::parse("users/u/books").is_err());
    }

    #[test]
    fn test_query_matches() {
        let query = Query::new(CollectionPath::books("app", "u1")).where_eq("userId", "u1");

        assert!(query.matches(&json!({ "userId": "u1", "bookName": "Dune" })));
        assert!(!query.matches(&json!({ "userId": "u2" })));
        assert!(!query.matches(&json!({ "bookName": "Dune" })));
    }

    #[test]
    fn test_connect_rejects_invalid_config() {
        let store = LocalStore::temporary().unwrap();
        let config = BackendConfig::new("", "project");
        assert!(matches!(connect(&config, &store), Err(BackendError::Init(_))));

        let config = BackendConfig::new("key", "project");
        assert!(connect(&config, &store).unwrap().is_durable());
    }

    #[tokio::test]
    async fn test_connect_accepts_tokens_for_configured_domain() {
        let store = LocalStore::temporary().unwrap();
        let config = BackendConfig::new("key", "project").with_auth_domain("shelf.example.com");
        let backend = connect(&config, &store).unwrap();

        let issuer = MemoryBackend::new("project").with_token_signing("key", "shelf.example.com");
        let token = issuer.mint_custom_token("uid-7").unwrap();
        assert_eq!(backend.sign_in_with_custom_token(&token).await.unwrap().uid, "uid-7");

        // Without an explicit domain the project default applies
        let default_domain = BackendConfig::new("key", "project");
        let backend = connect(&default_domain, &LocalStore::temporary().unwrap()).unwrap();
        assert_eq!(
            backend.sign_in_with_custom_token(&token).await,
            Err(BackendError::InvalidCustomToken)
        );
    }
}
