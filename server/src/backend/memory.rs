//! In-process document store.
//!
//! Collections are kept in a `DashMap` keyed by path, documents in insertion
//! order. Live queries are driven by a broadcast channel of store events: each
//! listener re-runs its query when its collection changes and pushes the full
//! result. Access follows the owner rules of the hosted store: a caller may
//! only read or write the collection under its own uid, and written documents
//! must carry that uid in their owner field.
//!
//! A store opened with [`MemoryBackend::persistent`] mirrors its collections,
//! its signed-in user and its issued tokens into a Sled tree, so a restart
//! sees the same session and documents. Custom tokens signed with the
//! project's API key are accepted as well as tokens issued in process.

use async_trait::async_trait;
use dashmap::DashMap;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use parking_lot::RwLock;
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use sled::Tree;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use super::{
    BackendError, BackendResult, BackendUser, CollectionPath, DocumentBackend, Document, Query,
    SnapshotReceiver,
};
use crate::sync::OWNER_FIELD;

/// Length of generated document ids
const DOCUMENT_ID_LEN: usize = 20;

/// Length of generated uids
const UID_LEN: usize = 28;

/// Key of the signed-in user in the durable tree
const USER_KEY: &str = "currentUser";

/// Prefix of collection keys in the durable tree
const COLLECTION_PREFIX: &str = "collection:";

/// Prefix of issued-token keys in the durable tree
const TOKEN_PREFIX: &str = "token:";

/// Claims of a custom token signed with the project's API key
#[derive(Debug, Serialize, Deserialize)]
struct CustomTokenClaims {
    uid: String,
    aud: String,
    iat: i64,
}

/// Signs and verifies custom tokens for one project
#[derive(Clone)]
struct TokenSigner {
    secret: String,
    audience: String,
}

impl TokenSigner {
    fn mint(&self, uid: &str) -> BackendResult<String> {
        let claims = CustomTokenClaims {
            uid: uid.to_string(),
            aud: self.audience.clone(),
            iat: chrono::Utc::now().timestamp(),
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| BackendError::Init(format!("cannot sign custom token: {}", e)))
    }

    fn verify(&self, token: &str) -> Option<String> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.required_spec_claims.clear();
        validation.set_audience(&[&self.audience]);

        decode::<CustomTokenClaims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .ok()
        .map(|data| data.claims.uid)
        .filter(|uid| !uid.is_empty())
    }
}

/// Events fanned out to live listeners
#[derive(Debug, Clone)]
enum StoreEvent {
    /// A document was written to the collection at this path
    Written(String),
    /// The backend session ended
    SignedOut,
    /// The store became unreachable
    WentOffline,
}

struct MemoryInner {
    project_id: String,
    collections: DashMap<String, Vec<Document>>,
    current_user: RwLock<Option<BackendUser>>,
    custom_tokens: DashMap<String, String>,
    available: AtomicBool,
    write_latency: RwLock<Duration>,
    events_tx: broadcast::Sender<StoreEvent>,
    signer: RwLock<Option<TokenSigner>>,
    durable: Option<Tree>,
}

impl MemoryInner {
    fn snapshot(&self, query: &Query) -> Vec<Document> {
        self.collections
            .get(&query.path.to_string())
            .map(|docs| {
                docs.iter()
                    .filter(|doc| query.matches(&doc.data))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn ensure_available(&self) -> BackendResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BackendError::Unavailable("document store is unreachable".to_string()))
        }
    }

    fn authorize(&self, path: &CollectionPath) -> BackendResult<String> {
        let user = self
            .current_user
            .read()
            .clone()
            .ok_or_else(|| BackendError::PermissionDenied("no signed-in user".to_string()))?;

        if path.user_id() != user.uid {
            return Err(BackendError::PermissionDenied(format!(
                "{} may not access {}",
                user.uid, path
            )));
        }
        Ok(user.uid)
    }

    /// Write `value` under `key` in the durable tree, if there is one
    fn persist<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> BackendResult<()> {
        let Some(tree) = &self.durable else {
            return Ok(());
        };
        let bytes = serde_json::to_vec(value).map_err(storage_error)?;
        tree.insert(key.as_bytes(), bytes).map_err(storage_error)?;
        tree.flush().map_err(storage_error)?;
        Ok(())
    }

    fn forget(&self, key: &str) -> BackendResult<()> {
        if let Some(tree) = &self.durable {
            tree.remove(key.as_bytes()).map_err(storage_error)?;
            tree.flush().map_err(storage_error)?;
        }
        Ok(())
    }

    fn set_current_user(&self, user: &BackendUser) -> BackendResult<()> {
        self.persist(USER_KEY, user)?;
        *self.current_user.write() = Some(user.clone());
        Ok(())
    }

    fn load(&self, tree: &Tree) -> BackendResult<()> {
        for entry in tree.scan_prefix(COLLECTION_PREFIX) {
            let (key, value) = entry.map_err(storage_error)?;
            let path = String::from_utf8_lossy(&key[COLLECTION_PREFIX.len()..]).into_owned();
            let docs: Vec<Document> = serde_json::from_slice(&value).map_err(storage_error)?;
            self.collections.insert(path, docs);
        }

        for entry in tree.scan_prefix(TOKEN_PREFIX) {
            let (key, value) = entry.map_err(storage_error)?;
            let token = String::from_utf8_lossy(&key[TOKEN_PREFIX.len()..]).into_owned();
            let uid: String = serde_json::from_slice(&value).map_err(storage_error)?;
            self.custom_tokens.insert(token, uid);
        }

        if let Some(bytes) = tree.get(USER_KEY).map_err(storage_error)? {
            let user: BackendUser = serde_json::from_slice(&bytes).map_err(storage_error)?;
            *self.current_user.write() = Some(user);
        }
        Ok(())
    }
}

fn storage_error(e: impl std::fmt::Display) -> BackendError {
    BackendError::Storage(e.to_string())
}

/// Document store living in this process
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<MemoryInner>,
}

impl MemoryBackend {
    /// Store whose contents end with the process
    pub fn new(project_id: impl Into<String>) -> Self {
        Self::build(project_id.into(), None)
    }

    /// Store mirrored into `tree`, resuming whatever an earlier run left there
    pub fn persistent(project_id: impl Into<String>, tree: Tree) -> BackendResult<Self> {
        let backend = Self::build(project_id.into(), Some(tree.clone()));
        backend.inner.load(&tree)?;

        info!(
            "Document store {} resumed with {} collections",
            backend.inner.project_id,
            backend.inner.collections.len()
        );
        Ok(backend)
    }

    fn build(project_id: String, durable: Option<Tree>) -> Self {
        let (events_tx, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(MemoryInner {
                project_id,
                collections: DashMap::new(),
                current_user: RwLock::new(None),
                custom_tokens: DashMap::new(),
                available: AtomicBool::new(true),
                write_latency: RwLock::new(Duration::ZERO),
                events_tx,
                signer: RwLock::new(None),
                durable,
            }),
        }
    }

    /// Accept custom tokens signed with `secret` for `audience`
    pub fn with_token_signing(
        self,
        secret: impl Into<String>,
        audience: impl Into<String>,
    ) -> Self {
        *self.inner.signer.write() = Some(TokenSigner {
            secret: secret.into(),
            audience: audience.into(),
        });
        self
    }

    /// Start with an existing signed-in session for `uid`
    pub fn with_user(self, uid: impl Into<String>) -> Self {
        let user = BackendUser {
            uid: uid.into(),
            is_anonymous: false,
        };
        if let Err(e) = self.inner.set_current_user(&user) {
            warn!("Could not store session for {}: {}", user.uid, e);
        }
        self
    }

    /// Delay every write by `latency`
    pub fn with_write_latency(self, latency: Duration) -> Self {
        *self.inner.write_latency.write() = latency;
        self
    }

    pub fn project_id(&self) -> &str {
        &self.inner.project_id
    }

    /// Register a custom token that signs in as `uid`
    pub fn issue_custom_token(&self, uid: impl Into<String>) -> BackendResult<String> {
        let token = random_id(32);
        let uid = uid.into();
        self.inner
            .persist(&format!("{}{}", TOKEN_PREFIX, token), &uid)?;
        self.inner.custom_tokens.insert(token.clone(), uid);
        Ok(token)
    }

    /// Sign a custom token for `uid` with this store's signing key
    pub fn mint_custom_token(&self, uid: &str) -> BackendResult<String> {
        match self.inner.signer.read().as_ref() {
            Some(signer) => signer.mint(uid),
            None => Err(BackendError::Init("no token signing key configured".to_string())),
        }
    }

    /// Toggle reachability. Going offline terminates every live listener.
    pub fn set_available(&self, available: bool) {
        let was = self.inner.available.swap(available, Ordering::SeqCst);
        if was && !available {
            warn!("Document store {} went offline", self.inner.project_id);
            let _ = self.inner.events_tx.send(StoreEvent::WentOffline);
        }
    }

    /// All documents at `path`, in insertion order
    pub fn documents(&self, path: &CollectionPath) -> Vec<Document> {
        self.inner
            .collections
            .get(&path.to_string())
            .map(|docs| docs.clone())
            .unwrap_or_default()
    }

    /// Number of live listeners currently attached
    pub fn listener_count(&self) -> usize {
        self.inner.events_tx.receiver_count()
    }
}

#[async_trait]
impl DocumentBackend for MemoryBackend {
    async fn current_user(&self) -> Option<BackendUser> {
        self.inner.current_user.read().clone()
    }

    async fn sign_in_with_custom_token(&self, token: &str) -> BackendResult<BackendUser> {
        self.inner.ensure_available()?;

        let issued = self.inner.custom_tokens.get(token).map(|uid| uid.clone());
        let uid = match issued {
            Some(uid) => uid,
            None => self
                .inner
                .signer
                .read()
                .as_ref()
                .and_then(|signer| signer.verify(token))
                .ok_or(BackendError::InvalidCustomToken)?,
        };

        let user = BackendUser {
            uid,
            is_anonymous: false,
        };
        self.inner.set_current_user(&user)?;
        info!("Backend sign-in with custom token: {}", user.uid);
        Ok(user)
    }

    async fn sign_in_anonymously(&self) -> BackendResult<BackendUser> {
        self.inner.ensure_available()?;

        let user = BackendUser {
            uid: random_id(UID_LEN),
            is_anonymous: true,
        };
        self.inner.set_current_user(&user)?;
        info!("Backend anonymous sign-in: {}", user.uid);
        Ok(user)
    }

    async fn sign_out(&self) -> BackendResult<()> {
        self.inner.forget(USER_KEY)?;
        if self.inner.current_user.write().take().is_some() {
            let _ = self.inner.events_tx.send(StoreEvent::SignedOut);
            info!("Backend session ended");
        }
        Ok(())
    }

    async fn add_document(
        &self,
        path: &CollectionPath,
        data: serde_json::Value,
    ) -> BackendResult<String> {
        self.inner.ensure_available()?;

        let latency = *self.inner.write_latency.read();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let uid = self.inner.authorize(path)?;
        if data.get(OWNER_FIELD).and_then(|v| v.as_str()) != Some(uid.as_str()) {
            return Err(BackendError::PermissionDenied(format!(
                "document owner must be {}",
                uid
            )));
        }

        let id = random_id(DOCUMENT_ID_LEN);
        let key = path.to_string();
        {
            let mut docs = self.inner.collections.entry(key.clone()).or_default();
            docs.push(Document {
                id: id.clone(),
                data,
            });
            // A write that cannot be made durable is not acknowledged
            if let Err(e) = self
                .inner
                .persist(&format!("{}{}", COLLECTION_PREFIX, key), docs.as_slice())
            {
                docs.pop();
                return Err(e);
            }
        }

        debug!("Stored document {} in {}", id, key);
        let _ = self.inner.events_tx.send(StoreEvent::Written(key));
        Ok(id)
    }

    async fn listen(&self, query: Query) -> BackendResult<SnapshotReceiver> {
        self.inner.ensure_available()?;
        self.inner.authorize(&query.path)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let mut events = self.inner.events_tx.subscribe();
        let inner = self.inner.clone();
        let key = query.path.to_string();

        let _ = tx.send(Ok(inner.snapshot(&query)));

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    event = events.recv() => {
                        let next = match event {
                            Ok(StoreEvent::Written(path)) if path == key => Ok(inner.snapshot(&query)),
                            Ok(StoreEvent::Written(_)) => continue,
                            Ok(StoreEvent::SignedOut) => Err(BackendError::PermissionDenied(
                                "backend session ended".to_string(),
                            )),
                            Ok(StoreEvent::WentOffline) => Err(BackendError::Unavailable(
                                "document store is unreachable".to_string(),
                            )),
                            // Every item is a full result, so a missed event only needs a refresh
                            Err(broadcast::error::RecvError::Lagged(_)) => Ok(inner.snapshot(&query)),
                            Err(broadcast::error::RecvError::Closed) => break,
                        };

                        let terminal = next.is_err();
                        if tx.send(next).is_err() || terminal {
                            break;
                        }
                    }
                }
            }
            debug!("Listener on {} released", key);
        });

        Ok(rx)
    }

    fn is_durable(&self) -> bool {
        self.inner.durable.is_some()
    }
}

fn random_id(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
