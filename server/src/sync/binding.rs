//! Live binding between a session and its book collection.
//!
//! A [`Subscription`] owns the listener task. Handlers sit behind a mutex that
//! disposal empties, so once `unsubscribe` returns (or the subscription is
//! dropped) neither handler runs again, even if a snapshot was already in
//! flight.

use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{BookRecord, SessionMode, OWNER_FIELD};
use crate::backend::{CollectionPath, Document, Query};

/// A live query failed. The subscription is dead after this.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Subscription failed: {cause}")]
pub struct SubscriptionError {
    pub cause: String,
}

impl SubscriptionError {
    pub fn new(cause: impl Into<String>) -> Self {
        Self {
            cause: cause.into(),
        }
    }
}

type SnapshotHandler = Box<dyn FnMut(Vec<BookRecord>) + Send>;
type ErrorHandler = Box<dyn FnMut(SubscriptionError) + Send>;

struct Handlers {
    on_snapshot: SnapshotHandler,
    on_error: ErrorHandler,
}

type SharedHandlers = Arc<Mutex<Option<Handlers>>>;

/// Binds sessions to `artifacts/{appId}/users/{userId}/books`
#[derive(Debug, Clone)]
pub struct CollectionBinding {
    app_id: String,
}

impl CollectionBinding {
    pub fn new(app_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
        }
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// Collection holding `user_id`'s books
    pub fn path_for(&self, user_id: &str) -> CollectionPath {
        CollectionPath::books(&self.app_id, user_id)
    }

    /// Live query over `user_id`'s books
    pub fn query_for(&self, user_id: &str) -> Query {
        Query::new(self.path_for(user_id)).where_eq(OWNER_FIELD, user_id)
    }

    /// Subscribe to the session user's books.
    ///
    /// In backend mode every change delivers the complete ordered list to
    /// `on_snapshot`. A failure is delivered once to `on_error` and ends the
    /// subscription; there is no retry. Without a backend, `on_snapshot` is
    /// called once with an empty list before this returns and the returned
    /// subscription is inert.
    pub fn subscribe<S, E>(&self, mode: &SessionMode, on_snapshot: S, on_error: E) -> Subscription
    where
        S: FnMut(Vec<BookRecord>) + Send + 'static,
        E: FnMut(SubscriptionError) + Send + 'static,
    {
        let mut handlers = Handlers {
            on_snapshot: Box::new(on_snapshot),
            on_error: Box::new(on_error),
        };

        let (handle, user_id) = match mode {
            SessionMode::Backend {
                handle, user_id, ..
            } => (handle.clone(), user_id.clone()),
            other => {
                debug!("No live collection in {} mode", other.name());
                (handlers.on_snapshot)(Vec::new());
                return Subscription::inert();
            }
        };

        let shared: SharedHandlers = Arc::new(Mutex::new(Some(handlers)));
        let query = self.query_for(&user_id);
        let task_handlers = shared.clone();

        let task = tokio::spawn(async move {
            let path = query.path.to_string();
            let mut rx = match handle.listen(query).await {
                Ok(rx) => rx,
                Err(e) => {
                    warn!("Could not listen on {}: {}", path, e);
                    deliver_error(&task_handlers, SubscriptionError::new(e.to_string()));
                    return;
                }
            };
            info!("Listening on {}", path);

            while let Some(item) = rx.recv().await {
                match item {
                    Ok(docs) => {
                        let books = decode_snapshot(docs, &user_id);
                        if !deliver_snapshot(&task_handlers, books) {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Listener on {} failed: {}", path, e);
                        deliver_error(&task_handlers, SubscriptionError::new(e.to_string()));
                        break;
                    }
                }
            }
            debug!("Stopped listening on {}", path);
        });

        Subscription {
            handlers: shared,
            task: Some(task),
        }
    }
}

/// Convert stored documents, skipping ones that do not decode or belong to
/// someone else
fn decode_snapshot(docs: Vec<Document>, user_id: &str) -> Vec<BookRecord> {
    docs.into_iter()
        .filter_map(|doc| match BookRecord::from_document(&doc.id, &doc.data) {
            Ok(record) if record.is_owned_by(user_id) => Some(record),
            Ok(record) => {
                warn!("Skipping document {} owned by {}", doc.id, record.owner_id);
                None
            }
            Err(e) => {
                warn!("Skipping undecodable document {}: {}", doc.id, e);
                None
            }
        })
        .collect()
}

/// Returns false once the subscription has been disposed
fn deliver_snapshot(handlers: &SharedHandlers, books: Vec<BookRecord>) -> bool {
    match handlers.lock().as_mut() {
        Some(h) => {
            (h.on_snapshot)(books);
            true
        }
        None => false,
    }
}

fn deliver_error(handlers: &SharedHandlers, error: SubscriptionError) {
    // Terminal: the handlers are never needed again
    if let Some(mut h) = handlers.lock().take() {
        (h.on_error)(error);
    }
}

/// Handle to a live collection binding
pub struct Subscription {
    handlers: SharedHandlers,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    fn inert() -> Self {
        Self {
            handlers: Arc::new(Mutex::new(None)),
            task: None,
        }
    }

    /// Whether handlers can still be invoked
    pub fn is_active(&self) -> bool {
        self.handlers.lock().is_some()
    }

    /// Stop listening. No handler runs after this returns.
    pub fn unsubscribe(mut self) {
        self.dispose();
    }

    fn dispose(&mut self) {
        self.handlers.lock().take();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.dispose();
    }
}
