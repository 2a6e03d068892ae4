//! Local view of the signed-in user's books and the dashboard that owns it.

use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

use super::{BookRecord, CollectionBinding, SessionMode, Subscription, SubscriptionError};
use crate::storage::{LocalStore, StorageResult};

/// Ordered list of the current user's books.
///
/// In backend mode the list is replaced wholesale by every snapshot. Offline,
/// it is seeded from durable storage and grows through [`append_local`], with
/// every append written through to storage.
///
/// Every change bumps a revision published on a watch channel, see
/// [`changes`].
///
/// [`append_local`]: LocalViewModel::append_local
/// [`changes`]: LocalViewModel::changes
pub struct LocalViewModel {
    books: Vec<BookRecord>,
    persistence: Option<LocalStore>,
    revision: watch::Sender<u64>,
}

impl Default for LocalViewModel {
    fn default() -> Self {
        Self::with_books(Vec::new(), None)
    }
}

/// View model shared between the dashboard and the submission pipeline
pub type SharedViewModel = Arc<RwLock<LocalViewModel>>;

impl LocalViewModel {
    /// Empty view fed by live snapshots
    pub fn new() -> Self {
        Self::default()
    }

    fn with_books(books: Vec<BookRecord>, persistence: Option<LocalStore>) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            books,
            persistence,
            revision,
        }
    }

    /// View over the books `owner` stored offline in `store`
    pub fn offline(store: LocalStore, owner: &str) -> Self {
        let books = match store.load_books() {
            Ok(books) => books.into_iter().filter(|b| b.is_owned_by(owner)).collect(),
            Err(e) => {
                warn!("Offline book list unreadable, starting empty: {}", e);
                Vec::new()
            }
        };

        Self::with_books(books, Some(store))
    }

    pub fn shared(self) -> SharedViewModel {
        Arc::new(RwLock::new(self))
    }

    /// Replace the list with a full snapshot
    pub fn absorb(&mut self, snapshot: Vec<BookRecord>) {
        self.books = snapshot;
        self.bump();
    }

    /// Append a record created without a backend.
    ///
    /// When the view is persistent the record is stored first; on a storage
    /// failure the in-memory list is left unchanged.
    pub fn append_local(&mut self, record: BookRecord) -> StorageResult<()> {
        if let Some(store) = &self.persistence {
            store.append_book(&record)?;
        }
        self.books.push(record);
        self.bump();
        Ok(())
    }

    /// Watch the list's revision. The receiver errors once the view is dropped.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    fn bump(&self) {
        self.revision.send_modify(|revision| *revision += 1);
    }

    pub fn books(&self) -> &[BookRecord] {
        &self.books
    }

    pub fn count(&self) -> usize {
        self.books.len()
    }

    pub fn is_persistent(&self) -> bool {
        self.persistence.is_some()
    }
}

#[derive(Debug, Default)]
struct DashboardStatus {
    loading: bool,
    last_error: Option<SubscriptionError>,
}

/// The signed-in user's dashboard.
///
/// Opening it binds the view model to the session's collection (or to the
/// offline list). Closing it, or dropping it, releases the subscription.
pub struct Dashboard {
    view_model: SharedViewModel,
    status: Arc<RwLock<DashboardStatus>>,
    subscription: Option<Subscription>,
}

impl Dashboard {
    pub fn open(mode: &SessionMode, binding: &CollectionBinding, store: &LocalStore) -> Self {
        let view_model = match mode {
            SessionMode::Offline { user_id } => {
                LocalViewModel::offline(store.clone(), user_id).shared()
            }
            _ => LocalViewModel::new().shared(),
        };
        let status = Arc::new(RwLock::new(DashboardStatus {
            loading: true,
            last_error: None,
        }));

        if let SessionMode::Offline { user_id } = mode {
            // The stored list is already loaded; the binding only signals readiness
            let status_on_ready = status.clone();
            let _ = binding.subscribe(
                mode,
                move |_| status_on_ready.write().loading = false,
                |_| {},
            );
            info!(
                "Dashboard opened offline for {} with {} books",
                user_id,
                view_model.read().count()
            );
            return Self {
                view_model,
                status,
                subscription: None,
            };
        }

        let snapshot_vm = view_model.clone();
        let snapshot_status = status.clone();
        let error_status = status.clone();
        let subscription = binding.subscribe(
            mode,
            move |books| {
                snapshot_vm.write().absorb(books);
                snapshot_status.write().loading = false;
            },
            move |error| {
                let mut status = error_status.write();
                status.loading = false;
                status.last_error = Some(error);
            },
        );

        info!("Dashboard opened in {} mode for {}", mode.name(), mode.user_id());
        Self {
            view_model,
            status,
            subscription: Some(subscription),
        }
    }

    pub fn view_model(&self) -> SharedViewModel {
        self.view_model.clone()
    }

    /// Current book list, in collection order
    pub fn books(&self) -> Vec<BookRecord> {
        self.view_model.read().books().to_vec()
    }

    pub fn count(&self) -> usize {
        self.view_model.read().count()
    }

    /// True until the first snapshot (or error) arrives
    pub fn is_loading(&self) -> bool {
        self.status.read().loading
    }

    /// The error that ended the live binding, if any
    pub fn last_error(&self) -> Option<SubscriptionError> {
        self.status.read().last_error.clone()
    }

    pub fn close(mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendIdentity, DocumentBackend, MemoryBackend};
    use crate::sync::Genre;
    use std::collections::BTreeSet;
    use std::time::Duration;

    fn record(id: &str, owner: &str) -> BookRecord {
        BookRecord {
            id: id.to_string(),
            book_name: format!("Book {}", id),
            author: "Author".to_string(),
            review: "Review".to_string(),
            genres: BTreeSet::from([Genre::History]),
            rating: 4,
            date_added: "3/4/2026".to_string(),
            owner_id: owner.to_string(),
        }
    }

    async fn wait_until<F: Fn() -> bool>(check: F) {
        for _ in 0..100 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[test]
    fn test_absorb_replaces_list() {
        let mut vm = LocalViewModel::new();
        vm.absorb(vec![record("A", "u")]);
        vm.absorb(vec![record("A", "u"), record("B", "u")]);

        let ids: Vec<_> = vm.books().iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B"]);
        assert!(!vm.is_persistent());

        vm.absorb(Vec::new());
        assert_eq!(vm.count(), 0);
    }

    #[test]
    fn test_offline_view_filters_by_owner_and_persists() {
        let store = LocalStore::temporary().unwrap();
        store
            .save_books(&[record("1", "me"), record("2", "someone-else")])
            .unwrap();

        let mut vm = LocalViewModel::offline(store.clone(), "me");
        assert_eq!(vm.count(), 1);

        vm.append_local(record("3", "me")).unwrap();
        assert_eq!(vm.count(), 2);

        // Other owners' records survive the write-through
        let stored: Vec<_> = store.load_books().unwrap().into_iter().map(|b| b.id).collect();
        assert_eq!(stored, vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn test_changes_signal_every_update() {
        let mut vm = LocalViewModel::offline(LocalStore::temporary().unwrap(), "me");
        let mut changes = vm.changes();
        assert!(!changes.has_changed().unwrap());

        vm.append_local(record("1", "me")).unwrap();
        changes.changed().await.unwrap();
        assert_eq!(*changes.borrow_and_update(), 1);

        vm.absorb(Vec::new());
        changes.changed().await.unwrap();
        assert_eq!(*changes.borrow_and_update(), 2);

        drop(vm);
        assert!(changes.changed().await.is_err());
    }

    #[test]
    fn test_offline_dashboard_loads_stored_books() {
        let store = LocalStore::temporary().unwrap();
        store.save_books(&[record("1", "local-1")]).unwrap();
        let mode = SessionMode::Offline {
            user_id: "local-1".to_string(),
        };

        let dashboard = Dashboard::open(&mode, &CollectionBinding::new("app"), &store);

        assert!(!dashboard.is_loading());
        assert_eq!(dashboard.count(), 1);
        assert!(dashboard.last_error().is_none());
        dashboard.close();
    }

    #[test]
    fn test_degraded_dashboard_is_empty() {
        let store = LocalStore::temporary().unwrap();
        store.save_books(&[record("1", "fallback-x")]).unwrap();
        let mode = SessionMode::Degraded {
            user_id: "fallback-x".to_string(),
            cause: "unreachable".to_string(),
        };

        let dashboard = Dashboard::open(&mode, &CollectionBinding::new("app"), &store);

        assert!(!dashboard.is_loading());
        assert_eq!(dashboard.count(), 0);
    }

    #[tokio::test]
    async fn test_backend_dashboard_follows_snapshots() {
        let backend = MemoryBackend::new("p").with_user("u1");
        let mode = SessionMode::Backend {
            handle: Arc::new(backend.clone()),
            user_id: "u1".to_string(),
            identity: BackendIdentity::Existing,
        };
        let binding = CollectionBinding::new("app");
        let dashboard = Dashboard::open(&mode, &binding, &LocalStore::temporary().unwrap());

        wait_until(|| !dashboard.is_loading()).await;
        assert_eq!(dashboard.count(), 0);

        backend
            .add_document(&binding.path_for("u1"), record("", "u1").to_document().unwrap())
            .await
            .unwrap();
        wait_until(|| dashboard.count() == 1).await;

        backend.set_available(false);
        wait_until(|| dashboard.last_error().is_some()).await;
        // The last snapshot stays visible
        assert_eq!(dashboard.count(), 1);
    }
}
