//! Routing contract with the UI layer.
//!
//! The core never renders anything. It only tells the routing layer where to
//! go next, through a watch channel the UI (or HTTP layer) observes.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// The addressable views
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    /// Entry / sign-in view
    Auth,
    Dashboard,
    AddBook,
    NotFound,
}

impl Route {
    pub fn path(&self) -> &'static str {
        match self {
            Route::Auth => "/",
            Route::Dashboard => "/dashboard",
            Route::AddBook => "/add-book",
            Route::NotFound => "/404",
        }
    }

    /// Resolve a path; anything unknown is the not-found view
    pub fn from_path(path: &str) -> Self {
        match path.trim_end_matches('/') {
            "" => Route::Auth,
            "/dashboard" => Route::Dashboard,
            "/add-book" => Route::AddBook,
            _ => Route::NotFound,
        }
    }
}

/// Shared handle for signalling navigation
#[derive(Clone)]
pub struct Navigation {
    tx: Arc<watch::Sender<Route>>,
}

impl Navigation {
    pub fn new(initial: Route) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    /// Ask the routing layer to show `route`
    pub fn navigate(&self, route: Route) {
        debug!("Navigate to {}", route.path());
        self.tx.send_replace(route);
    }

    /// The most recently requested route
    pub fn current(&self) -> Route {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Route> {
        self.tx.subscribe()
    }
}
