//! Bookshelf Server - personal book reviews with live per-user collections
//!
//! - Google sign-in with the profile persisted in an embedded Sled store
//! - Per-user book collections in a hosted document store, pushed live
//! - Offline operation against local storage when no backend is configured
//! - Axum HTTP and WebSocket surface for the UI

pub mod api;
pub mod backend;
pub mod config;
pub mod identity;
pub mod navigation;
pub mod session;
pub mod storage;
pub mod sync;

pub use api::{router, AppState};
pub use config::AppConfig;
pub use session::SessionContext;
