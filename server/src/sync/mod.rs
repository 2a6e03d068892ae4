//! Synchronization core for the personal bookshelf.
//!
//! This module binds an authenticated identity to a per-user book collection
//! and keeps a local view of it up to date. It provides:
//! - The book record, draft and genre types
//! - The session mode (offline, backend-bound or degraded)
//! - A live collection binding that pushes full snapshots
//! - The local view model and dashboard that absorb those snapshots
//! - The submission pipeline, the only write path

pub mod binding;
pub mod pipeline;
pub mod view_model;

pub use binding::{CollectionBinding, Subscription, SubscriptionError};
pub use pipeline::{
    DraftField, SubmissionPipeline, SubmissionState, SubmitError, ValidationError,
};
pub use view_model::{Dashboard, LocalViewModel, SharedViewModel};

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

use crate::backend::{BackendIdentity, DocumentBackend};

/// Opaque user identifier (identity-provider subject or backend uid)
pub type UserId = String;

/// Field name that carries the owner on stored documents
pub const OWNER_FIELD: &str = "userId";

/// Lowest accepted rating
pub const MIN_RATING: u8 = 1;

/// Highest accepted rating
pub const MAX_RATING: u8 = 5;

/// Fixed list of genres a book can be filed under
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Genre {
    #[serde(rename = "Fiction")]
    Fiction,
    #[serde(rename = "Non-Fiction")]
    NonFiction,
    #[serde(rename = "Fantasy")]
    Fantasy,
    #[serde(rename = "Science Fiction")]
    ScienceFiction,
    #[serde(rename = "Mystery")]
    Mystery,
    #[serde(rename = "Thriller")]
    Thriller,
    #[serde(rename = "Romance")]
    Romance,
    #[serde(rename = "Horror")]
    Horror,
    #[serde(rename = "Biography")]
    Biography,
    #[serde(rename = "History")]
    History,
    #[serde(rename = "Self-Help")]
    SelfHelp,
    #[serde(rename = "Poetry")]
    Poetry,
    #[serde(rename = "Young Adult")]
    YoungAdult,
    #[serde(rename = "Children's")]
    Childrens,
    #[serde(rename = "Cookbook")]
    Cookbook,
    #[serde(rename = "Travel")]
    Travel,
    #[serde(rename = "Art")]
    Art,
    #[serde(rename = "Science")]
    Science,
    #[serde(rename = "Business")]
    Business,
    #[serde(rename = "Comics & Graphic Novels")]
    ComicsAndGraphicNovels,
}

impl Genre {
    /// Every genre, in display order
    pub const ALL: [Genre; 20] = [
        Genre::Fiction,
        Genre::NonFiction,
        Genre::Fantasy,
        Genre::ScienceFiction,
        Genre::Mystery,
        Genre::Thriller,
        Genre::Romance,
        Genre::Horror,
        Genre::Biography,
        Genre::History,
        Genre::SelfHelp,
        Genre::Poetry,
        Genre::YoungAdult,
        Genre::Childrens,
        Genre::Cookbook,
        Genre::Travel,
        Genre::Art,
        Genre::Science,
        Genre::Business,
        Genre::ComicsAndGraphicNovels,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Genre::Fiction => "Fiction",
            Genre::NonFiction => "Non-Fiction",
            Genre::Fantasy => "Fantasy",
            Genre::ScienceFiction => "Science Fiction",
            Genre::Mystery => "Mystery",
            Genre::Thriller => "Thriller",
            Genre::Romance => "Romance",
            Genre::Horror => "Horror",
            Genre::Biography => "Biography",
            Genre::History => "History",
            Genre::SelfHelp => "Self-Help",
            Genre::Poetry => "Poetry",
            Genre::YoungAdult => "Young Adult",
            Genre::Childrens => "Children's",
            Genre::Cookbook => "Cookbook",
            Genre::Travel => "Travel",
            Genre::Art => "Art",
            Genre::Science => "Science",
            Genre::Business => "Business",
            Genre::ComicsAndGraphicNovels => "Comics & Graphic Novels",
        }
    }
}

impl fmt::Display for Genre {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing a genre name that is not on the list
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown genre: {0}")]
pub struct UnknownGenre(pub String);

impl FromStr for Genre {
    type Err = UnknownGenre;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Genre::ALL
            .iter()
            .copied()
            .find(|g| g.as_str() == s)
            .ok_or_else(|| UnknownGenre(s.to_string()))
    }
}

/// A reviewed book owned by one user.
///
/// Records are insert-only: once created by the submission pipeline they are
/// never edited or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookRecord {
    /// Document id (storage-assigned, or a millisecond timestamp offline)
    #[serde(default)]
    pub id: String,
    pub book_name: String,
    pub author: String,
    pub review: String,
    pub genres: BTreeSet<Genre>,
    pub rating: u8,
    /// Local calendar date the record was created, `M/D/YYYY`
    pub date_added: String,
    #[serde(rename = "userId", alias = "ownerId")]
    pub owner_id: UserId,
}

impl BookRecord {
    /// Document body for the hosted store; the id lives outside the body
    pub fn to_document(&self) -> Result<serde_json::Value, serde_json::Error> {
        let mut value = serde_json::to_value(self)?;
        let map = value
            .as_object_mut()
            .ok_or_else(|| serde::ser::Error::custom("book record is not a JSON object"))?;
        map.remove("id");
        Ok(value)
    }

    /// Rebuild a record from a stored document and its id
    pub fn from_document(id: &str, data: &serde_json::Value) -> Result<Self, serde_json::Error> {
        let mut record: BookRecord = serde_json::from_value(data.clone())?;
        record.id = id.to_string();
        Ok(record)
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.owner_id == user_id
    }
}

/// Today's date formatted the way records display it
pub fn today() -> String {
    chrono::Local::now().format("%-m/%-d/%Y").to_string()
}

/// In-progress, unvalidated input for a new book
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BookDraft {
    pub book_name: String,
    pub author: String,
    pub review: String,
    pub genres: BTreeSet<Genre>,
    /// 0 means "not set"
    pub rating: u8,
}

impl BookDraft {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_book_name(mut self, name: impl Into<String>) -> Self {
        self.book_name = name.into();
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn with_review(mut self, review: impl Into<String>) -> Self {
        self.review = review.into();
        self
    }

    pub fn with_genre(mut self, genre: Genre) -> Self {
        self.genres.insert(genre);
        self
    }

    pub fn with_rating(mut self, rating: u8) -> Self {
        self.rating = rating;
        self
    }

    /// Check or uncheck a genre
    pub fn set_genre(&mut self, genre: Genre, checked: bool) {
        if checked {
            self.genres.insert(genre);
        } else {
            self.genres.remove(&genre);
        }
    }

    /// Reset every field to its empty state
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// How the current session reaches (or doesn't reach) the hosted store.
///
/// Decided once at startup and carried in the session context; every
/// component branches on this closed set instead of probing for handles.
#[derive(Clone)]
pub enum SessionMode {
    /// No backend configured; books live in durable client storage only
    Offline { user_id: UserId },
    /// Bound to the hosted store with an authenticated backend user
    Backend {
        handle: Arc<dyn DocumentBackend>,
        user_id: UserId,
        identity: BackendIdentity,
    },
    /// Backend configured but unusable; the id is local and nothing persists
    Degraded { user_id: UserId, cause: String },
}

impl SessionMode {
    pub fn user_id(&self) -> &str {
        match self {
            SessionMode::Offline { user_id }
            | SessionMode::Backend { user_id, .. }
            | SessionMode::Degraded { user_id, .. } => user_id,
        }
    }

    /// Backend handle, present only when backend-bound
    pub fn backend(&self) -> Option<&Arc<dyn DocumentBackend>> {
        match self {
            SessionMode::Backend { handle, .. } => Some(handle),
            _ => None,
        }
    }

    /// Whether writes made in this mode survive a restart
    pub fn is_persistent(&self) -> bool {
        match self {
            SessionMode::Offline { .. } => true,
            SessionMode::Backend { handle, .. } => handle.is_durable(),
            SessionMode::Degraded { .. } => false,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SessionMode::Offline { .. } => "offline",
            SessionMode::Backend { .. } => "backend",
            SessionMode::Degraded { .. } => "degraded",
        }
    }
}

impl fmt::Debug for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionMode::Offline { user_id } => {
                f.debug_struct("Offline").field("user_id", user_id).finish()
            }
            SessionMode::Backend {
                user_id, identity, ..
            } => f
                .debug_struct("Backend")
                .field("user_id", user_id)
                .field("identity", identity)
                .finish_non_exhaustive(),
            SessionMode::Degraded { user_id, cause } => f
                .debug_struct("Degraded")
                .field("user_id", user_id)
                .field("cause", cause)
                .finish(),
        }
    }
}
