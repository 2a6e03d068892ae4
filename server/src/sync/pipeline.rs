//! Submission pipeline: the only path by which books are created.
//!
//! A submission validates the draft, stamps owner and date, and writes the
//! record either to the hosted store (backend mode) or to the local view
//! model (offline). At most one submission is in flight per pipeline.

use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{
    today, BookDraft, BookRecord, CollectionBinding, SessionMode, SharedViewModel, MAX_RATING,
    MIN_RATING,
};
use crate::navigation::{Navigation, Route};

/// Phase of the current submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionState {
    Idle,
    Validating,
    Rejected,
    Submitting,
    Committed,
    Failed,
}

/// Draft field that failed validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DraftField {
    BookName,
    Author,
    Genres,
    Review,
    Rating,
}

impl fmt::Display for DraftField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DraftField::BookName => "bookName",
            DraftField::Author => "author",
            DraftField::Genres => "genres",
            DraftField::Review => "review",
            DraftField::Rating => "rating",
        };
        f.write_str(name)
    }
}

/// First rule a draft broke
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{field}: {reason}")]
pub struct ValidationError {
    pub field: DraftField,
    pub reason: &'static str,
}

impl ValidationError {
    fn new(field: DraftField, reason: &'static str) -> Self {
        Self { field, reason }
    }
}

/// Errors that can occur while submitting a draft
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("No backend session is available")]
    BackendNotReady,

    #[error("A submission is already in progress")]
    SubmissionInProgress,

    #[error("Submission failed: {cause}")]
    Submission { cause: String },
}

impl SubmitError {
    /// Message shown to the user
    pub fn user_message(&self) -> &str {
        match self {
            SubmitError::Validation(e) => e.reason,
            SubmitError::BackendNotReady => "Database not ready. Please try again.",
            SubmitError::SubmissionInProgress => "Your book is already being added.",
            SubmitError::Submission { .. } => "Failed to add book. Please try again.",
        }
    }
}

/// Check a draft, reporting the first failing field in form order
pub fn validate(draft: &BookDraft) -> Result<(), ValidationError> {
    if draft.book_name.trim().is_empty() {
        return Err(ValidationError::new(DraftField::BookName, "Book Name is required."));
    }
    if draft.author.trim().is_empty() {
        return Err(ValidationError::new(DraftField::Author, "Author is required."));
    }
    if draft.genres.is_empty() {
        return Err(ValidationError::new(
            DraftField::Genres,
            "Please select at least one genre.",
        ));
    }
    if draft.review.trim().is_empty() {
        return Err(ValidationError::new(DraftField::Review, "Review is required."));
    }
    if !(MIN_RATING..=MAX_RATING).contains(&draft.rating) {
        return Err(ValidationError::new(
            DraftField::Rating,
            "Please provide a rating.",
        ));
    }
    Ok(())
}

/// Clears the in-flight flag when the submission ends, however it ends
struct InFlight<'a> {
    flag: &'a AtomicBool,
    state: &'a RwLock<SubmissionState>,
}

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool, state: &'a RwLock<SubmissionState>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag, state })
    }

    fn set(&self, next: SubmissionState) {
        debug!("Submission state -> {:?}", next);
        *self.state.write() = next;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        *self.state.write() = SubmissionState::Idle;
        self.flag.store(false, Ordering::Release);
    }
}

/// Turns drafts into stored records
pub struct SubmissionPipeline {
    binding: CollectionBinding,
    navigation: Navigation,
    write_timeout: Duration,
    in_flight: AtomicBool,
    state: RwLock<SubmissionState>,
}

impl SubmissionPipeline {
    pub fn new(binding: CollectionBinding, navigation: Navigation) -> Self {
        Self {
            binding,
            navigation,
            write_timeout: Duration::from_secs(10),
            in_flight: AtomicBool::new(false),
            state: RwLock::new(SubmissionState::Idle),
        }
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn state(&self) -> SubmissionState {
        *self.state.read()
    }

    pub fn is_submitting(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Validate and store `draft` as a new book owned by the session user.
    ///
    /// On success the draft is cleared and navigation goes back to the
    /// dashboard. On any failure the draft is left as it was. Offline, the
    /// record is appended to `view_model`; in backend mode it is written to
    /// the user's collection and reaches the view through the live binding.
    pub async fn submit(
        &self,
        mode: &SessionMode,
        draft: &mut BookDraft,
        view_model: &SharedViewModel,
    ) -> Result<BookRecord, SubmitError> {
        let guard = InFlight::acquire(&self.in_flight, &self.state)
            .ok_or(SubmitError::SubmissionInProgress)?;

        guard.set(SubmissionState::Validating);
        if let Err(e) = validate(draft) {
            guard.set(SubmissionState::Rejected);
            debug!("Draft rejected: {}", e);
            return Err(e.into());
        }

        let mut record = BookRecord {
            id: String::new(),
            book_name: draft.book_name.trim().to_string(),
            author: draft.author.trim().to_string(),
            review: draft.review.trim().to_string(),
            genres: draft.genres.clone(),
            rating: draft.rating,
            date_added: today(),
            owner_id: mode.user_id().to_string(),
        };

        guard.set(SubmissionState::Submitting);
        let outcome = match mode {
            SessionMode::Offline { .. } => {
                record.id = chrono::Utc::now().timestamp_millis().to_string();
                view_model
                    .write()
                    .append_local(record.clone())
                    .map_err(|e| SubmitError::Submission {
                        cause: e.to_string(),
                    })
            }
            SessionMode::Backend {
                handle, user_id, ..
            } => {
                let path = self.binding.path_for(user_id);
                match record.to_document() {
                    Ok(document) => match tokio::time::timeout(
                        self.write_timeout,
                        handle.add_document(&path, document),
                    )
                    .await
                    {
                        Ok(Ok(id)) => {
                            record.id = id;
                            Ok(())
                        }
                        Ok(Err(e)) => Err(SubmitError::Submission {
                            cause: e.to_string(),
                        }),
                        Err(_) => Err(SubmitError::Submission {
                            cause: format!("write timed out after {:?}", self.write_timeout),
                        }),
                    },
                    Err(e) => Err(SubmitError::Submission {
                        cause: format!("book could not be encoded: {}", e),
                    }),
                }
            }
            SessionMode::Degraded { .. } => Err(SubmitError::BackendNotReady),
        };

        match outcome {
            Ok(()) => {
                guard.set(SubmissionState::Committed);
                info!("Added \"{}\" ({}) for {}", record.book_name, record.id, record.owner_id);
                draft.clear();
                self.navigation.navigate(Route::Dashboard);
                Ok(record)
            }
            Err(e) => {
                guard.set(SubmissionState::Failed);
                warn!("Could not add \"{}\": {}", record.book_name, e);
                Err(e)
            }
        }
    }
}
