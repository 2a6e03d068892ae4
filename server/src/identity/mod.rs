//! Identity session.
//!
//! This module handles:
//! - Decoding the identity provider's signed credential into a profile
//! - Persisting the profile so a restart does not force a new sign-in
//! - Establishing the backend-side session (existing, custom token,
//!   anonymous, or a local fallback when the backend cannot be reached)
//! - Sign-out

mod credential;
mod session;

pub use credential::{decode_credential, CredentialClaims};
pub use session::IdentitySession;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::BackendError;
use crate::storage::StorageError;

/// Errors that can occur in the identity session
#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}

impl IdentityError {
    /// Message shown to the user
    pub fn user_message(&self) -> &'static str {
        match self {
            IdentityError::InvalidCredential(_) => {
                "An error occurred during login. Please try again."
            }
            IdentityError::Storage(_) | IdentityError::Backend(_) => {
                "Something went wrong. Please try again."
            }
        }
    }
}

/// Lightweight profile of the signed-in user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Identity-provider subject
    pub id: String,
    pub name: String,
    #[serde(default, rename = "picture", skip_serializing_if = "Option::is_none")]
    pub picture_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl UserProfile {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            picture_url: None,
            email: None,
        }
    }

    pub fn with_picture(mut self, url: impl Into<String>) -> Self {
        self.picture_url = Some(url.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

impl From<CredentialClaims> for UserProfile {
    fn from(claims: CredentialClaims) -> Self {
        Self {
            id: claims.sub,
            name: claims.name,
            picture_url: claims.picture,
            email: claims.email,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_creation() {
        let profile = UserProfile::new("sub-1", "Alice")
            .with_picture("https://example.com/a.png")
            .with_email("alice@example.com");

        assert_eq!(profile.id, "sub-1");
        assert_eq!(profile.picture_url.as_deref(), Some("https://example.com/a.png"));
        assert_eq!(profile.email.as_deref(), Some("alice@example.com"));
    }

    #[test]
    fn test_profile_json_omits_missing_picture() {
        let json = serde_json::to_value(UserProfile::new("sub-1", "Alice")).unwrap();
        assert_eq!(json, serde_json::json!({ "id": "sub-1", "name": "Alice" }));
    }

    #[test]
    fn test_user_messages() {
        let err = IdentityError::InvalidCredential("bad segment".to_string());
        assert_eq!(
            err.user_message(),
            "An error occurred during login. Please try again."
        );
        assert_eq!(err.to_string(), "Invalid credential: bad segment");
    }
}
