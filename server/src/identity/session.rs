//! Identity session state and backend identity bootstrap.

use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::{decode_credential, IdentityError, UserProfile};
use crate::backend::{BackendIdentity, BackendResult, DocumentBackend};
use crate::storage::LocalStore;
use crate::sync::SessionMode;

/// The signed-in user's profile plus its durable copy
pub struct IdentitySession {
    store: LocalStore,
    client_id: Option<String>,
    profile: RwLock<Option<UserProfile>>,
}

impl IdentitySession {
    /// Create a session, picking up a profile persisted by an earlier run
    pub fn restore(store: LocalStore, client_id: Option<String>) -> Self {
        let profile = match store.load_profile() {
            Ok(profile) => profile,
            Err(e) => {
                warn!("Discarding unreadable stored profile: {}", e);
                None
            }
        };

        if let Some(profile) = &profile {
            info!("Restored session for {}", profile.name);
        }

        Self {
            store,
            client_id,
            profile: RwLock::new(profile),
        }
    }

    /// Sign in with an identity-provider credential
    pub fn sign_in(&self, credential: &str) -> Result<UserProfile, IdentityError> {
        let claims = decode_credential(credential, self.client_id.as_deref())?;
        let profile = UserProfile::from(claims);

        self.store.save_profile(&profile)?;
        *self.profile.write() = Some(profile.clone());

        info!("Signed in: {} ({})", profile.name, profile.id);
        Ok(profile)
    }

    /// The signed-in profile, if any
    pub fn profile(&self) -> Option<UserProfile> {
        self.profile.read().clone()
    }

    pub fn is_signed_in(&self) -> bool {
        self.profile.read().is_some()
    }

    /// Establish the backend-side session and decide the operating mode.
    ///
    /// `backend` is `None` when no backend is configured at all, and an error
    /// when it is configured but failed to initialize. An existing backend
    /// user is reused; otherwise `bootstrap_token` is tried and anonymous
    /// sign-in is the fallback. If the backend cannot produce a user the
    /// session degrades to a random local id that nothing persists under.
    pub async fn bootstrap_backend_identity(
        &self,
        backend: Option<BackendResult<Arc<dyn DocumentBackend>>>,
        bootstrap_token: Option<&str>,
    ) -> SessionMode {
        let handle = match backend {
            None => {
                let user_id = self.store.local_user_id().unwrap_or_else(|e| {
                    warn!("Could not read offline user id, using a temporary one: {}", e);
                    fallback_user_id()
                });
                info!("No backend configured, running offline as {}", user_id);
                return SessionMode::Offline { user_id };
            }
            Some(Err(e)) => return degraded(e.to_string()),
            Some(Ok(handle)) => handle,
        };

        if let Some(user) = handle.current_user().await {
            info!("Reusing backend session for {}", user.uid);
            return SessionMode::Backend {
                handle,
                user_id: user.uid,
                identity: BackendIdentity::Existing,
            };
        }

        if let Some(token) = bootstrap_token {
            match handle.sign_in_with_custom_token(token).await {
                Ok(user) => {
                    return SessionMode::Backend {
                        handle,
                        user_id: user.uid,
                        identity: BackendIdentity::CustomToken,
                    }
                }
                Err(e) => warn!("Bootstrap token rejected, falling back to anonymous: {}", e),
            }
        }

        match handle.sign_in_anonymously().await {
            Ok(user) => SessionMode::Backend {
                handle,
                user_id: user.uid,
                identity: BackendIdentity::Anonymous,
            },
            Err(e) => degraded(e.to_string()),
        }
    }

    /// Clear the stored profile and end the backend session. Safe to repeat.
    pub async fn sign_out(&self, mode: &SessionMode) -> Result<(), IdentityError> {
        self.store.clear_profile()?;
        let previous = self.profile.write().take();

        if let Some(backend) = mode.backend() {
            backend.sign_out().await?;
        }

        if let Some(profile) = previous {
            info!("Signed out: {}", profile.name);
        }
        Ok(())
    }
}

fn degraded(cause: String) -> SessionMode {
    let user_id = fallback_user_id();
    error!(
        "Backend unavailable ({}), continuing with non-persistent identity {}",
        cause, user_id
    );
    SessionMode::Degraded { user_id, cause }
}

fn fallback_user_id() -> String {
    let bytes: [u8; 12] = rand::random();
    format!("fallback-{}", hex::encode(bytes))
}
