//! Session context.
//!
//! Everything a running session needs is built here once at startup and then
//! handed to components explicitly: configuration, the durable client store,
//! the identity session, the operating mode, the collection binding and the
//! navigation signal.

use parking_lot::RwLock;
use std::sync::Arc;
use tracing::info;

use crate::backend::{self, BackendError, BackendResult, DocumentBackend};
use crate::config::{AppConfig, BackendSetting};
use crate::identity::{IdentityError, IdentitySession, UserProfile};
use crate::navigation::{Navigation, Route};
use crate::storage::{LocalStore, StorageResult};
use crate::sync::{CollectionBinding, Dashboard, SessionMode, SubmissionPipeline};

pub struct SessionContext {
    config: AppConfig,
    store: LocalStore,
    identity: IdentitySession,
    binding: CollectionBinding,
    navigation: Navigation,
    mode: RwLock<SessionMode>,
}

impl SessionContext {
    /// Open storage, connect the configured backend and establish identity
    pub async fn bootstrap(config: AppConfig) -> StorageResult<Self> {
        let store = LocalStore::open(config.storage.clone())?;

        let backend = match &config.backend {
            BackendSetting::NotConfigured => None,
            BackendSetting::Configured(backend_config) => {
                Some(backend::connect(backend_config, &store))
            }
            BackendSetting::Invalid(reason) => Some(Err(BackendError::Init(reason.clone()))),
        };

        Ok(Self::assemble(config, store, backend).await)
    }

    /// Build a context from already-opened parts
    pub async fn assemble(
        config: AppConfig,
        store: LocalStore,
        backend: Option<BackendResult<Arc<dyn DocumentBackend>>>,
    ) -> Self {
        let identity = IdentitySession::restore(store.clone(), config.google_client_id.clone());
        let mode = identity
            .bootstrap_backend_identity(backend, config.initial_auth_token.as_deref())
            .await;

        let initial = if identity.is_signed_in() {
            Route::Dashboard
        } else {
            Route::Auth
        };

        info!("Session ready in {} mode as {}", mode.name(), mode.user_id());
        Self {
            binding: CollectionBinding::new(&config.app_id),
            navigation: Navigation::new(initial),
            mode: RwLock::new(mode),
            config,
            store,
            identity,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn identity(&self) -> &IdentitySession {
        &self.identity
    }

    pub fn binding(&self) -> &CollectionBinding {
        &self.binding
    }

    pub fn navigation(&self) -> &Navigation {
        &self.navigation
    }

    /// Current operating mode
    pub fn mode(&self) -> SessionMode {
        self.mode.read().clone()
    }

    /// Pipeline writing into this session's collection
    pub fn pipeline(&self) -> SubmissionPipeline {
        SubmissionPipeline::new(self.binding.clone(), self.navigation.clone())
            .with_write_timeout(self.config.write_timeout)
    }

    pub fn open_dashboard(&self) -> Dashboard {
        Dashboard::open(&self.mode(), &self.binding, &self.store)
    }

    /// Sign in and move to the dashboard.
    ///
    /// If an earlier sign-out ended the backend session, a new backend
    /// identity is established first.
    pub async fn sign_in(&self, credential: &str) -> Result<UserProfile, IdentityError> {
        let profile = self.identity.sign_in(credential)?;
        self.resume_backend_session().await;
        self.navigation.navigate(Route::Dashboard);
        Ok(profile)
    }

    /// Sign out and return to the entry view
    pub async fn sign_out(&self) -> Result<(), IdentityError> {
        let mode = self.mode();
        self.identity.sign_out(&mode).await?;
        self.navigation.navigate(Route::Auth);
        Ok(())
    }

    async fn resume_backend_session(&self) {
        let handle = match self.mode() {
            SessionMode::Backend { handle, .. } => handle,
            _ => return,
        };
        if handle.current_user().await.is_some() {
            return;
        }

        let mode = self
            .identity
            .bootstrap_backend_identity(Some(Ok(handle)), self.config.initial_auth_token.as_deref())
            .await;
        info!("Backend session resumed in {} mode as {}", mode.name(), mode.user_id());
        *self.mode.write() = mode;
    }
}
