//! Application configuration.
//!
//! Everything is static configuration read from the environment (after
//! `.env` is loaded). A JSON backend config injected at startup through
//! `BOOKSHELF_BACKEND_CONFIG` takes precedence over the individual keys.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::storage::StorageConfig;

/// Application id used when none is configured
pub const DEFAULT_APP_ID: &str = "default-app-id";

/// Errors that can occur while loading configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Invalid backend configuration: {0}")]
    InvalidBackendConfig(String),
}

/// Connection settings for the hosted document store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_domain: Option<String>,
}

impl BackendConfig {
    pub fn new(api_key: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            project_id: project_id.into(),
            auth_domain: None,
        }
    }

    pub fn with_auth_domain(mut self, domain: impl Into<String>) -> Self {
        self.auth_domain = Some(domain.into());
        self
    }

    /// Auth domain custom tokens are issued for
    pub fn effective_auth_domain(&self) -> String {
        self.auth_domain
            .clone()
            .unwrap_or_else(|| format!("{}.firebaseapp.com", self.project_id))
    }

    /// Parse a runtime-injected JSON config
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::InvalidBackendConfig(e.to_string()))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.is_empty() {
            return Err(ConfigError::InvalidBackendConfig("API key is empty".to_string()));
        }
        if self.project_id.is_empty() {
            return Err(ConfigError::InvalidBackendConfig("project id is empty".to_string()));
        }
        Ok(())
    }
}

/// What the environment says about the document store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendSetting {
    /// No backend keys present
    NotConfigured,
    /// Keys present and parsed (still subject to validation on connect)
    Configured(BackendConfig),
    /// Keys present but unusable
    Invalid(String),
}

/// Top-level application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Application identifier, the second segment of collection paths
    pub app_id: String,
    /// Identity-provider client id; credentials must be issued for it when set
    pub google_client_id: Option<String>,
    pub backend: BackendSetting,
    /// Custom token tried when bootstrapping the backend session
    pub initial_auth_token: Option<String>,
    pub storage: StorageConfig,
    pub port: u16,
    /// Upper bound on a single document write
    pub write_timeout: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app_id: DEFAULT_APP_ID.to_string(),
            google_client_id: None,
            backend: BackendSetting::NotConfigured,
            initial_auth_token: None,
            storage: StorageConfig::default(),
            port: 5000,
            write_timeout: Duration::from_secs(10),
        }
    }
}

impl AppConfig {
    /// Create from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = match get("PORT") {
            Some(raw) => raw.parse::<u16>().map_err(|_| ConfigError::InvalidValue {
                key: "PORT".to_string(),
                value: raw,
            })?,
            None => defaults.port,
        };

        let write_timeout = match get("WRITE_TIMEOUT_MS") {
            Some(raw) => raw
                .parse::<u64>()
                .ok()
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .ok_or(ConfigError::InvalidValue {
                    key: "WRITE_TIMEOUT_MS".to_string(),
                    value: raw,
                })?,
            None => defaults.write_timeout,
        };

        let storage = get("STORAGE_PATH")
            .map(StorageConfig::new)
            .unwrap_or(defaults.storage);

        Ok(Self {
            app_id: get("BOOKSHELF_APP_ID").unwrap_or(defaults.app_id),
            google_client_id: get("GOOGLE_CLIENT_ID"),
            backend: backend_setting(&get),
            initial_auth_token: get("INITIAL_AUTH_TOKEN"),
            storage,
            port,
            write_timeout,
        })
    }
}

fn backend_setting<F>(get: &F) -> BackendSetting
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(json) = get("BOOKSHELF_BACKEND_CONFIG") {
        return match BackendConfig::from_json(&json) {
            Ok(config) => BackendSetting::Configured(config),
            Err(e) => BackendSetting::Invalid(e.to_string()),
        };
    }

    let api_key = get("FIREBASE_API_KEY");
    let project_id = get("FIREBASE_PROJECT_ID");
    if api_key.is_none() && project_id.is_none() {
        return BackendSetting::NotConfigured;
    }

    let mut config = BackendConfig::new(api_key.unwrap_or_default(), project_id.unwrap_or_default());
    config.auth_domain = get("FIREBASE_AUTH_DOMAIN");
    BackendSetting::Configured(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tokio_test::{assert_err, assert_ok};

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.app_id, DEFAULT_APP_ID);
        assert_eq!(config.port, 5000);
        assert_eq!(config.write_timeout, Duration::from_secs(10));
        assert_eq!(config.backend, BackendSetting::NotConfigured);
        assert!(config.google_client_id.is_none());
    }

    #[test]
    fn test_individual_backend_keys() {
        let config = AppConfig::from_lookup(lookup(&[
            ("BOOKSHELF_APP_ID", "shelf"),
            ("FIREBASE_API_KEY", "key"),
            ("FIREBASE_PROJECT_ID", "proj"),
            ("FIREBASE_AUTH_DOMAIN", "proj.example.com"),
            ("WRITE_TIMEOUT_MS", "2500"),
        ]))
        .unwrap();

        assert_eq!(config.app_id, "shelf");
        assert_eq!(config.write_timeout, Duration::from_millis(2500));
        assert_eq!(
            config.backend,
            BackendSetting::Configured(
                BackendConfig::new("key", "proj").with_auth_domain("proj.example.com")
            )
        );
    }

    #[test]
    fn test_injected_json_overrides_keys() {
        let config = AppConfig::from_lookup(lookup(&[
            ("FIREBASE_API_KEY", "static-key"),
            ("FIREBASE_PROJECT_ID", "static"),
            (
                "BOOKSHELF_BACKEND_CONFIG",
                r#"{"apiKey":"runtime-key","projectId":"runtime"}"#,
            ),
        ]))
        .unwrap();

        assert_eq!(
            config.backend,
            BackendSetting::Configured(BackendConfig::new("runtime-key", "runtime"))
        );
    }

    #[test]
    fn test_unparsable_backend_json() {
        let config =
            AppConfig::from_lookup(lookup(&[("BOOKSHELF_BACKEND_CONFIG", "{not json")])).unwrap();
        assert!(matches!(config.backend, BackendSetting::Invalid(_)));
    }

    #[test]
    fn test_invalid_numbers() {
        assert_err!(AppConfig::from_lookup(lookup(&[("PORT", "http")])));
        assert_err!(AppConfig::from_lookup(lookup(&[("WRITE_TIMEOUT_MS", "0")])));
    }

    #[test]
    fn test_effective_auth_domain() {
        let explicit = BackendConfig::new("key", "proj").with_auth_domain("login.example.com");
        assert_eq!(explicit.effective_auth_domain(), "login.example.com");
        assert_eq!(
            BackendConfig::new("key", "proj").effective_auth_domain(),
            "proj.firebaseapp.com"
        );
    }

    #[test]
    fn test_backend_validation() {
        assert_ok!(BackendConfig::new("key", "proj").validate());
        assert_err!(BackendConfig::new("", "proj").validate());
        assert_err!(BackendConfig::new("key", "").validate());
    }
}
