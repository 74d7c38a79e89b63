//! Credential retrieval.
//!
//! Secrets are looked up by name once per run, at startup. Two stores are
//! supported: process environment and a TOML file of `name = "value"` pairs.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("secret not found: {0}")]
    NotFound(String),

    #[error("secret '{name}' is malformed: {reason}")]
    Malformed { name: String, reason: String },

    #[error("failed to read secrets file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse secrets file: {0}")]
    Toml(#[from] toml::de::Error),
}

pub trait SecretProvider {
    fn get_secret(&self, name: &str) -> impl Future<Output = Result<String, SecretError>>;
}

/// Reads secrets from environment variables.
///
/// `event-forge/adobe-credentials-dev` is looked up as
/// `EVENT_FORGE_ADOBE_CREDENTIALS_DEV`.
#[derive(Debug, Clone, Default)]
pub struct EnvSecretProvider;

impl EnvSecretProvider {
    pub fn variable_name(name: &str) -> String {
        name.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect()
    }
}

impl SecretProvider for EnvSecretProvider {
    async fn get_secret(&self, name: &str) -> Result<String, SecretError> {
        match std::env::var(Self::variable_name(name)) {
            Ok(value) if !value.is_empty() => Ok(value),
            _ => Err(SecretError::NotFound(name.to_string())),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FileSecretProvider {
    values: BTreeMap<String, String>,
}

impl FileSecretProvider {
    pub fn load(path: &Path) -> Result<Self, SecretError> {
        let contents = std::fs::read_to_string(path).map_err(|source| SecretError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, SecretError> {
        let values = toml::from_str::<BTreeMap<String, String>>(contents)?;
        Ok(Self { values })
    }
}

impl SecretProvider for FileSecretProvider {
    async fn get_secret(&self, name: &str) -> Result<String, SecretError> {
        self.values
            .get(name)
            .filter(|v| !v.is_empty())
            .cloned()
            .ok_or_else(|| SecretError::NotFound(name.to_string()))
    }
}

/// The store selected by configuration.
#[derive(Debug, Clone)]
pub enum SecretStore {
    Env(EnvSecretProvider),
    File(FileSecretProvider),
}

impl SecretProvider for SecretStore {
    async fn get_secret(&self, name: &str) -> Result<String, SecretError> {
        match self {
            SecretStore::Env(p) => p.get_secret(name).await,
            SecretStore::File(p) => p.get_secret(name).await,
        }
    }
}
