use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tally_core::Sensitive;
use thiserror::Error;

use crate::file_store::{FileSecretProvider, FileSecretProviderOptions};
use crate::memory_store::InMemorySecretProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretProviderKind {
    File,
    Memory,
}

#[derive(Debug, Clone)]
pub struct SecretProviderOptions {
    pub kind: SecretProviderKind,
    pub secrets_file: PathBuf,
    /// Required for the `File` backend.
    pub passphrase: Option<Sensitive<String>>,
}

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("secret not found: {0}")]
    NotFound(String),
    #[error("secret decrypt error: {0}")]
    Decrypt(String),
    #[error("secret format error: {0}")]
    Format(String),
    #[error("secret backend error: {0}")]
    Backend(String),
    #[error("invalid secret name")]
    InvalidName,
}

#[async_trait]
pub trait SecretProvider: Send + Sync {
    /// Looks up one secret by name.
    async fn get(&self, name: &str) -> Result<Sensitive<String>, SecretError>;
}

pub async fn open_secret_provider(
    opts: SecretProviderOptions,
) -> Result<Arc<dyn SecretProvider>, SecretError> {
    match opts.kind {
        SecretProviderKind::File => {
            let passphrase = opts.passphrase.ok_or_else(|| {
                SecretError::Backend(
                    "missing passphrase for secrets file (set TALLY_SECRETS_PASSPHRASE)"
                        .to_string(),
                )
            })?;
            Ok(Arc::new(FileSecretProvider::new(
                FileSecretProviderOptions {
                    path: opts.secrets_file,
                    passphrase,
                },
            )))
        }
        SecretProviderKind::Memory => Ok(Arc::new(InMemorySecretProvider::default())),
    }
}

pub(crate) fn validate_name(name: &str) -> Result<(), SecretError> {
    let ok = !name.is_empty()
        && name.len() <= 128
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
    if ok {
        Ok(())
    } else {
        Err(SecretError::InvalidName)
    }
}
