use std::collections::HashMap;

use async_trait::async_trait;
use tally_core::Sensitive;
use tokio::sync::Mutex;

use crate::types::{SecretError, SecretProvider, validate_name};

/// Map-backed provider for tests and ephemeral runs.
#[derive(Default)]
pub struct InMemorySecretProvider {
    map: Mutex<HashMap<String, String>>,
}

impl InMemorySecretProvider {
    pub fn with_secret(mut self, name: &str, value: &str) -> Self {
        self.map
            .get_mut()
            .insert(name.to_string(), value.to_string());
        self
    }

    pub async fn insert(&self, name: &str, value: Sensitive<String>) -> Result<(), SecretError> {
        validate_name(name)?;
        self.map
            .lock()
            .await
            .insert(name.to_string(), value.into_inner());
        Ok(())
    }
}

#[async_trait]
impl SecretProvider for InMemorySecretProvider {
    async fn get(&self, name: &str) -> Result<Sensitive<String>, SecretError> {
        validate_name(name)?;
        self.map
            .lock()
            .await
            .get(name)
            .cloned()
            .map(Sensitive)
            .ok_or_else(|| SecretError::NotFound(name.to_string()))
    }
}
