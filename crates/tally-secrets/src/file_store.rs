use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::Argon2;
use async_trait::async_trait;
use base64::Engine as _;
use rand::RngCore as _;
use serde::{Deserialize, Serialize};
use tally_core::Sensitive;
use tokio::io::AsyncWriteExt as _;
use tracing::debug;
use zeroize::{Zeroize as _, Zeroizing};

use crate::types::{SecretError, SecretProvider, validate_name};

const ENVELOPE_VERSION: u32 = 1;
const AAD: &[u8] = b"tally-secrets-v1";

#[derive(Debug, Clone)]
pub struct FileSecretProviderOptions {
    pub path: PathBuf,
    pub passphrase: Sensitive<String>,
}

/// Reads secrets from one passphrase-encrypted file.
///
/// The file is decrypted on every lookup; no plaintext is cached between calls.
#[derive(Debug, Clone)]
pub struct FileSecretProvider {
    path: PathBuf,
    passphrase: Sensitive<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    v: u32,
    salt_b64: String,
    nonce_b64: String,
    ciphertext_b64: String,
}

#[derive(Serialize, Deserialize)]
struct SecretsDocument {
    secrets: BTreeMap<String, String>,
}

impl FileSecretProvider {
    pub fn new(opts: FileSecretProviderOptions) -> Self {
        Self {
            path: opts.path,
            passphrase: opts.passphrase,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Version label of the secrets file, taken from the real file name.
    ///
    /// `secrets.current.age -> secrets.v3.age` yields `"v3"`.
    pub async fn version(&self) -> Result<String, SecretError> {
        let real = tokio::fs::canonicalize(&self.path)
            .await
            .map_err(|e| SecretError::Backend(format!("resolve secrets path error: {e}")))?;
        let name = real
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| SecretError::Format("secrets path has no file name".to_string()))?;
        name.split('.')
            .nth(1)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .ok_or_else(|| SecretError::Format(format!("no version in file name {name}")))
    }

    /// Encrypts `secrets` under `passphrase` and writes them to `path`, replacing any
    /// existing file.
    pub async fn seal(
        path: &Path,
        passphrase: &Sensitive<String>,
        secrets: &BTreeMap<String, String>,
    ) -> Result<(), SecretError> {
        for name in secrets.keys() {
            validate_name(name)?;
        }

        let mut salt = [0u8; 16];
        rand::rng().fill_bytes(&mut salt);
        let mut nonce_bytes = [0u8; 12];
        rand::rng().fill_bytes(&mut nonce_bytes);

        let key = derive_key(passphrase.expose(), &salt)?;
        let cipher = Aes256Gcm::new(aes_gcm::Key::<Aes256Gcm>::from_slice(&key));

        let mut doc = SecretsDocument {
            secrets: secrets.clone(),
        };
        let plaintext = Zeroizing::new(
            serde_json::to_vec(&doc)
                .map_err(|e| SecretError::Backend(format!("secrets json error: {e}")))?,
        );
        doc.secrets.values_mut().for_each(|v| v.zeroize());

        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: &plaintext,
                    aad: AAD,
                },
            )
            .map_err(|_| SecretError::Backend("encrypt failed".to_string()))?;

        let envelope = Envelope {
            v: ENVELOPE_VERSION,
            salt_b64: base64::engine::general_purpose::STANDARD.encode(salt),
            nonce_b64: base64::engine::general_purpose::STANDARD.encode(nonce_bytes),
            ciphertext_b64: base64::engine::general_purpose::STANDARD.encode(ciphertext),
        };
        let bytes = serde_json::to_vec_pretty(&envelope)
            .map_err(|e| SecretError::Backend(format!("envelope json error: {e}")))?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SecretError::Backend(format!("create secrets dir error: {e}")))?;
        }
        write_atomic(path, &bytes).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await;
        }
        debug!(path = %path.display(), count = secrets.len(), "sealed secrets file");
        Ok(())
    }

    async fn read_document(&self) -> Result<SecretsDocument, SecretError> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|e| SecretError::Backend(format!("read secrets file error: {e}")))?;
        let envelope: Envelope = serde_json::from_slice(&bytes)
            .map_err(|e| SecretError::Format(format!("secrets envelope json error: {e}")))?;
        if envelope.v != ENVELOPE_VERSION {
            return Err(SecretError::Format(format!(
                "unsupported secrets envelope version {}",
                envelope.v
            )));
        }

        let salt = decode_b64(&envelope.salt_b64, "salt")?;
        let nonce_bytes = decode_b64(&envelope.nonce_b64, "nonce")?;
        let ciphertext = decode_b64(&envelope.ciphertext_b64, "ciphertext")?;
        if salt.len() != 16 {
            return Err(SecretError::Format("bad salt length".to_string()));
        }
        if nonce_bytes.len() != 12 {
            return Err(SecretError::Format("bad nonce length".to_string()));
        }

        let key = derive_key(self.passphrase.expose(), &salt)?;
        let cipher = Aes256Gcm::new(aes_gcm::Key::<Aes256Gcm>::from_slice(&key));
        let plaintext = Zeroizing::new(
            cipher
                .decrypt(
                    Nonce::from_slice(&nonce_bytes),
                    Payload {
                        msg: &ciphertext,
                        aad: AAD,
                    },
                )
                .map_err(|_| {
                    SecretError::Decrypt("wrong passphrase or corrupted secrets file".to_string())
                })?,
        );

        serde_json::from_slice(&plaintext)
            .map_err(|_| SecretError::Format("decrypted secrets are not valid JSON".to_string()))
    }
}

#[async_trait]
impl SecretProvider for FileSecretProvider {
    async fn get(&self, name: &str) -> Result<Sensitive<String>, SecretError> {
        validate_name(name)?;
        let mut doc = self.read_document().await?;
        let found = doc.secrets.remove(name);
        doc.secrets.values_mut().for_each(|v| v.zeroize());
        found
            .map(Sensitive)
            .ok_or_else(|| SecretError::NotFound(name.to_string()))
    }
}

fn decode_b64(s: &str, what: &str) -> Result<Vec<u8>, SecretError> {
    base64::engine::general_purpose::STANDARD
        .decode(s)
        .map_err(|e| SecretError::Format(format!("{what} base64 decode error: {e}")))
}

fn derive_key(passphrase: &str, salt: &[u8]) -> Result<Zeroizing<Vec<u8>>, SecretError> {
    let argon2 = Argon2::default();
    let mut key = Zeroizing::new(vec![0u8; 32]);
    argon2
        .hash_password_into(passphrase.as_bytes(), salt, &mut key)
        .map_err(|e| SecretError::Backend(format!("kdf error: {e}")))?;
    Ok(key)
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), SecretError> {
    let tmp = path.with_extension("tmp");
    {
        let mut f = tokio::fs::File::create(&tmp)
            .await
            .map_err(|e| SecretError::Backend(format!("create tmp error: {e}")))?;
        f.write_all(bytes)
            .await
            .map_err(|e| SecretError::Backend(format!("write tmp error: {e}")))?;
        f.flush()
            .await
            .map_err(|e| SecretError::Backend(format!("flush tmp error: {e}")))?;
    }
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| SecretError::Backend(format!("rename tmp error: {e}")))?;
    Ok(())
}
