//! Signing identity for receipts.
//!
//! One Ed25519 keypair, derived deterministically from the 32-byte `SIGN_SEED` secret. The
//! same seed always yields the same public key, so the identity survives restarts without
//! storing anything but the seed.

use base64::Engine as _;
use bs58::Alphabet;
use ed25519_dalek::{Signature, Signer as _, SigningKey, VerifyingKey};
use tally_core::Sensitive;
use tally_secrets::{SecretError, SecretProvider};
use thiserror::Error;
use tracing::debug;
use zeroize::Zeroizing;

/// Name of the secret holding the base64-encoded seed.
pub const SIGN_SEED_SECRET: &str = "SIGN_SEED";
pub const SEED_LEN: usize = 32;
pub const PUBLIC_KEY_LEN: usize = 32;
pub const SIGNATURE_LEN: usize = 64;

#[derive(Debug, Error)]
pub enum SignerError {
    #[error("invalid seed: {0}")]
    InvalidSeed(String),
    #[error(transparent)]
    Secret(#[from] SecretError),
}

pub trait Signer: Send + Sync {
    fn public_key(&self) -> [u8; PUBLIC_KEY_LEN];

    fn sign(&self, payload: &[u8]) -> [u8; SIGNATURE_LEN];

    /// `false` for any malformed or mismatched signature; never an error.
    fn verify(&self, payload: &[u8], signature: &[u8]) -> bool;
}

pub struct Ed25519Signer {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl std::fmt::Debug for Ed25519Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ed25519Signer")
            .field("public_key", &self.public_key_hex())
            .finish_non_exhaustive()
    }
}

impl Ed25519Signer {
    pub async fn from_provider(secrets: &dyn SecretProvider) -> Result<Self, SignerError> {
        let seed_b64 = secrets.get(SIGN_SEED_SECRET).await?;
        let signer = Self::from_seed_b64(&seed_b64)?;
        debug!(public_key = %signer.public_key_hex(), "derived signing identity");
        Ok(signer)
    }

    pub fn from_seed_b64(seed_b64: &Sensitive<String>) -> Result<Self, SignerError> {
        let decoded = Zeroizing::new(
            base64::engine::general_purpose::STANDARD
                .decode(seed_b64.expose().trim())
                .map_err(|e| SignerError::InvalidSeed(format!("base64 decode error: {e}")))?,
        );
        if decoded.len() != SEED_LEN {
            return Err(SignerError::InvalidSeed(format!(
                "expected {SEED_LEN} bytes, got {}",
                decoded.len()
            )));
        }
        let mut seed = Zeroizing::new([0u8; SEED_LEN]);
        seed.copy_from_slice(&decoded);
        Ok(Self::from_seed(&seed))
    }

    pub fn from_seed(seed: &[u8; SEED_LEN]) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key,
            verifying_key,
        }
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.verifying_key.as_bytes())
    }

    pub fn did_key(&self) -> String {
        did_key_for_ed25519(&self.verifying_key)
    }
}

impl Signer for Ed25519Signer {
    fn public_key(&self) -> [u8; PUBLIC_KEY_LEN] {
        self.verifying_key.to_bytes()
    }

    fn sign(&self, payload: &[u8]) -> [u8; SIGNATURE_LEN] {
        self.signing_key.sign(payload).to_bytes()
    }

    fn verify(&self, payload: &[u8], signature: &[u8]) -> bool {
        verify_with_key(&self.verifying_key, payload, signature)
    }
}

/// Verifies a signature using only the signer's published 32-byte key.
pub fn verify_with_public_key(
    public_key: &[u8; PUBLIC_KEY_LEN],
    payload: &[u8],
    signature: &[u8],
) -> bool {
    match VerifyingKey::from_bytes(public_key) {
        Ok(key) => verify_with_key(&key, payload, signature),
        Err(_) => false,
    }
}

fn verify_with_key(key: &VerifyingKey, payload: &[u8], signature: &[u8]) -> bool {
    let Ok(signature) = Signature::from_slice(signature) else {
        return false;
    };
    key.verify_strict(payload, &signature).is_ok()
}

/// `did:key` form of an Ed25519 public key: multicodec `0xed01` + multibase base58btc.
pub fn did_key_for_ed25519(verifying_key: &VerifyingKey) -> String {
    let mut bytes = [0u8; 2 + PUBLIC_KEY_LEN];
    bytes[0] = 0xED;
    bytes[1] = 0x01;
    bytes[2..].copy_from_slice(verifying_key.as_bytes());
    let encoded = bs58::encode(bytes)
        .with_alphabet(Alphabet::BITCOIN)
        .into_string();
    format!("did:key:z{encoded}")
}
