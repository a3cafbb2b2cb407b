//! Named secret lookup for the signer.
//!
//! Design constraints:
//! - secret values never reach logs (`Sensitive<T>`)
//! - decrypted plaintext is wiped as soon as the requested value is extracted
//! - callers only see `get(name)`; the file format stays private to this crate

mod file_store;
mod memory_store;
mod types;

pub use file_store::{FileSecretProvider, FileSecretProviderOptions};
pub use memory_store::InMemorySecretProvider;
pub use types::{
    SecretError, SecretProvider, SecretProviderKind, SecretProviderOptions, open_secret_provider,
};
