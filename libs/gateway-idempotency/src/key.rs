//! Idempotency key validation and storage-key derivation.

use sha2::{Digest, Sha256};

pub const MIN_KEY_LEN: usize = 16;
pub const MAX_KEY_LEN: usize = 128;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("idempotency key must be between {MIN_KEY_LEN} and {MAX_KEY_LEN} characters")]
    Length,

    #[error("idempotency key may only contain A-Z, a-z, 0-9, '_' and '-'")]
    Charset,
}

/// Validate the client-supplied key.
///
/// # Errors
/// Returns [`KeyError`] when the key is out of bounds or uses characters
/// outside `[A-Za-z0-9_-]`.
pub fn validate_key(key: &str) -> Result<(), KeyError> {
    if key.len() < MIN_KEY_LEN || key.len() > MAX_KEY_LEN {
        return Err(KeyError::Length);
    }
    if !key
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    {
        return Err(KeyError::Charset);
    }
    Ok(())
}

/// Storage key for one logical operation: the hex SHA-256 of
/// `METHOD:PATH:KEY`. The store scope adds the `idempotency:` prefix.
#[must_use]
pub fn storage_key(method: &str, path: &str, key: &str) -> String {
    let digest = Sha256::digest(format!("{method}:{path}:{key}"));
    hex::encode(digest)
}
