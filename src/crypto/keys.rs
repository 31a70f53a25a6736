//! Key material handling.
//!
//! Every symmetric key in the service passes through [`SymmetricKey`], which
//! enforces the AES-256 length, zeroizes on drop and never prints its bytes.

use base64::{Engine as _, engine::general_purpose};
use rand::{RngCore, rngs::OsRng};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::CipherError;

/// AES-256 key length in bytes.
pub const KEY_LEN: usize = 32;

/// GCM nonce length in bytes (96-bit IV).
pub const NONCE_LEN: usize = 12;

/// GCM authentication tag length in bytes.
pub const TAG_LEN: usize = 16;

/// Length of the per-principal KDF salt.
pub const SALT_LEN: usize = 16;

/// A 256-bit symmetric key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey {
    bytes: [u8; KEY_LEN],
}

impl SymmetricKey {
    /// Generate a fresh key from the operating system CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Build a key from raw bytes, rejecting anything that is not exactly
    /// [`KEY_LEN`] bytes long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CipherError> {
        if bytes.len() != KEY_LEN {
            return Err(CipherError::InvalidKeyMaterial { len: bytes.len() });
        }
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(bytes);
        Ok(Self { bytes: key })
    }

    /// Decode a standard Base64 key (as found in configuration or in the
    /// principals table).
    pub fn from_base64(encoded: &str) -> Result<Self, CipherError> {
        let mut decoded = general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|_| CipherError::InvalidKeyMaterial { len: 0 })?;
        let key = Self::from_slice(&decoded);
        decoded.zeroize();
        key
    }

    /// Encode as standard Base64. Only the per-principal stored-key mode
    /// persists keys this way.
    pub fn to_base64(&self) -> String {
        general_purpose::STANDARD.encode(self.bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

impl AsRef<[u8]> for SymmetricKey {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymmetricKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Random 96-bit nonce for a single seal operation.
pub fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Random salt for password-based key derivation.
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}
