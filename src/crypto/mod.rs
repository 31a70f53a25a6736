//! Cryptographic building blocks: key material, the streaming AEAD container
//! and password-based key derivation.

pub mod kdf;
pub mod keys;
pub mod stream;

use std::io;
use thiserror::Error;

pub use keys::{KEY_LEN, NONCE_LEN, SALT_LEN, SymmetricKey, TAG_LEN};
pub use stream::{CHUNK_SIZE, CONTAINER_OVERHEAD, OpenStream, open_stream, seal_stream, verify};

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("key material must be exactly {} bytes, got {len}", KEY_LEN)]
    InvalidKeyMaterial { len: usize },
    #[error("container is shorter than the {} byte nonce prefix", NONCE_LEN)]
    MalformedContainer,
    #[error("authentication tag mismatch")]
    AuthenticationFailed,
    #[error("stream exceeds the maximum length for a single nonce")]
    LimitExceeded,
    #[error("key derivation failed: {0}")]
    Kdf(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}
