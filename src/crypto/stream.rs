//! Streaming AES-256-GCM container.
//!
//! On-disk layout: `[nonce: 12][ciphertext][tag: 16]`, byte-for-byte what a
//! one-shot AES-256-GCM seal with no associated data would produce. The body
//! is pushed through a fixed-size buffer so memory use does not depend on the
//! object size: the keystream comes from AES in 32-bit big-endian counter mode
//! starting at `nonce || 2`, and GHASH is updated incrementally over the
//! ciphertext.
//!
//! Decryption holds back the trailing [`TAG_LEN`] bytes of whatever it has
//! read so far, so the tag is only compared once the source is exhausted. A
//! caller that must not release unauthenticated plaintext runs [`verify`]
//! first and only then streams through [`open_stream`].

use aes::{
    Aes256, Block,
    cipher::{BlockEncrypt, KeyInit, KeyIvInit, StreamCipher, generic_array::GenericArray},
};
use bytes::Bytes;
use futures::Stream;
use ghash::{GHash, universal_hash::UniversalHash};
use std::io;
use subtle::ConstantTimeEq;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{
    CipherError,
    keys::{KEY_LEN, NONCE_LEN, TAG_LEN, generate_nonce},
};

/// Size of the bounded transfer buffer.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Bytes a sealed container adds on top of the plaintext.
pub const CONTAINER_OVERHEAD: u64 = (NONCE_LEN + TAG_LEN) as u64;

/// GCM caps a single (key, nonce) invocation at 2^32 - 2 counter blocks.
const MAX_STREAM_LEN: u64 = (1 << 36) - 32;

type Aes256Ctr = ctr::Ctr32BE<Aes256>;

/// Running GCM state for one container.
struct GcmState {
    keystream: Aes256Ctr,
    ghash: GHash,
    tag_mask: Block,
    partial: [u8; 16],
    partial_len: usize,
    ciphertext_len: u64,
}

impl GcmState {
    fn new(key: &[u8], nonce: &[u8; NONCE_LEN]) -> Result<Self, CipherError> {
        if key.len() != KEY_LEN {
            return Err(CipherError::InvalidKeyMaterial { len: key.len() });
        }
        let block_cipher = Aes256::new(GenericArray::from_slice(key));

        let mut hash_key = Block::default();
        block_cipher.encrypt_block(&mut hash_key);

        let mut counter = [0u8; 16];
        counter[..NONCE_LEN].copy_from_slice(nonce);
        counter[15] = 1;
        let mut tag_mask = Block::clone_from_slice(&counter);
        block_cipher.encrypt_block(&mut tag_mask);

        counter[15] = 2;
        let keystream = <Aes256Ctr as KeyIvInit>::new(
            GenericArray::from_slice(key),
            GenericArray::from_slice(&counter),
        );

        Ok(Self {
            keystream,
            ghash: GHash::new(&hash_key),
            tag_mask,
            partial: [0u8; 16],
            partial_len: 0,
            ciphertext_len: 0,
        })
    }

    fn seal(&mut self, buf: &mut [u8]) -> Result<(), CipherError> {
        self.check_len(buf.len())?;
        self.keystream
            .try_apply_keystream(buf)
            .map_err(|_| CipherError::LimitExceeded)?;
        self.absorb(buf);
        Ok(())
    }

    fn open(&mut self, buf: &mut [u8], decrypt: bool) -> Result<(), CipherError> {
        self.check_len(buf.len())?;
        self.absorb(buf);
        if decrypt {
            self.keystream
                .try_apply_keystream(buf)
                .map_err(|_| CipherError::LimitExceeded)?;
        }
        Ok(())
    }

    fn check_len(&self, additional: usize) -> Result<(), CipherError> {
        if self.ciphertext_len + additional as u64 > MAX_STREAM_LEN {
            return Err(CipherError::LimitExceeded);
        }
        Ok(())
    }

    /// Feed ciphertext into GHASH, carrying an incomplete block over to the
    /// next call so that zero padding is only ever applied at the very end.
    fn absorb(&mut self, mut data: &[u8]) {
        self.ciphertext_len += data.len() as u64;

        if self.partial_len > 0 {
            let take = (16 - self.partial_len).min(data.len());
            self.partial[self.partial_len..self.partial_len + take].copy_from_slice(&data[..take]);
            self.partial_len += take;
            data = &data[take..];
            if self.partial_len < 16 {
                return;
            }
            self.ghash.update_padded(&self.partial);
            self.partial_len = 0;
        }

        let whole = data.len() - data.len() % 16;
        self.ghash.update_padded(&data[..whole]);
        let rest = &data[whole..];
        self.partial[..rest.len()].copy_from_slice(rest);
        self.partial_len = rest.len();
    }

    fn finish(mut self) -> [u8; TAG_LEN] {
        if self.partial_len > 0 {
            self.ghash.update_padded(&self.partial[..self.partial_len]);
        }
        // No associated data, so the high half of the length block stays zero.
        let mut lengths = [0u8; 16];
        lengths[8..].copy_from_slice(&(self.ciphertext_len * 8).to_be_bytes());
        self.ghash.update_padded(&lengths);

        let digest = self.ghash.finalize();
        let mut tag = [0u8; TAG_LEN];
        for (out, (s, m)) in tag.iter_mut().zip(digest.iter().zip(self.tag_mask.iter())) {
            *out = s ^ m;
        }
        tag
    }
}

/// Encrypt everything `reader` yields into a container written to `writer`.
///
/// A fresh nonce is drawn from the OS CSPRNG for every call. Returns the
/// number of plaintext bytes consumed. If this fails part-way, whatever was
/// written to `writer` is not a valid container and the caller must discard it.
pub async fn seal_stream<R, W>(reader: &mut R, writer: &mut W, key: &[u8]) -> Result<u64, CipherError>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let nonce = generate_nonce();
    let mut state = GcmState::new(key, &nonce)?;
    writer.write_all(&nonce).await?;

    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut plaintext_len: u64 = 0;
    loop {
        let read = reader.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        state.seal(&mut buf[..read])?;
        writer.write_all(&buf[..read]).await?;
        plaintext_len += read as u64;
    }

    writer.write_all(&state.finish()).await?;
    writer.flush().await?;
    Ok(plaintext_len)
}

/// Begin decrypting a container. Fails with
/// [`CipherError::MalformedContainer`] when `reader` cannot supply a full nonce.
pub async fn open_stream<R>(mut reader: R, key: &[u8]) -> Result<OpenStream<R>, CipherError>
where
    R: AsyncRead + Unpin,
{
    if key.len() != KEY_LEN {
        return Err(CipherError::InvalidKeyMaterial { len: key.len() });
    }
    let nonce = read_nonce(&mut reader).await?;
    let state = GcmState::new(key, &nonce)?;
    Ok(OpenStream {
        reader,
        state: Some(state),
        held: Vec::with_capacity(CHUNK_SIZE + TAG_LEN),
        buf: vec![0u8; CHUNK_SIZE],
        released: 0,
    })
}

/// Authenticate a whole container without producing plaintext.
///
/// Returns the plaintext length the container carries.
pub async fn verify<R>(reader: R, key: &[u8]) -> Result<u64, CipherError>
where
    R: AsyncRead + Unpin,
{
    let mut opened = open_stream(reader, key).await?;
    while opened.advance(false).await?.is_some() {}
    Ok(opened.released)
}

async fn read_nonce<R>(reader: &mut R) -> Result<[u8; NONCE_LEN], CipherError>
where
    R: AsyncRead + Unpin,
{
    let mut nonce = [0u8; NONCE_LEN];
    match reader.read_exact(&mut nonce).await {
        Ok(_) => Ok(nonce),
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
            Err(CipherError::MalformedContainer)
        }
        Err(err) => Err(err.into()),
    }
}

/// Lazily decrypted view over a container.
///
/// Each chunk is released as soon as it is read; the tag is checked when the
/// underlying reader reaches end of file, at which point a mismatch surfaces
/// as [`CipherError::AuthenticationFailed`] instead of a clean end of stream.
pub struct OpenStream<R> {
    reader: R,
    state: Option<GcmState>,
    held: Vec<u8>,
    buf: Vec<u8>,
    released: u64,
}

impl<R> OpenStream<R>
where
    R: AsyncRead + Unpin,
{
    /// Next decrypted chunk, or `None` once the tag has been verified.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>, CipherError> {
        Ok(self.advance(true).await?.map(Bytes::from))
    }

    /// Plaintext bytes released so far.
    pub fn plaintext_len(&self) -> u64 {
        self.released
    }

    /// Decrypt the remainder into memory. Intended for small objects and tests.
    pub async fn read_to_end(mut self) -> Result<Vec<u8>, CipherError> {
        let mut out = Vec::new();
        while let Some(chunk) = self.next_chunk().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes, CipherError>> {
        futures::stream::try_unfold(self, |mut opened| async move {
            Ok(opened.next_chunk().await?.map(|chunk| (chunk, opened)))
        })
    }

    async fn advance(&mut self, decrypt: bool) -> Result<Option<Vec<u8>>, CipherError> {
        loop {
            if self.state.is_none() {
                return Ok(None);
            }

            let read = self.reader.read(&mut self.buf).await?;
            if read == 0 {
                self.finish()?;
                return Ok(None);
            }

            self.held.extend_from_slice(&self.buf[..read]);
            if self.held.len() <= TAG_LEN {
                continue;
            }

            let ready = self.held.len() - TAG_LEN;
            let mut chunk: Vec<u8> = self.held.drain(..ready).collect();
            if let Some(state) = self.state.as_mut() {
                state.open(&mut chunk, decrypt)?;
            }
            self.released += chunk.len() as u64;
            return Ok(Some(chunk));
        }
    }

    fn finish(&mut self) -> Result<(), CipherError> {
        let Some(state) = self.state.take() else {
            return Ok(());
        };
        if self.held.len() != TAG_LEN {
            return Err(CipherError::AuthenticationFailed);
        }
        let expected = state.finish();
        if bool::from(expected.as_slice().ct_eq(self.held.as_slice())) {
            Ok(())
        } else {
            Err(CipherError::AuthenticationFailed)
        }
    }
}
