//! KMS-backed stream encryption for configuration at rest
//!
//! Configuration blobs are sealed with a fresh data key wrapped by the KMS
//! master key. The KMS context is bound into the associated data of both the
//! key wrap and every chunk, so decrypting under a different context fails
//! authentication. Both directions are streaming: plaintext is processed in
//! 64 KiB chunks and neither side materialises the whole payload.
//!
//! Wire layout:
//!
//! ```text
//! [version u8][algorithm u8][wrapped-key len u16 BE][wrapped key][nonce 12B]
//! repeated: [chunk len u32 BE][final flag u8][sealed chunk]
//! ```
//!
//! The final chunk is flagged on the wire and in its associated data, so a
//! truncated stream fails instead of yielding a short plaintext.

use std::collections::BTreeMap;
use std::io::{self, Read};

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;

use crate::error::CryptoError;

/// Ordered mapping bound into the AEAD associated data.
pub type Context = BTreeMap<String, String>;

/// Stream format version.
const FORMAT_VERSION: u8 = 1;

/// Algorithm id for ChaCha20-Poly1305.
pub const ALG_CHACHA20_POLY1305: u8 = 0x01;

/// Plaintext bytes sealed per chunk.
const CHUNK_SIZE: usize = 64 * 1024;

/// Poly1305 tag length.
const TAG_SIZE: usize = 16;

const NONCE_SIZE: usize = 12;

const CHUNK_FLAG_MORE: u8 = 0;
const CHUNK_FLAG_FINAL: u8 = 1;

/// A freshly generated data key together with its wrapped form.
pub struct DataKey {
    pub plaintext: [u8; 32],
    pub wrapped: Vec<u8>,
}

/// Key-management contract: generates and unwraps data keys bound to a
/// context.
pub trait Kms: Send + Sync {
    fn key_id(&self) -> &str;

    fn generate_key(&self, context: &Context) -> Result<DataKey, CryptoError>;

    fn unwrap_key(&self, wrapped: &[u8], context: &Context) -> Result<[u8; 32], CryptoError>;
}

/// KMS over a single locally held master key.
pub struct LocalKms {
    key_id: String,
    master: [u8; 32],
}

impl LocalKms {
    pub fn new(key_id: impl Into<String>, master: [u8; 32]) -> Self {
        Self {
            key_id: key_id.into(),
            master,
        }
    }
}

impl Kms for LocalKms {
    fn key_id(&self) -> &str {
        &self.key_id
    }

    fn generate_key(&self, context: &Context) -> Result<DataKey, CryptoError> {
        let mut plaintext = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut plaintext);

        let mut nonce = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce);

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.master));
        let sealed = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &plaintext,
                    aad: &canonical_context(context),
                },
            )
            .map_err(|e| CryptoError::Encrypt(e.to_string()))?;

        let mut wrapped = Vec::with_capacity(NONCE_SIZE + sealed.len());
        wrapped.extend_from_slice(&nonce);
        wrapped.extend_from_slice(&sealed);
        Ok(DataKey { plaintext, wrapped })
    }

    fn unwrap_key(&self, wrapped: &[u8], context: &Context) -> Result<[u8; 32], CryptoError> {
        if wrapped.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::Decrypt("wrapped key too short".to_string()));
        }
        let (nonce, sealed) = wrapped.split_at(NONCE_SIZE);
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.master));
        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: sealed,
                    aad: &canonical_context(context),
                },
            )
            .map_err(|e| CryptoError::Decrypt(e.to_string()))?;
        plaintext
            .try_into()
            .map_err(|_| CryptoError::Decrypt("unexpected data key length".to_string()))
    }
}

/// Deterministic byte form of a context. `Context` is an ordered map, so the
/// JSON rendering is canonical.
fn canonical_context(context: &Context) -> Vec<u8> {
    serde_json::to_vec(context).unwrap_or_else(|_| b"{}".to_vec())
}

fn chunk_nonce(base: &[u8; NONCE_SIZE], counter: u32) -> [u8; NONCE_SIZE] {
    let mut nonce = *base;
    for (i, b) in counter.to_le_bytes().iter().enumerate() {
        nonce[NONCE_SIZE - 4 + i] ^= b;
    }
    nonce
}

fn chunk_aad(context_aad: &[u8], flag: u8, counter: u32) -> Vec<u8> {
    let mut aad = Vec::with_capacity(context_aad.len() + 5);
    aad.extend_from_slice(context_aad);
    aad.push(flag);
    aad.extend_from_slice(&counter.to_be_bytes());
    aad
}

/// Starts encrypting `reader` under a fresh data key from `kms`.
pub fn encrypt<R: Read>(
    kms: &dyn Kms,
    reader: R,
    context: &Context,
) -> Result<EncryptReader<R>, CryptoError> {
    let data_key = kms.generate_key(context)?;
    if data_key.wrapped.len() > u16::MAX as usize {
        return Err(CryptoError::Encrypt("wrapped key too large".to_string()));
    }

    let mut base_nonce = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut base_nonce);

    let mut header = Vec::with_capacity(4 + data_key.wrapped.len() + NONCE_SIZE);
    header.push(FORMAT_VERSION);
    header.push(ALG_CHACHA20_POLY1305);
    header.extend_from_slice(&(data_key.wrapped.len() as u16).to_be_bytes());
    header.extend_from_slice(&data_key.wrapped);
    header.extend_from_slice(&base_nonce);

    Ok(EncryptReader {
        inner: reader,
        cipher: ChaCha20Poly1305::new(Key::from_slice(&data_key.plaintext)),
        context_aad: canonical_context(context),
        base_nonce,
        counter: 0,
        pending: None,
        out: header,
        out_pos: 0,
        finished: false,
    })
}

/// Starts decrypting `reader`; fails up front when the header is malformed
/// or the data key does not unwrap under `context`.
pub fn decrypt<R: Read>(
    kms: &dyn Kms,
    mut reader: R,
    context: &Context,
) -> Result<DecryptReader<R>, CryptoError> {
    let mut fixed = [0u8; 4];
    reader
        .read_exact(&mut fixed)
        .map_err(|e| CryptoError::Header(e.to_string()))?;
    if fixed[0] != FORMAT_VERSION {
        return Err(CryptoError::Header(format!(
            "unsupported format version {}",
            fixed[0]
        )));
    }
    if fixed[1] != ALG_CHACHA20_POLY1305 {
        return Err(CryptoError::UnknownAlgorithm(fixed[1]));
    }
    let wrapped_len = u16::from_be_bytes([fixed[2], fixed[3]]) as usize;
    let mut wrapped = vec![0u8; wrapped_len];
    reader
        .read_exact(&mut wrapped)
        .map_err(|e| CryptoError::Header(e.to_string()))?;
    let mut base_nonce = [0u8; NONCE_SIZE];
    reader
        .read_exact(&mut base_nonce)
        .map_err(|e| CryptoError::Header(e.to_string()))?;

    let key = kms.unwrap_key(&wrapped, context)?;

    Ok(DecryptReader {
        inner: reader,
        cipher: ChaCha20Poly1305::new(Key::from_slice(&key)),
        context_aad: canonical_context(context),
        base_nonce,
        counter: 0,
        out: Vec::new(),
        out_pos: 0,
        finished: false,
    })
}

/// Streaming encryptor; yields the framed ciphertext.
pub struct EncryptReader<R> {
    inner: R,
    cipher: ChaCha20Poly1305,
    context_aad: Vec<u8>,
    base_nonce: [u8; NONCE_SIZE],
    counter: u32,
    pending: Option<u8>,
    out: Vec<u8>,
    out_pos: usize,
    finished: bool,
}

impl<R: Read> EncryptReader<R> {
    /// Reads up to one chunk of plaintext. The one-byte lookahead decides
    /// whether this chunk is the final one.
    fn next_plain_chunk(&mut self) -> io::Result<(Vec<u8>, bool)> {
        let mut chunk = Vec::new();
        if let Some(b) = self.pending.take() {
            chunk.push(b);
        }
        let mut buf = [0u8; 8192];
        while chunk.len() < CHUNK_SIZE {
            let want = (CHUNK_SIZE - chunk.len()).min(buf.len());
            let n = self.inner.read(&mut buf[..want])?;
            if n == 0 {
                return Ok((chunk, true));
            }
            chunk.extend_from_slice(&buf[..n]);
        }
        let mut one = [0u8; 1];
        loop {
            match self.inner.read(&mut one) {
                Ok(0) => return Ok((chunk, true)),
                Ok(_) => {
                    self.pending = Some(one[0]);
                    return Ok((chunk, false));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn seal_next(&mut self) -> io::Result<()> {
        let (plain, last) = self.next_plain_chunk()?;
        let flag = if last { CHUNK_FLAG_FINAL } else { CHUNK_FLAG_MORE };
        let nonce = chunk_nonce(&self.base_nonce, self.counter);
        let sealed = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &plain,
                    aad: &chunk_aad(&self.context_aad, flag, self.counter),
                },
            )
            .map_err(|e| io::Error::new(io::ErrorKind::Other, CryptoError::Encrypt(e.to_string())))?;
        self.counter = self
            .counter
            .checked_add(1)
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "chunk counter overflow"))?;

        self.out.clear();
        self.out_pos = 0;
        self.out
            .extend_from_slice(&(sealed.len() as u32).to_be_bytes());
        self.out.push(flag);
        self.out.extend_from_slice(&sealed);
        self.finished = last;
        Ok(())
    }
}

impl<R: Read> Read for EncryptReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if self.out_pos < self.out.len() {
                let n = (self.out.len() - self.out_pos).min(buf.len());
                buf[..n].copy_from_slice(&self.out[self.out_pos..self.out_pos + n]);
                self.out_pos += n;
                return Ok(n);
            }
            if self.finished {
                return Ok(0);
            }
            self.seal_next()?;
        }
    }
}

/// Streaming decryptor; yields the original plaintext.
pub struct DecryptReader<R> {
    inner: R,
    cipher: ChaCha20Poly1305,
    context_aad: Vec<u8>,
    base_nonce: [u8; NONCE_SIZE],
    counter: u32,
    out: Vec<u8>,
    out_pos: usize,
    finished: bool,
}

impl<R: Read> DecryptReader<R> {
    fn open_next(&mut self) -> io::Result<()> {
        let mut frame = [0u8; 5];
        if let Err(e) = self.inner.read_exact(&mut frame) {
            // EOF before the final chunk means the stream was cut short.
            return Err(if e.kind() == io::ErrorKind::UnexpectedEof {
                io::Error::new(io::ErrorKind::UnexpectedEof, "ciphertext stream truncated")
            } else {
                e
            });
        }
        let len = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        let flag = frame[4];
        if flag != CHUNK_FLAG_MORE && flag != CHUNK_FLAG_FINAL {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "invalid chunk flag",
            ));
        }
        if len < TAG_SIZE || len > CHUNK_SIZE + TAG_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "invalid chunk length",
            ));
        }
        let mut sealed = vec![0u8; len];
        self.inner.read_exact(&mut sealed).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                io::Error::new(io::ErrorKind::UnexpectedEof, "ciphertext stream truncated")
            } else {
                e
            }
        })?;

        let nonce = chunk_nonce(&self.base_nonce, self.counter);
        let plain = self
            .cipher
            .decrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &sealed,
                    aad: &chunk_aad(&self.context_aad, flag, self.counter),
                },
            )
            .map_err(|e| {
                io::Error::new(io::ErrorKind::InvalidData, CryptoError::Decrypt(e.to_string()))
            })?;
        self.counter = self
            .counter
            .checked_add(1)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "chunk counter overflow"))?;

        if flag == CHUNK_FLAG_FINAL {
            self.finished = true;
            // Anything after the final chunk is tampering.
            let mut one = [0u8; 1];
            match self.inner.read(&mut one) {
                Ok(0) => {}
                Ok(_) => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "trailing data after final chunk",
                    ))
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }

        self.out = plain;
        self.out_pos = 0;
        Ok(())
    }
}

impl<R: Read> Read for DecryptReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if self.out_pos < self.out.len() {
                let n = (self.out.len() - self.out_pos).min(buf.len());
                buf[..n].copy_from_slice(&self.out[self.out_pos..self.out_pos + n]);
                self.out_pos += n;
                return Ok(n);
            }
            if self.finished {
                return Ok(0);
            }
            self.open_next()?;
        }
    }
}
