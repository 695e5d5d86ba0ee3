//! Per-stream AEAD state shared by the writer and reader.

use crate::aead::{create_aead, AeadTransform, CipherId};
use crate::error::{StreamError, StreamResult};
use crate::BLOCK_SIZE;

/// Mutable state owned by exactly one `Writer` or `Reader`.
pub struct AeadContext {
    aead: AeadTransform,
    /// Running BLAKE3 hash of every plaintext byte sealed or opened.
    hasher: blake3::Hasher,
    /// Current nonce. The low 8 bytes hold a big-endian block counter.
    nonce: Vec<u8>,
    /// Ciphertext scratch, `BLOCK_SIZE + tag` capacity.
    pub(crate) enc_buf: Vec<u8>,
    /// Plaintext scratch. Opening happens in place, so this also needs room
    /// for the tag before it is truncated off.
    pub(crate) dec_buf: Vec<u8>,
}

impl AeadContext {
    pub fn new(key: &[u8], cipher: CipherId) -> StreamResult<Self> {
        let aead = create_aead(cipher, key)?;
        let scratch = BLOCK_SIZE + aead.tag_overhead();
        Ok(Self {
            nonce: vec![0u8; aead.nonce_size()],
            hasher: blake3::Hasher::new(),
            enc_buf: Vec::with_capacity(scratch),
            dec_buf: Vec::with_capacity(scratch),
            aead,
        })
    }

    pub fn aead(&self) -> &AeadTransform {
        &self.aead
    }

    pub fn nonce(&self) -> &[u8] {
        &self.nonce
    }

    pub(crate) fn nonce_mut(&mut self) -> &mut [u8] {
        &mut self.nonce
    }

    /// Bytes one full block occupies on the wire: nonce, payload and tag.
    pub fn block_stride(&self) -> u64 {
        (self.aead.nonce_size() + BLOCK_SIZE + self.aead.tag_overhead()) as u64
    }

    /// Counter value currently stored in the nonce.
    pub fn counter(&self) -> u64 {
        let tail = &self.nonce[self.nonce.len() - 8..];
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(tail);
        u64::from_be_bytes(bytes)
    }

    /// Pre-increment the counter and return its new value.
    ///
    /// The counter starts at zero, so the first block of a stream carries
    /// nonce 1. Existing streams depend on that, keep it.
    pub fn next_nonce(&mut self) -> StreamResult<u64> {
        let next = self.counter().checked_add(1).ok_or(StreamError::NonceExhausted)?;
        let len = self.nonce.len();
        self.nonce[len - 8..].copy_from_slice(&next.to_be_bytes());
        Ok(next)
    }

    pub fn update_hash(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    pub fn hash(&self) -> blake3::Hash {
        self.hasher.finalize()
    }

    /// Feed the plaintext scratch to the running hash.
    pub(crate) fn hash_plaintext(&mut self) {
        self.hasher.update(&self.dec_buf);
    }

    /// Seal `dec_buf` into `enc_buf` under the current nonce.
    pub(crate) fn seal_scratch(&mut self) -> StreamResult<()> {
        self.aead
            .seal_into(&self.nonce, &self.dec_buf, &mut self.enc_buf)
            .map_err(|_| StreamError::Io(std::io::Error::other("AEAD seal failed")))
    }

    /// Open `enc_buf` into `dec_buf` under the current nonce.
    pub(crate) fn open_scratch(&mut self, block: u64) -> StreamResult<()> {
        self.aead
            .open_into(&self.nonce, &self.enc_buf, &mut self.dec_buf)
            .map_err(|_| StreamError::Authentication { block })
    }
}

impl std::fmt::Debug for AeadContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AeadContext")
            .field("cipher", &self.aead.cipher())
            .field("counter", &self.counter())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonce_counter_is_pre_incremented() {
        let mut ctx = AeadContext::new(&[0u8; 32], CipherId::ChaCha20Poly1305).unwrap();
        assert_eq!(ctx.counter(), 0);
        assert_eq!(ctx.next_nonce().unwrap(), 1);
        assert_eq!(ctx.nonce(), &[0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1]);
        assert_eq!(ctx.next_nonce().unwrap(), 2);
    }

    #[test]
    fn nonce_counter_never_wraps() {
        let mut ctx = AeadContext::new(&[0u8; 32], CipherId::ChaCha20Poly1305).unwrap();
        let len = ctx.nonce().len();
        ctx.nonce_mut()[len - 8..].copy_from_slice(&u64::MAX.to_be_bytes());
        assert!(matches!(ctx.next_nonce(), Err(StreamError::NonceExhausted)));
    }

    #[test]
    fn scratch_buffers_sized_for_a_full_block() {
        let ctx = AeadContext::new(&[0u8; 32], CipherId::AesGcm).unwrap();
        assert!(ctx.enc_buf.capacity() >= BLOCK_SIZE + 16);
        assert!(ctx.dec_buf.capacity() >= BLOCK_SIZE);
        assert_eq!(ctx.block_stride(), (12 + BLOCK_SIZE + 16) as u64);
    }

    #[test]
    fn construction_propagates_key_errors() {
        assert!(matches!(
            AeadContext::new(&[0u8; 5], CipherId::ChaCha20Poly1305),
            Err(StreamError::InvalidKeyLength { .. })
        ));
    }
}
