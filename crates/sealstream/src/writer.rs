//! Block writer: buffers arbitrary writes into fixed-size sealed blocks
//!
//! Every block except the last carries exactly `BLOCK_SIZE` plaintext bytes,
//! which is what lets the reader compute block offsets without an index.

use std::io::{self, Write};

use crate::aead::CipherId;
use crate::context::AeadContext;
use crate::error::{StreamError, StreamResult};
use crate::header::generate_header_for;
use crate::ring::RingBuffer;
use crate::BLOCK_SIZE;

/// Encrypts everything written to it and forwards `nonce || ciphertext`
/// blocks to the sink.
///
/// `close()` must be called to emit the final block. Dropping an unclosed
/// writer closes it on a best-effort basis, but errors are then only logged.
pub struct Writer<W: Write> {
    sink: Option<W>,
    ctx: AeadContext,
    ring: RingBuffer,
    blocks_written: u64,
    closed: bool,
}

impl<W: Write> Writer<W> {
    /// Open a writer with the default cipher. The header is written immediately.
    pub fn new(sink: W, key: &[u8]) -> StreamResult<Self> {
        Self::with_cipher(sink, key, CipherId::default())
    }

    pub fn with_cipher(mut sink: W, key: &[u8], cipher: CipherId) -> StreamResult<Self> {
        let ctx = AeadContext::new(key, cipher)?;
        let header = generate_header_for(cipher, key.len() as u32);
        sink.write_all(&header)?;

        tracing::debug!(cipher = %cipher, key_len = key.len(), "stream header written");

        Ok(Self {
            sink: Some(sink),
            ctx,
            ring: RingBuffer::with_capacity(2 * BLOCK_SIZE),
            blocks_written: 0,
            closed: false,
        })
    }

    /// Buffer `data`, sealing full blocks as they become available.
    fn write_buffered(&mut self, mut data: &[u8]) -> StreamResult<()> {
        if self.closed {
            return Err(StreamError::Closed);
        }

        while !data.is_empty() {
            while self.ring.len() >= BLOCK_SIZE {
                self.flush_block(BLOCK_SIZE)?;
            }
            let taken = self.ring.push(data);
            data = &data[taken..];
        }
        Ok(())
    }

    /// Seal the next `n` buffered bytes as one block and emit it.
    fn flush_block(&mut self, n: usize) -> StreamResult<()> {
        let sink = self.sink.as_mut().ok_or(StreamError::Closed)?;

        self.ctx.dec_buf.clear();
        self.ring.pop_into(n, &mut self.ctx.dec_buf);
        self.ctx.hash_plaintext();

        let counter = self.ctx.next_nonce()?;
        self.ctx.seal_scratch()?;

        sink.write_all(self.ctx.nonce())?;
        sink.write_all(&self.ctx.enc_buf)?;
        self.blocks_written += 1;

        tracing::trace!(counter, plaintext = n, "block sealed");
        Ok(())
    }

    /// Seal whatever is still buffered as the final block(s).
    ///
    /// A stream that never sealed anything gets one empty block. Calling
    /// `close` again is a no-op, even when the first call failed. The sink
    /// is flushed but not closed.
    pub fn close(&mut self) -> StreamResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        while !self.ring.is_empty() {
            let n = self.ring.len().min(BLOCK_SIZE);
            self.flush_block(n)?;
        }
        if self.blocks_written == 0 {
            self.flush_block(0)?;
        }

        if let Some(sink) = self.sink.as_mut() {
            sink.flush()?;
        }

        tracing::debug!(
            blocks = self.blocks_written,
            hash = %self.ctx.hash(),
            "stream writer closed"
        );
        Ok(())
    }

    /// Close the writer and hand back the sink.
    pub fn finish(mut self) -> StreamResult<W> {
        self.close()?;
        self.sink.take().ok_or(StreamError::Closed)
    }

    /// BLAKE3 hash of all plaintext sealed so far. Final after `close()`.
    pub fn hash(&self) -> blake3::Hash {
        self.ctx.hash()
    }

    pub fn blocks_written(&self) -> u64 {
        self.blocks_written
    }

    pub fn cipher(&self) -> CipherId {
        self.ctx.aead().cipher()
    }

    /// Plaintext bytes accepted but not yet sealed.
    pub fn buffered(&self) -> usize {
        self.ring.len()
    }

    pub fn get_ref(&self) -> Option<&W> {
        self.sink.as_ref()
    }
}

impl<W: Write> Write for Writer<W> {
    /// Always reports the whole buffer as written; data may still sit in
    /// the ring buffer until a full block accumulates or `close()` runs.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_buffered(buf)?;
        Ok(buf.len())
    }

    /// Emits only full blocks; a short block mid-stream would break seeking.
    fn flush(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        while self.ring.len() >= BLOCK_SIZE {
            self.flush_block(BLOCK_SIZE)?;
        }
        match self.sink.as_mut() {
            Some(sink) => sink.flush(),
            None => Ok(()),
        }
    }
}

impl<W: Write> Drop for Writer<W> {
    fn drop(&mut self) {
        if self.closed || self.sink.is_none() || std::thread::panicking() {
            return;
        }
        if let Err(e) = self.close() {
            tracing::warn!("closing stream writer on drop failed: {e}");
        }
    }
}

impl<W: Write> std::fmt::Debug for Writer<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Writer")
            .field("ctx", &self.ctx)
            .field("ring", &self.ring)
            .field("blocks_written", &self.blocks_written)
            .field("closed", &self.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aead::AeadTransform;
    use crate::header::HEADER_SIZE;

    const KEY: [u8; 32] = [0x42; 32];
    const STRIDE: usize = AeadTransform::NONCE_SIZE + BLOCK_SIZE + AeadTransform::TAG_SIZE;

    fn encrypt_all(data: &[u8], write_size: usize) -> Vec<u8> {
        let mut writer = Writer::new(Vec::new(), &KEY).unwrap();
        for piece in data.chunks(write_size.max(1)) {
            writer.write_all(piece).unwrap();
        }
        writer.finish().unwrap()
    }

    #[test]
    fn single_write_larger_than_ring() {
        use std::io::Read;

        let data: Vec<u8> = (0..5 * BLOCK_SIZE + 3).map(|i| (i % 251) as u8).collect();
        let mut writer = Writer::new(Vec::new(), &KEY).unwrap();
        assert_eq!(writer.write(&data).unwrap(), data.len());
        let out = writer.finish().unwrap();

        assert_eq!(out.len(), HEADER_SIZE + 5 * STRIDE + AeadTransform::NONCE_SIZE + 3 + 16);
        for (i, counter) in (1..=6u64).enumerate() {
            let start = HEADER_SIZE + i * STRIDE;
            let nonce = &out[start..start + AeadTransform::NONCE_SIZE];
            assert_eq!(&nonce[4..], &counter.to_be_bytes());
        }

        let mut back = Vec::new();
        crate::reader::Reader::new(out.as_slice(), &KEY)
            .unwrap()
            .read_to_end(&mut back)
            .unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn header_written_on_open() {
        let writer = Writer::new(Vec::new(), &KEY).unwrap();
        assert_eq!(writer.get_ref().unwrap().len(), HEADER_SIZE);
        assert_eq!(&writer.get_ref().unwrap()[..8], b"moosecat");
    }

    #[test]
    fn empty_stream_has_one_empty_block() {
        let out = encrypt_all(b"", 1);
        assert_eq!(out.len(), HEADER_SIZE + AeadTransform::NONCE_SIZE + AeadTransform::TAG_SIZE);
    }

    #[test]
    fn first_block_uses_counter_one() {
        let out = encrypt_all(b"abc", 3);
        let nonce = &out[HEADER_SIZE..HEADER_SIZE + 12];
        assert_eq!(nonce, &[0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1]);
    }

    #[test]
    fn full_blocks_then_short_tail() {
        let data = vec![9u8; 2 * BLOCK_SIZE + 5];
        let out = encrypt_all(&data, 100_000);
        assert_eq!(out.len(), HEADER_SIZE + 2 * STRIDE + 12 + 5 + 16);

        // counters 1, 2, 3 in order
        for (i, expected) in [1u64, 2, 3].iter().enumerate() {
            let at = HEADER_SIZE + i * STRIDE;
            let counter = u64::from_be_bytes(out[at + 4..at + 12].try_into().unwrap());
            assert_eq!(counter, *expected);
        }
    }

    #[test]
    fn exact_block_multiple_has_no_trailing_empty_block() {
        let data = vec![1u8; BLOCK_SIZE];
        let out = encrypt_all(&data, BLOCK_SIZE);
        assert_eq!(out.len(), HEADER_SIZE + STRIDE);
    }

    #[test]
    fn output_independent_of_write_sizes() {
        let data: Vec<u8> = (0..BLOCK_SIZE + 777).map(|i| (i % 251) as u8).collect();
        let a = encrypt_all(&data, 1 << 20);
        let b = encrypt_all(&data, 4093);
        let c = encrypt_all(&data, 3 * BLOCK_SIZE);
        assert_eq!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn hash_covers_all_plaintext() {
        let data = b"content addressed".repeat(1000);
        let mut writer = Writer::new(Vec::new(), &KEY).unwrap();
        writer.write_all(&data).unwrap();
        writer.close().unwrap();
        assert_eq!(writer.hash(), blake3::hash(&data));
    }

    #[test]
    fn flush_does_not_emit_short_blocks() {
        let mut writer = Writer::new(Vec::new(), &KEY).unwrap();
        writer.write_all(&[0u8; 1000]).unwrap();
        writer.flush().unwrap();
        assert_eq!(writer.blocks_written(), 0);
        assert_eq!(writer.buffered(), 1000);
    }

    #[test]
    fn write_after_close_fails() {
        let mut writer = Writer::new(Vec::new(), &KEY).unwrap();
        writer.close().unwrap();
        writer.close().unwrap();
        let err = writer.write(b"late").unwrap_err();
        assert!(matches!(StreamError::from_io(err), StreamError::Closed));
    }

    #[test]
    fn drop_closes_the_stream() {
        let mut out = Vec::new();
        {
            let mut writer = Writer::new(&mut out, &KEY).unwrap();
            writer.write_all(b"dropped").unwrap();
        }
        assert_eq!(out.len(), HEADER_SIZE + 12 + 7 + 16);
    }

    #[test]
    fn rejects_key_of_wrong_size() {
        assert!(matches!(
            Writer::new(Vec::new(), &[0u8; 8]),
            Err(StreamError::InvalidKeyLength { .. })
        ));
    }
}
