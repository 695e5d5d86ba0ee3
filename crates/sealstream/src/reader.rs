//! Block reader: authenticated decryption with random access
//!
//! Logical (plaintext) offsets map onto physical blocks arithmetically:
//! ```text
//! physical = HEADER_SIZE + (logical / BLOCK_SIZE) * (nonce + BLOCK_SIZE + tag)
//! ```
//! so a seek costs one underlying seek and one block decryption, however long
//! the stream is. Seeking needs a seekable source; that capability is fixed
//! when the reader is constructed.

use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::context::AeadContext;
use crate::error::{StreamError, StreamResult};
use crate::header::{parse_header, HeaderInfo, HEADER_SIZE};
use crate::BLOCK_SIZE;

type SeekFn<R> = fn(&mut R, SeekFrom) -> io::Result<u64>;

/// Underlying byte source, with its seek capability decided up front.
enum Source<R> {
    Stream(R),
    Seekable { inner: R, seek: SeekFn<R> },
}

impl<R> Source<R> {
    fn get_mut(&mut self) -> &mut R {
        match self {
            Source::Stream(inner) | Source::Seekable { inner, .. } => inner,
        }
    }

    fn get_ref(&self) -> &R {
        match self {
            Source::Stream(inner) | Source::Seekable { inner, .. } => inner,
        }
    }

    fn into_inner(self) -> R {
        match self {
            Source::Stream(inner) | Source::Seekable { inner, .. } => inner,
        }
    }
}

/// Decrypts a stream produced by [`Writer`](crate::Writer).
pub struct Reader<R: Read> {
    source: Source<R>,
    info: HeaderInfo,
    ctx: AeadContext,
    /// Physical offset of the header within the source.
    base: u64,
    /// The undelivered backlog is `ctx.dec_buf[backlog_pos..]`.
    backlog_pos: usize,
    /// Plaintext offset the caller last reached. Not the physical offset.
    last_logical_offset: u64,
    /// Index of the block currently held in `ctx.dec_buf`.
    current_block: Option<u64>,
    /// Index of the block the source is positioned at.
    next_block: u64,
    /// Error that interrupted a read after partial progress.
    pending: Option<StreamError>,
    poisoned: bool,
}

impl<R: Read> Reader<R> {
    /// Open a reader over a forward-only source. `seek` will fail with
    /// `SeekUnsupported`.
    pub fn new(source: R, key: &[u8]) -> StreamResult<Self> {
        Self::open(Source::Stream(source), key, 0)
    }

    fn open(mut source: Source<R>, key: &[u8], base: u64) -> StreamResult<Self> {
        let mut header = [0u8; HEADER_SIZE];
        let got = read_full(source.get_mut(), &mut header)?;
        if got != HEADER_SIZE {
            return Err(StreamError::TruncatedHeader {
                expected: HEADER_SIZE,
                got,
            });
        }

        let info = parse_header(&header)?;
        info.validate(key.len())?;
        let ctx = AeadContext::new(key, info.cipher)?;

        tracing::debug!(
            cipher = %info.cipher,
            seekable = matches!(source, Source::Seekable { .. }),
            "stream header parsed"
        );

        Ok(Self {
            source,
            info,
            ctx,
            base,
            backlog_pos: 0,
            last_logical_offset: 0,
            current_block: None,
            next_block: 0,
            pending: None,
            poisoned: false,
        })
    }

    fn backlog(&self) -> &[u8] {
        &self.ctx.dec_buf[self.backlog_pos..]
    }

    fn check_usable(&mut self) -> StreamResult<()> {
        if let Some(err) = self.pending.take() {
            return Err(err);
        }
        if self.poisoned {
            return Err(StreamError::Poisoned);
        }
        Ok(())
    }

    /// Decrypt the next block into the backlog.
    ///
    /// Returns `Ok(false)` on a clean end of stream, i.e. when not a single
    /// nonce byte is left.
    fn read_block(&mut self) -> StreamResult<bool> {
        let block = self.next_block;
        let src = self.source.get_mut();

        let nonce_size = self.ctx.nonce().len();
        let got = read_full(src, self.ctx.nonce_mut())?;
        if got == 0 {
            return Ok(false);
        }
        if got != nonce_size {
            return Err(StreamError::TruncatedNonce {
                expected: nonce_size,
                got,
            });
        }

        // The final block may be short, so end of data is fine here.
        let want = BLOCK_SIZE + self.ctx.aead().tag_overhead();
        self.ctx.enc_buf.resize(want, 0);
        let got = read_full(src, &mut self.ctx.enc_buf)?;
        self.ctx.enc_buf.truncate(got);

        self.current_block = None;
        self.backlog_pos = 0;
        if let Err(e) = self.ctx.open_scratch(block) {
            tracing::warn!(block, "block failed authentication");
            return Err(e);
        }

        let expected = block + 1;
        let found = self.ctx.counter();
        if found != expected {
            self.ctx.dec_buf.clear();
            return Err(StreamError::OutOfOrder { expected, found });
        }

        self.ctx.hash_plaintext();
        self.current_block = Some(block);
        self.next_block = block + 1;

        tracing::trace!(block, plaintext = self.ctx.dec_buf.len(), "block opened");
        Ok(true)
    }

    fn fail(&mut self, err: StreamError) -> StreamError {
        self.poisoned = true;
        err
    }

    fn read_plain(&mut self, dest: &mut [u8]) -> StreamResult<usize> {
        self.check_usable()?;

        let mut copied = 0;
        while copied < dest.len() {
            if self.backlog().is_empty() {
                match self.read_block() {
                    Ok(true) => continue,
                    Ok(false) => break,
                    Err(e) => {
                        let e = self.fail(e);
                        if copied == 0 {
                            return Err(e);
                        }
                        self.pending = Some(e);
                        break;
                    }
                }
            }

            let backlog = &self.ctx.dec_buf[self.backlog_pos..];
            let n = backlog.len().min(dest.len() - copied);
            dest[copied..copied + n].copy_from_slice(&backlog[..n]);
            self.backlog_pos += n;
            self.last_logical_offset += n as u64;
            copied += n;
        }

        Ok(copied)
    }

    fn seek_logical(&mut self, pos: SeekFrom) -> StreamResult<u64> {
        let seek = match &self.source {
            Source::Stream(_) => return Err(StreamError::SeekUnsupported),
            Source::Seekable { seek, .. } => *seek,
        };
        self.check_usable()?;

        let target = match pos {
            SeekFrom::Start(n) => i128::from(n),
            SeekFrom::Current(delta) => i128::from(self.last_logical_offset) + i128::from(delta),
            SeekFrom::End(_) => return Err(StreamError::SeekEndUnsupported),
        };
        if target < 0 {
            return Err(StreamError::NegativeOffset(target));
        }
        let target = u64::try_from(target).map_err(|_| {
            StreamError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek offset overflows u64",
            ))
        })?;

        if target == self.last_logical_offset {
            return Ok(target);
        }

        let block = target / BLOCK_SIZE as u64;
        let within = (target % BLOCK_SIZE as u64) as usize;

        if self.current_block != Some(block) {
            let physical = block
                .checked_mul(self.ctx.block_stride())
                .and_then(|off| off.checked_add(self.base + HEADER_SIZE as u64))
                .ok_or_else(|| {
                    StreamError::Io(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "seek offset overflows u64",
                    ))
                })?;

            tracing::debug!(target, block, physical, "seeking to block");

            seek(self.source.get_mut(), SeekFrom::Start(physical))?;
            self.next_block = block;
            self.current_block = None;
            self.ctx.dec_buf.clear();
            self.backlog_pos = 0;

            // Past the end the backlog simply stays empty and reads return 0.
            if let Err(e) = self.read_block() {
                return Err(self.fail(e));
            }
        }

        self.backlog_pos = within.min(self.ctx.dec_buf.len());
        self.last_logical_offset = target;
        Ok(target)
    }

    /// Copy all remaining plaintext into `w`, block by block, without an
    /// intermediate buffer. Returns the number of bytes written.
    pub fn copy_to<W: Write + ?Sized>(&mut self, w: &mut W) -> StreamResult<u64> {
        self.check_usable()?;

        let mut total = 0u64;
        loop {
            let n = self.backlog().len();
            if n > 0 {
                w.write_all(&self.ctx.dec_buf[self.backlog_pos..])?;
                self.backlog_pos += n;
                self.last_logical_offset += n as u64;
                total += n as u64;
            }

            match self.read_block() {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => return Err(self.fail(e)),
            }
        }

        Ok(total)
    }

    /// Parsed stream header.
    pub fn header(&self) -> &HeaderInfo {
        &self.info
    }

    /// BLAKE3 hash of every block opened so far.
    ///
    /// After one sequential pass over the whole stream this equals the
    /// writer's hash. Blocks decrypted again after a seek are hashed again.
    pub fn hash(&self) -> blake3::Hash {
        self.ctx.hash()
    }

    /// Current logical (plaintext) offset.
    pub fn position(&self) -> u64 {
        self.last_logical_offset
    }

    pub fn is_seekable(&self) -> bool {
        matches!(self.source, Source::Seekable { .. })
    }

    /// No-op; the source stays open and owned by the caller.
    pub fn close(&mut self) -> StreamResult<()> {
        Ok(())
    }

    pub fn get_ref(&self) -> &R {
        self.source.get_ref()
    }

    pub fn into_inner(self) -> R {
        self.source.into_inner()
    }
}

impl<R: Read + Seek> Reader<R> {
    /// Open a reader over a seekable source. The stream is taken to start
    /// at the source's current position.
    pub fn new_seekable(mut source: R, key: &[u8]) -> StreamResult<Self> {
        let base = source.stream_position()?;
        Self::open(
            Source::Seekable {
                inner: source,
                seek: <R as Seek>::seek,
            },
            key,
            base,
        )
    }
}

impl<R: Read> Read for Reader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.read_plain(buf)?)
    }
}

impl<R: Read> Seek for Reader<R> {
    /// Offsets are plaintext offsets. `SeekFrom::End` is unsupported because
    /// the plaintext length is unknown without scanning the stream.
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        Ok(self.seek_logical(pos)?)
    }

    fn stream_position(&mut self) -> io::Result<u64> {
        Ok(self.last_logical_offset)
    }
}

impl<R: Read> std::fmt::Debug for Reader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reader")
            .field("info", &self.info)
            .field("ctx", &self.ctx)
            .field("seekable", &self.is_seekable())
            .field("position", &self.last_logical_offset)
            .field("current_block", &self.current_block)
            .field("poisoned", &self.poisoned)
            .finish()
    }
}

/// Read until `buf` is full or the source is exhausted. Returns bytes read.
fn read_full<R: Read + ?Sized>(src: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match src.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
