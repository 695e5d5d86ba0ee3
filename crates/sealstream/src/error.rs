use std::io;

use thiserror::Error;

pub type StreamResult<T> = Result<T, StreamError>;

#[derive(Debug, Error)]
pub enum StreamError {
    // ── Format errors (detected at open) ──────────────────────────────────────
    #[error("magic number in header differs")]
    BadMagic,

    #[error("header truncated: got {got} of {expected} bytes")]
    TruncatedHeader { expected: usize, got: usize },

    #[error("unsupported format version: {0}")]
    UnsupportedVersion(u16),

    #[error("unsupported cipher id: {0}")]
    UnsupportedCipher(u16),

    #[error("unsupported block size in header: {0}")]
    UnsupportedBlockSize(u32),

    #[error("key length differs: stream={header}, caller={key}")]
    KeyLengthMismatch { header: u32, key: usize },

    #[error("invalid key length {len} for {cipher}")]
    InvalidKeyLength { cipher: &'static str, len: usize },

    // ── Block errors ──────────────────────────────────────────────────────────
    #[error("nonce truncated: got {got} of {expected} bytes")]
    TruncatedNonce { expected: usize, got: usize },

    #[error("block {block} failed authentication: corrupted or tampered data")]
    Authentication { block: u64 },

    #[error("bad block number: expected counter {expected}, found {found}")]
    OutOfOrder { expected: u64, found: u64 },

    #[error("nonce counter exhausted")]
    NonceExhausted,

    #[error("stream is unusable after a previous error")]
    Poisoned,

    #[error("writer already closed")]
    Closed,

    // ── Capability errors ─────────────────────────────────────────────────────
    #[error("seek is not supported by the underlying stream")]
    SeekUnsupported,

    #[error("seeking relative to the end is not supported")]
    SeekEndUnsupported,

    #[error("negative seek offset: {0}")]
    NegativeOffset(i128),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl StreamError {
    /// Recover the typed error from an `io::Error` produced by the
    /// `Read`/`Write`/`Seek` impls. Plain I/O errors come back as `Io`.
    pub fn from_io(err: io::Error) -> Self {
        if !err.get_ref().is_some_and(|inner| inner.is::<StreamError>()) {
            return StreamError::Io(err);
        }
        let kind = err.kind();
        match err.into_inner().map(|inner| inner.downcast::<StreamError>()) {
            Some(Ok(typed)) => *typed,
            Some(Err(other)) => StreamError::Io(io::Error::new(kind, other)),
            None => StreamError::Io(kind.into()),
        }
    }

    /// True for AEAD tag mismatches.
    pub fn is_authentication(&self) -> bool {
        matches!(self, StreamError::Authentication { .. })
    }

    fn io_kind(&self) -> io::ErrorKind {
        match self {
            StreamError::SeekUnsupported | StreamError::SeekEndUnsupported => {
                io::ErrorKind::Unsupported
            }
            StreamError::NegativeOffset(_) | StreamError::InvalidKeyLength { .. } => {
                io::ErrorKind::InvalidInput
            }
            StreamError::TruncatedHeader { .. } | StreamError::TruncatedNonce { .. } => {
                io::ErrorKind::UnexpectedEof
            }
            StreamError::Closed | StreamError::Poisoned => io::ErrorKind::Other,
            StreamError::Io(e) => e.kind(),
            _ => io::ErrorKind::InvalidData,
        }
    }
}

impl From<StreamError> for io::Error {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::Io(e) => e,
            other => io::Error::new(other.io_kind(), other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_error_survives_io_wrapping() {
        let io_err: io::Error = StreamError::Authentication { block: 3 }.into();
        assert_eq!(io_err.kind(), io::ErrorKind::InvalidData);
        match StreamError::from_io(io_err) {
            StreamError::Authentication { block } => assert_eq!(block, 3),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn plain_io_error_is_passed_through() {
        let io_err = io::Error::new(io::ErrorKind::BrokenPipe, "pipe");
        let back: io::Error = StreamError::Io(io_err).into();
        assert_eq!(back.kind(), io::ErrorKind::BrokenPipe);
        assert!(matches!(StreamError::from_io(back), StreamError::Io(_)));
    }

    #[test]
    fn capability_errors_map_to_unsupported() {
        let io_err: io::Error = StreamError::SeekEndUnsupported.into();
        assert_eq!(io_err.kind(), io::ErrorKind::Unsupported);
    }
}
