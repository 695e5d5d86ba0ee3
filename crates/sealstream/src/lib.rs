//! sealstream: seekable authenticated encryption for stored objects
//!
//! Stream layout:
//! ```text
//! [HEADER 20 bytes][[NONCE 12][CIPHERTEXT <= BLOCK_SIZE + 16]]...
//! ```
//!
//! Plaintext is cut into `BLOCK_SIZE` blocks, each sealed with
//! ChaCha20-Poly1305 (default) or AES-GCM under a nonce holding a
//! big-endian block counter. Fixed block geometry lets [`Reader`] jump to
//! any plaintext offset by decrypting a single block. Both directions keep
//! a running BLAKE3 hash of the plaintext for the content store.

pub mod aead;
pub mod context;
pub mod error;
pub mod header;
pub mod reader;
pub mod ring;
pub mod stream;
pub mod writer;

pub use aead::{create_aead, AeadTransform, CipherId};
pub use error::{StreamError, StreamResult};
pub use header::{generate_header, parse_header, HeaderInfo, HEADER_SIZE};
pub use reader::Reader;
pub use stream::{decrypt, encrypt};
pub use writer::Writer;

/// Plaintext bytes per block (1 MiB). Streams with any other value are rejected.
pub const BLOCK_SIZE: usize = 1024 * 1024;

/// Key size of the default cipher in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Recommended buffer size when copying into a `Writer`.
pub const ENC_BUFFER_SIZE: usize = BLOCK_SIZE + 40;

/// Recommended buffer size when copying out of a `Reader`.
pub const DEC_BUFFER_SIZE: usize = BLOCK_SIZE;
