//! Stream header encode/decode
//!
//! Header format (20 bytes, big-endian):
//! ```text
//! [8 bytes: magic "moosecat"][2: version][2: cipher id][4: key length][4: block size]
//! ```
//!
//! The header carries no MAC of its own. A forged cipher id or key length
//! either fails to open or fails the first block's authentication.

use crate::aead::CipherId;
use crate::error::{StreamError, StreamResult};
use crate::BLOCK_SIZE;

/// First 8 bytes of every stream: ASCII "moosecat".
pub const MAGIC: [u8; 8] = *b"moosecat";

/// Current format version; bumped on incompatible changes.
pub const FORMAT_VERSION: u16 = 1;

/// Size of the encoded header in bytes.
pub const HEADER_SIZE: usize = 20;

/// Decoded header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderInfo {
    pub version: u16,
    pub cipher: CipherId,
    pub key_length: u32,
    pub block_size: u32,
}

impl HeaderInfo {
    /// Open-time checks that `parse_header` leaves to the caller.
    pub fn validate(&self, key_len: usize) -> StreamResult<()> {
        if self.version != FORMAT_VERSION {
            return Err(StreamError::UnsupportedVersion(self.version));
        }
        if self.key_length as usize != key_len {
            return Err(StreamError::KeyLengthMismatch {
                header: self.key_length,
                key: key_len,
            });
        }
        Ok(())
    }
}

/// Header for the default cipher and its key size.
pub fn generate_header() -> [u8; HEADER_SIZE] {
    let cipher = CipherId::default();
    generate_header_for(cipher, cipher.default_key_size() as u32)
}

/// Header for an explicitly chosen cipher.
pub fn generate_header_for(cipher: CipherId, key_length: u32) -> [u8; HEADER_SIZE] {
    let mut header = [0u8; HEADER_SIZE];
    header[..8].copy_from_slice(&MAGIC);
    header[8..10].copy_from_slice(&FORMAT_VERSION.to_be_bytes());
    header[10..12].copy_from_slice(&cipher.as_u16().to_be_bytes());
    header[12..16].copy_from_slice(&key_length.to_be_bytes());
    header[16..20].copy_from_slice(&(BLOCK_SIZE as u32).to_be_bytes());
    header
}

/// Decode a header. Version and key length are returned unchecked.
pub fn parse_header(header: &[u8; HEADER_SIZE]) -> StreamResult<HeaderInfo> {
    if header[..8] != MAGIC {
        return Err(StreamError::BadMagic);
    }

    let version = u16::from_be_bytes([header[8], header[9]]);
    let cipher_raw = u16::from_be_bytes([header[10], header[11]]);
    let cipher = CipherId::from_u16(cipher_raw).ok_or(StreamError::UnsupportedCipher(cipher_raw))?;
    let key_length = u32::from_be_bytes([header[12], header[13], header[14], header[15]]);
    let block_size = u32::from_be_bytes([header[16], header[17], header[18], header[19]]);

    if block_size as usize != BLOCK_SIZE {
        return Err(StreamError::UnsupportedBlockSize(block_size));
    }

    Ok(HeaderInfo {
        version,
        cipher,
        key_length,
        block_size,
    })
}
