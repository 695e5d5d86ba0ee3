//! AEAD transform selection
//!
//! Both constructions use a 96-bit nonce and a 16-byte tag, so the block
//! geometry is identical whichever cipher a stream was written with.

use std::fmt;
use std::str::FromStr;

use aes_gcm::{Aes128Gcm, Aes256Gcm};
use chacha20poly1305::{
    aead::{AeadInPlace, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use serde::{Deserialize, Serialize};

use crate::error::{StreamError, StreamResult};

pub use chacha20poly1305::aead::Error as AeadError;

/// Cipher identifier as stored in the stream header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CipherId {
    /// ChaCha20 stream cipher with Poly1305 MAC.
    #[default]
    #[serde(rename = "chacha20-poly1305")]
    ChaCha20Poly1305,
    /// AES in Galois/Counter Mode (128 or 256 bit key).
    AesGcm,
}

impl CipherId {
    pub const CHACHA20_POLY1305_ID: u16 = 0;
    pub const AES_GCM_ID: u16 = 1;

    pub fn as_u16(self) -> u16 {
        match self {
            Self::ChaCha20Poly1305 => Self::CHACHA20_POLY1305_ID,
            Self::AesGcm => Self::AES_GCM_ID,
        }
    }

    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            Self::CHACHA20_POLY1305_ID => Some(Self::ChaCha20Poly1305),
            Self::AES_GCM_ID => Some(Self::AesGcm),
            _ => None,
        }
    }

    /// Key size written into headers generated for this cipher.
    pub fn default_key_size(self) -> usize {
        crate::KEY_SIZE
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::ChaCha20Poly1305 => "chacha20-poly1305",
            Self::AesGcm => "aes-gcm",
        }
    }
}

impl fmt::Display for CipherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CipherId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "chacha20-poly1305" | "chacha20" | "chacha" => Ok(Self::ChaCha20Poly1305),
            "aes-gcm" | "aes" => Ok(Self::AesGcm),
            other => Err(format!(
                "unknown cipher '{other}' (expected chacha20-poly1305 or aes-gcm)"
            )),
        }
    }
}

/// A keyed AEAD primitive.
pub enum AeadTransform {
    ChaCha20Poly1305(Box<ChaCha20Poly1305>),
    Aes128Gcm(Box<Aes128Gcm>),
    Aes256Gcm(Box<Aes256Gcm>),
}

/// Build the AEAD for `cipher`, bound to `key`.
pub fn create_aead(cipher: CipherId, key: &[u8]) -> StreamResult<AeadTransform> {
    let invalid = |_| StreamError::InvalidKeyLength {
        cipher: cipher.name(),
        len: key.len(),
    };

    match cipher {
        CipherId::ChaCha20Poly1305 => ChaCha20Poly1305::new_from_slice(key)
            .map(|c| AeadTransform::ChaCha20Poly1305(Box::new(c)))
            .map_err(invalid),
        CipherId::AesGcm => match key.len() {
            16 => Aes128Gcm::new_from_slice(key)
                .map(|c| AeadTransform::Aes128Gcm(Box::new(c)))
                .map_err(invalid),
            _ => Aes256Gcm::new_from_slice(key)
                .map(|c| AeadTransform::Aes256Gcm(Box::new(c)))
                .map_err(invalid),
        },
    }
}

/// Same as `create_aead`, taking the raw header id.
pub fn create_aead_from_id(cipher_id: u16, key: &[u8]) -> StreamResult<AeadTransform> {
    let cipher = CipherId::from_u16(cipher_id).ok_or(StreamError::UnsupportedCipher(cipher_id))?;
    create_aead(cipher, key)
}

impl AeadTransform {
    pub const NONCE_SIZE: usize = 12;
    pub const TAG_SIZE: usize = 16;

    pub fn cipher(&self) -> CipherId {
        match self {
            Self::ChaCha20Poly1305(_) => CipherId::ChaCha20Poly1305,
            Self::Aes128Gcm(_) | Self::Aes256Gcm(_) => CipherId::AesGcm,
        }
    }

    pub fn nonce_size(&self) -> usize {
        Self::NONCE_SIZE
    }

    pub fn tag_overhead(&self) -> usize {
        Self::TAG_SIZE
    }

    pub fn key_size(&self) -> usize {
        match self {
            Self::ChaCha20Poly1305(_) | Self::Aes256Gcm(_) => 32,
            Self::Aes128Gcm(_) => 16,
        }
    }

    /// Seal `plaintext` into `out`, replacing its contents with `ciphertext || tag`.
    ///
    /// `out` is reused across blocks; with enough capacity this never allocates.
    pub fn seal_into(
        &self,
        nonce: &[u8],
        plaintext: &[u8],
        out: &mut Vec<u8>,
    ) -> Result<(), AeadError> {
        out.clear();
        out.extend_from_slice(plaintext);
        let nonce = Nonce::from_slice(nonce);
        match self {
            Self::ChaCha20Poly1305(c) => c.encrypt_in_place(nonce, b"", out),
            Self::Aes128Gcm(c) => c.encrypt_in_place(nonce, b"", out),
            Self::Aes256Gcm(c) => c.encrypt_in_place(nonce, b"", out),
        }
    }

    /// Open `ciphertext` into `out`. On failure `out` is left empty, so no
    /// unauthenticated plaintext is ever observable.
    pub fn open_into(
        &self,
        nonce: &[u8],
        ciphertext: &[u8],
        out: &mut Vec<u8>,
    ) -> Result<(), AeadError> {
        out.clear();
        out.extend_from_slice(ciphertext);
        let nonce = Nonce::from_slice(nonce);
        let result = match self {
            Self::ChaCha20Poly1305(c) => c.decrypt_in_place(nonce, b"", out),
            Self::Aes128Gcm(c) => c.decrypt_in_place(nonce, b"", out),
            Self::Aes256Gcm(c) => c.decrypt_in_place(nonce, b"", out),
        };
        if result.is_err() {
            out.clear();
        }
        result
    }

    pub fn seal(&self, nonce: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, AeadError> {
        let mut out = Vec::with_capacity(plaintext.len() + Self::TAG_SIZE);
        self.seal_into(nonce, plaintext, &mut out)?;
        Ok(out)
    }

    pub fn open(&self, nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, AeadError> {
        let mut out = Vec::with_capacity(ciphertext.len());
        self.open_into(nonce, ciphertext, &mut out)?;
        Ok(out)
    }
}

impl fmt::Debug for AeadTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AeadTransform")
            .field("cipher", &self.cipher())
            .field("key", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NONCE: [u8; 12] = [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1];

    #[test]
    fn seal_open_roundtrip_all_ciphers() {
        for (cipher, key) in [
            (CipherId::ChaCha20Poly1305, vec![7u8; 32]),
            (CipherId::AesGcm, vec![7u8; 16]),
            (CipherId::AesGcm, vec![7u8; 32]),
        ] {
            let aead = create_aead(cipher, &key).unwrap();
            assert_eq!(aead.cipher(), cipher);
            assert_eq!(aead.key_size(), key.len());

            let sealed = aead.seal(&NONCE, b"hello block").unwrap();
            assert_eq!(sealed.len(), b"hello block".len() + aead.tag_overhead());
            let opened = aead.open(&NONCE, &sealed).unwrap();
            assert_eq!(opened, b"hello block");
        }
    }

    #[test]
    fn wrong_nonce_fails_open() {
        let aead = create_aead(CipherId::ChaCha20Poly1305, &[1u8; 32]).unwrap();
        let sealed = aead.seal(&NONCE, b"secret").unwrap();
        let mut other = NONCE;
        other[11] = 2;
        assert!(aead.open(&other, &sealed).is_err());
    }

    #[test]
    fn failed_open_leaves_output_empty() {
        let aead = create_aead(CipherId::AesGcm, &[1u8; 32]).unwrap();
        let mut sealed = aead.seal(&NONCE, b"secret").unwrap();
        sealed[0] ^= 0x80;
        let mut out = Vec::new();
        assert!(aead.open_into(&NONCE, &sealed, &mut out).is_err());
        assert!(out.is_empty());
    }

    #[test]
    fn invalid_key_lengths_rejected() {
        assert!(matches!(
            create_aead(CipherId::ChaCha20Poly1305, &[0u8; 16]),
            Err(StreamError::InvalidKeyLength { len: 16, .. })
        ));
        assert!(matches!(
            create_aead(CipherId::AesGcm, &[0u8; 24]),
            Err(StreamError::InvalidKeyLength { len: 24, .. })
        ));
    }

    #[test]
    fn unknown_cipher_id_rejected() {
        assert!(matches!(
            create_aead_from_id(9, &[0u8; 32]),
            Err(StreamError::UnsupportedCipher(9))
        ));
    }

    #[test]
    fn cipher_ids_roundtrip() {
        for cipher in [CipherId::ChaCha20Poly1305, CipherId::AesGcm] {
            assert_eq!(CipherId::from_u16(cipher.as_u16()), Some(cipher));
            assert_eq!(cipher.name().parse::<CipherId>().unwrap(), cipher);
        }
        assert_eq!(CipherId::default().as_u16(), 0);
    }
}
